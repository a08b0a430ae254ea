use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cdr_core::{
    AggregationKind, CompositeResource, CoreConfig, LocalBlobStore, Principal, ResourceId,
};

#[derive(Parser)]
#[command(name = "cdr")]
#[command(about = "Composite dataset repository CLI")]
struct Cli {
    /// Storage zone directory
    #[arg(long, global = true, default_value = "cdr_zone")]
    zone: PathBuf,
    /// Resource UUID to operate on
    #[arg(long, global = true)]
    resource: Option<String>,
    /// Name recorded as the acting user
    #[arg(long, global = true, default_value = "cli")]
    actor: String,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new resource
    Init,
    /// Show a resource's files and aggregations
    Status,
    /// List indexed files
    Ls {
        /// Folder to list; omit to list everything
        #[arg(long)]
        folder: Option<String>,
    },
    /// Add a local file to a resource
    Put {
        /// Local file to upload
        file: PathBuf,
        /// Destination folder inside the resource
        #[arg(long, default_value = "")]
        folder: String,
        /// Name to store the file under (defaults to the local name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Create an empty folder
    Mkdir {
        /// Folder path to create
        folder: String,
    },
    /// Rename or move a file or folder
    Mv {
        /// Current path
        source: String,
        /// New path
        destination: String,
    },
    /// Delete a file or folder
    Rm {
        /// Path to delete
        target: String,
    },
    /// Archive a folder into a zip file
    Zip {
        /// Folder to archive
        folder: String,
        /// Archive name (defaults to the folder name)
        #[arg(long)]
        name: Option<String>,
        /// Delete the folder after archiving it
        #[arg(long)]
        delete_original: bool,
    },
    /// Extract a zip archive
    Unzip {
        /// Archive path inside the resource
        archive: String,
        /// Delete the archive after extraction
        #[arg(long)]
        remove_zip: bool,
    },
    /// Create an aggregation on a file or folder
    Aggregate {
        /// Aggregation kind, e.g. GeoRaster or TimeSeries
        kind: String,
        /// File or folder to aggregate
        target: String,
    },
    /// Dissolve an aggregation, keeping its files
    Deaggregate {
        /// Aggregation identity or member path
        target: String,
    },
    /// Set or clear an aggregation title
    SetTitle {
        /// Aggregation identity or member path
        target: String,
        /// New title; omit to clear
        title: Option<String>,
    },
    /// Add a keyword to an aggregation
    AddKeyword {
        /// Aggregation identity or member path
        target: String,
        /// Keyword to add
        keyword: String,
    },
    /// Rewrite sidecar documents of dirty aggregations
    Flush {
        /// Rewrite documents even when clean
        #[arg(long)]
        force: bool,
    },
    /// Repair the file index against the storage zone
    Reconcile,
}

fn require_resource(resource: Option<&str>) -> Result<&str, Box<dyn std::error::Error>> {
    resource.ok_or_else(|| "a resource id is required; pass --resource <id>".into())
}

fn parse_kind(raw: &str) -> Result<AggregationKind, Box<dyn std::error::Error>> {
    let term = if raw.ends_with("Aggregation") {
        raw.to_string()
    } else {
        format!("{raw}Aggregation")
    };
    AggregationKind::parse_term(&term)
        .ok_or_else(|| format!("unknown aggregation kind '{raw}'").into())
}

fn open_resource(
    zone: &Path,
    resource: &str,
) -> Result<CompositeResource, Box<dyn std::error::Error>> {
    let id = ResourceId::parse(resource)?;
    let store = Arc::new(LocalBlobStore::new(zone)?);
    Ok(CompositeResource::open(id, store, CoreConfig::default())?)
}

fn main() {
    if let Err(error) = run() {
        eprintln!("Error: {}", error);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cdr_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let Cli {
        zone,
        resource,
        actor,
        command,
    } = Cli::parse();
    let actor = Principal::editor(actor);

    match command {
        Some(Commands::Init) => {
            std::fs::create_dir_all(&zone)?;
            let id = match resource.as_deref() {
                Some(raw) => ResourceId::parse(raw)?,
                None => ResourceId::generate(),
            };
            let store = Arc::new(LocalBlobStore::new(&zone)?);
            CompositeResource::create(id.clone(), store, CoreConfig::default())?;
            println!("Created resource {}", id);
        }
        Some(Commands::Status) => {
            let resource = open_resource(&zone, require_resource(resource.as_deref())?)?;
            println!("Resource {}", resource.id());
            println!("  files: {}", resource.file_count());
            println!("  aggregations: {}", resource.aggregation_count());
            for aggregation in resource.aggregations() {
                let metadata = aggregation.metadata();
                let mut flags = String::new();
                if metadata.is_dirty() {
                    flags.push_str(" dirty");
                }
                if !metadata.is_complete(aggregation.kind()) {
                    flags.push_str(" incomplete");
                }
                println!(
                    "  [{}] {} at '{}' ({} files){}",
                    aggregation.id(),
                    aggregation.kind().display_name(),
                    aggregation.identity(),
                    resource.aggregation_members(aggregation.id()).len(),
                    flags
                );
            }
        }
        Some(Commands::Ls { folder }) => {
            let resource = open_resource(&zone, require_resource(resource.as_deref())?)?;
            let files: Vec<_> = match folder {
                Some(folder) => resource.list_folder(&folder)?,
                None => resource.files().collect(),
            };
            if files.is_empty() {
                println!("No files found.");
            } else {
                for file in files {
                    let owner = match file.aggregation_id() {
                        Some(id) => format!("  #{}", id),
                        None => String::new(),
                    };
                    println!(
                        "{}  {:>9}  {}  {}{}",
                        file.modified_on().format("%Y-%m-%d %H:%M"),
                        file.size(),
                        file.media_type(),
                        file.path(),
                        owner
                    );
                }
            }
        }
        Some(Commands::Put { file, folder, name }) => {
            let mut resource = open_resource(&zone, require_resource(resource.as_deref())?)?;
            let bytes = std::fs::read(&file)?;
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .and_then(|os| os.to_str())
                    .unwrap_or("")
                    .to_string(),
            };
            let path = resource.add_file(&actor, &folder, &name, &bytes)?;
            println!("Added {}", path);
        }
        Some(Commands::Mkdir { folder }) => {
            let mut resource = open_resource(&zone, require_resource(resource.as_deref())?)?;
            resource.create_folder(&actor, &folder)?;
            println!("Created folder {}", folder);
        }
        Some(Commands::Mv {
            source,
            destination,
        }) => {
            let mut resource = open_resource(&zone, require_resource(resource.as_deref())?)?;
            resource.rename_or_move(&actor, &source, &destination)?;
            println!("Moved {} to {}", source, destination);
        }
        Some(Commands::Rm { target }) => {
            let mut resource = open_resource(&zone, require_resource(resource.as_deref())?)?;
            resource.delete(&actor, &target)?;
            println!("Deleted {}", target);
        }
        Some(Commands::Zip {
            folder,
            name,
            delete_original,
        }) => {
            let mut resource = open_resource(&zone, require_resource(resource.as_deref())?)?;
            let archive = resource.zip_folder(&actor, &folder, name.as_deref(), delete_original)?;
            println!("Created archive {}", archive);
        }
        Some(Commands::Unzip {
            archive,
            remove_zip,
        }) => {
            let mut resource = open_resource(&zone, require_resource(resource.as_deref())?)?;
            let extracted = resource.unzip_file(&actor, &archive, remove_zip)?;
            println!("Extracted {} files", extracted.len());
            for path in extracted {
                println!("  {}", path);
            }
        }
        Some(Commands::Aggregate { kind, target }) => {
            let mut resource = open_resource(&zone, require_resource(resource.as_deref())?)?;
            let kind = parse_kind(&kind)?;
            let id = resource.aggregate(&actor, kind, &target)?;
            println!("Created aggregation #{} on {}", id, target);
        }
        Some(Commands::Deaggregate { target }) => {
            let mut resource = open_resource(&zone, require_resource(resource.as_deref())?)?;
            resource.deaggregate(&actor, &target)?;
            println!("Removed aggregation at {}", target);
        }
        Some(Commands::SetTitle { target, title }) => {
            let mut resource = open_resource(&zone, require_resource(resource.as_deref())?)?;
            resource.set_title(&actor, &target, title.as_deref())?;
            resource.flush_metadata(&actor, false)?;
            println!("Updated title for {}", target);
        }
        Some(Commands::AddKeyword { target, keyword }) => {
            let mut resource = open_resource(&zone, require_resource(resource.as_deref())?)?;
            let added = resource.add_keyword(&actor, &target, &keyword)?;
            resource.flush_metadata(&actor, false)?;
            if added {
                println!("Added keyword '{}' to {}", keyword, target);
            } else {
                println!("Keyword '{}' was already present", keyword);
            }
        }
        Some(Commands::Flush { force }) => {
            let mut resource = open_resource(&zone, require_resource(resource.as_deref())?)?;
            let written = resource.flush_metadata(&actor, force)?;
            println!("Rewrote documents for {} aggregations", written);
        }
        Some(Commands::Reconcile) => {
            let mut resource = open_resource(&zone, require_resource(resource.as_deref())?)?;
            let report = resource.reconcile(&actor)?;
            if report.is_clean() {
                println!("Index matches the zone.");
            } else {
                for path in &report.added {
                    println!("indexed {}", path);
                }
                for path in &report.removed {
                    println!("dropped {}", path);
                }
                for identity in &report.dropped_aggregations {
                    println!("dropped aggregation at {}", identity);
                }
            }
        }
        None => {
            println!("Use 'cdr --help' for commands");
        }
    }

    Ok(())
}

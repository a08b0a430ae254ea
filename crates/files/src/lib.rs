//! CDR Storage-Zone Access
//!
//! This crate provides blob storage access for the Composite Dataset Repository (CDR).
//!
//! ## Design Principles
//!
//! Following the CDR storage model:
//!
//! - The storage zone holds opaque blobs; all interpretation (file index, aggregations,
//!   metadata) lives in `cdr-core`
//! - Every object is addressed by a `/`-separated path whose first segment is the owning
//!   resource's identifier
//! - The zone is the source of truth for bytes; the index over it can always be rebuilt
//!   by listing the zone
//! - No operation here consults or mutates the file index
//!
//! ## Storage-Zone Layout
//!
//! Each resource is self-contained under its identifier:
//!
//! ```text
//! <zone_root>/
//! └── <resource_id>/
//!     └── data/
//!         └── contents/         # user files, aggregation folders, sidecar documents
//!             ├── logan.tif
//!             └── watershed/
//!                 └── sites.sqlite
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use cdr_files::{BlobStore, LocalBlobStore};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = LocalBlobStore::new(Path::new("zone"))?;
//! store.put_bytes("550e8400e29b41d4a716446655440000/data/contents/readme.txt", b"hi")?;
//! assert!(store.exists("550e8400e29b41d4a716446655440000/data/contents/readme.txt")?);
//! # Ok(())
//! # }
//! ```

mod local;
mod store;

pub use local::LocalBlobStore;
pub use store::{BlobStore, FolderListing};

/// Errors that can occur during storage-zone operations
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// Zone root directory does not exist or is not a directory
    #[error("Invalid zone root: {0}")]
    InvalidRoot(String),

    /// Path validation failed (potential directory traversal or unsafe path)
    #[error("Invalid path: {0}")]
    SuspiciousPath(String),

    /// Object does not exist in the zone
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Target object already exists
    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    /// Operation expected a file but found a folder, or vice versa
    #[error("Wrong object kind: {0}")]
    WrongKind(String),

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive error from the zip library
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

//! Drift repair between the storage zone and the file index.
//!
//! The zone is the source of truth for bytes. An embedder that writes
//! to the zone directly, or an operation that failed between its zone
//! mutation and its index mutation, leaves the index out of step. The
//! sweep walks the zone tree, indexes blobs the index does not know,
//! drops index entries whose blobs are gone, and removes aggregations
//! whose identities no longer exist. Metadata documents are derived
//! state and never indexed; the closing flush rewrites any that are
//! stale or missing.

use serde::Serialize;
use tracing::warn;

use cdr_files::BlobStore;

use crate::aggregations::Aggregation;
use crate::coordinator::EngineCtx;
use crate::error::CoreResult;
use crate::paths::{content_key, is_document_path, AggregationIdentity, ContentPath, FolderPath};

/// What a reconcile sweep changed.
#[derive(Debug, Default, Serialize)]
pub struct ReconcileReport {
    /// Files found in the zone and added to the index.
    pub added: Vec<ContentPath>,
    /// Index entries dropped because their blobs are gone.
    pub removed: Vec<ContentPath>,
    /// Aggregations dropped because their identities are gone.
    pub dropped_aggregations: Vec<String>,
}

impl ReconcileReport {
    /// Returns true when the sweep found nothing to repair.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.dropped_aggregations.is_empty()
    }
}

impl EngineCtx<'_> {
    /// Repairs drift between the zone and the index, in both
    /// directions, and flushes the documents of everything affected.
    pub(crate) fn reconcile(&mut self) -> CoreResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let mut zone_files = Vec::new();
        self.collect_zone_files(&FolderPath::root(), &mut zone_files)?;

        for path in zone_files {
            if is_document_path(&path) || self.index.contains(&path) {
                continue;
            }
            warn!(path = %path, "indexing blob written behind the index");
            self.register_file(path.clone())?;
            report.added.push(path);
        }

        let indexed: Vec<ContentPath> = self
            .index
            .iter()
            .map(|file| file.path().clone())
            .collect();
        for path in indexed {
            if self
                .store
                .exists(&content_key(self.resource, path.as_str()))?
            {
                continue;
            }
            warn!(path = %path, "dropping index entry for a missing blob");
            let owner = self.index.require(&path)?.aggregation_id();
            let identity = self.registry.by_file_identity(&path).map(Aggregation::id);
            if let Some(id) = identity {
                let identity_name = self.registry.require(id)?.identity().to_string();
                self.remove_aggregation_record(id)?;
                report.dropped_aggregations.push(identity_name);
            }
            self.index.remove(&path)?;
            if let Some(owner_id) = owner {
                if Some(owner_id) != identity && self.registry.get(owner_id).is_some() {
                    let capabilities = self.registry.require(owner_id)?.kind().capabilities();
                    let typed_content =
                        capabilities.folder_identity && !capabilities.allows_member_rename;
                    if typed_content && self.index.files_in_aggregation(owner_id).is_empty() {
                        let identity_name =
                            self.registry.require(owner_id)?.identity().to_string();
                        self.remove_aggregation_record(owner_id)?;
                        report.dropped_aggregations.push(identity_name);
                    } else if let Some(aggregation) = self.registry.get_mut(owner_id) {
                        aggregation.metadata_mut().mark_dirty();
                    }
                }
            }
            report.removed.push(path);
        }

        let ids: Vec<u64> = self.registry.iter().map(Aggregation::id).collect();
        for id in ids {
            let dropped_name = {
                let aggregation = match self.registry.get(id) {
                    Some(aggregation) => aggregation,
                    None => continue,
                };
                let missing = match aggregation.identity() {
                    AggregationIdentity::File(path) => !self.index.contains(path),
                    AggregationIdentity::Folder(folder) => {
                        !self
                            .store
                            .exists(&content_key(self.resource, folder.as_str()))?
                    }
                };
                if missing {
                    Some(aggregation.identity().to_string())
                } else {
                    None
                }
            };
            if let Some(identity_name) = dropped_name {
                warn!(identity = %identity_name, "dropping aggregation with a missing identity");
                self.remove_aggregation_record(id)?;
                report.dropped_aggregations.push(identity_name);
            }
        }

        self.flush_all(false)?;
        Ok(report)
    }

    pub(crate) fn collect_zone_files(
        &self,
        folder: &FolderPath,
        files: &mut Vec<ContentPath>,
    ) -> CoreResult<()> {
        let listing = self
            .store
            .listdir(&content_key(self.resource, folder.as_str()))?;
        for name in listing.files {
            match folder.file(&name) {
                Ok(path) => files.push(path),
                Err(error) => {
                    warn!(folder = %folder, name = %name, error = %error, "skipping zone file with an invalid name");
                }
            }
        }
        for name in listing.folders {
            match folder.join(&name) {
                Ok(child) => self.collect_zone_files(&child, files)?,
                Err(error) => {
                    warn!(folder = %folder, name = %name, error = %error, "skipping zone folder with an invalid name");
                }
            }
        }
        Ok(())
    }
}

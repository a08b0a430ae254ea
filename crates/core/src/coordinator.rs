//! Cascades for content operations.
//!
//! Moving, deleting, zipping, or unzipping content never touches just
//! the storage zone. The file index must be re-keyed, aggregation
//! identities follow renamed paths, memberships are recomputed against
//! the new folder layout, stale sidecar documents are removed, and
//! affected aggregations get their documents rewritten. [`EngineCtx`]
//! performs each operation in that order: validate, mutate the zone,
//! mutate the in-memory state, then flush dirty documents.
//!
//! There is no rollback. The zone mutation comes first, so a failure
//! afterwards leaves the index behind the zone rather than ahead of
//! it, and a reconcile sweep can repair that direction of drift.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use cdr_files::{BlobError, BlobStore};
use cdr_uuid::ResourceId;

use crate::aggregations::xml::{self, RestoredAggregation};
use crate::aggregations::{
    metadata, Aggregation, AggregationKind, AggregationMetadata, AggregationRegistry,
    DataFileChange, DataFilePatcher,
};
use crate::config::CoreConfig;
use crate::constants::{MAP_FILE_SUFFIX, METADATA_FILE_SUFFIX, ZIP_EXTENSION};
use crate::error::{CoreError, CoreResult};
use crate::index::{FileIndex, ResourceFile};
use crate::paths::documents::{classify_metadata_document, DocumentOwner};
use crate::paths::{
    content_key, content_root, is_document_path, validate_name, AggregationDocuments,
    AggregationIdentity, ContentPath, FolderPath,
};

/// Borrowed view over one resource's state for a single operation.
///
/// The facade builds one of these per call so that every cascade sees
/// the index, the registry, and the store together. Operations take
/// `&mut self`; one writer at a time is the concurrency model.
pub(crate) struct EngineCtx<'a> {
    pub(crate) resource: &'a ResourceId,
    pub(crate) index: &'a mut FileIndex,
    pub(crate) registry: &'a mut AggregationRegistry,
    pub(crate) store: &'a dyn BlobStore,
    pub(crate) config: &'a CoreConfig,
}

impl EngineCtx<'_> {
    fn key(&self, relative: &str) -> String {
        content_key(self.resource, relative)
    }

    /// Deletes a blob, treating an already-missing blob as success.
    fn delete_blob_if_present(&self, relative: &str) -> CoreResult<()> {
        match self.store.delete(&self.key(relative)) {
            Ok(()) | Err(BlobError::NotFound(_)) => Ok(()),
            Err(error) => Err(CoreError::Transport(error)),
        }
    }

    fn mark_dirty(&mut self, id: u64) {
        if let Some(aggregation) = self.registry.get_mut(id) {
            aggregation.metadata_mut().mark_dirty();
        }
    }

    /// Id of the nearest enclosing folder-identity aggregation, if any.
    pub(crate) fn nearest_folder_aggregation(&self, folder: &FolderPath) -> Option<u64> {
        self.registry
            .nearest_folder_identity(folder)
            .map(Aggregation::id)
    }

    /// Rejects placement of new content inside an aggregation folder
    /// that does not accept loose files.
    pub(crate) fn ensure_placeable(&self, folder: &FolderPath) -> CoreResult<()> {
        if let Some(id) = self.nearest_folder_aggregation(folder) {
            let kind = self.registry.require(id)?.kind();
            if !kind.capabilities().accepts_loose_files {
                return Err(CoreError::Validation(format!(
                    "cannot place content inside a {} aggregation",
                    kind.display_name()
                )));
            }
        }
        Ok(())
    }

    /// Rejects file names that collide with the sidecar document
    /// naming scheme.
    pub(crate) fn ensure_not_document_name(&self, path: &ContentPath) -> CoreResult<()> {
        if is_document_path(path) {
            return Err(CoreError::Validation(format!(
                "name '{}' is reserved for metadata documents",
                path.file_name()
            )));
        }
        Ok(())
    }

    fn check_configured_length(&self, name: &str) -> CoreResult<()> {
        if name.len() > self.config.max_name_length() {
            return Err(CoreError::Validation(format!(
                "name '{name}' exceeds the configured limit of {} bytes",
                self.config.max_name_length()
            )));
        }
        Ok(())
    }

    fn ensure_folder_exists(&self, folder: &FolderPath) -> CoreResult<()> {
        if folder.is_root() {
            return Ok(());
        }
        if self
            .index
            .contains(&ContentPath::from_validated(folder.as_str().to_string()))
        {
            return Err(CoreError::Validation(format!(
                "'{folder}' is a file, not a folder"
            )));
        }
        if !self.store.exists(&self.key(folder.as_str()))? {
            return Err(CoreError::NotFound(format!("no folder at '{folder}'")));
        }
        Ok(())
    }

    fn ensure_folder_target_free(&self, folder: &FolderPath) -> CoreResult<()> {
        if self.store.exists(&self.key(folder.as_str()))?
            || self
                .index
                .contains(&ContentPath::from_validated(folder.as_str().to_string()))
        {
            return Err(CoreError::Validation(format!("'{folder}' already exists")));
        }
        Ok(())
    }

    fn remove_stale_documents(
        &self,
        old: &AggregationDocuments,
        new: &AggregationDocuments,
    ) -> CoreResult<()> {
        if old.metadata_path() != new.metadata_path() {
            self.delete_blob_if_present(old.metadata_path())?;
        }
        if old.map_path() != new.map_path() {
            self.delete_blob_if_present(old.map_path())?;
        }
        Ok(())
    }

    fn flush_one(&mut self, id: u64, force: bool) -> CoreResult<bool> {
        let members: Vec<ContentPath> = self
            .index
            .files_in_aggregation(id)
            .into_iter()
            .map(|file| file.path().clone())
            .collect();
        let aggregation = match self.registry.get_mut(id) {
            Some(aggregation) => aggregation,
            None => return Ok(false),
        };
        let member_refs: Vec<&ContentPath> = members.iter().collect();
        metadata::flush_documents(self.resource, self.store, aggregation, &member_refs, force)
    }

    fn flush_ids(&mut self, ids: &BTreeSet<u64>) -> CoreResult<()> {
        for id in ids {
            self.flush_one(*id, false)?;
        }
        Ok(())
    }

    /// Rewrites the documents of every aggregation whose metadata is
    /// dirty or whose documents are missing from the zone.
    ///
    /// # Returns
    ///
    /// The number of aggregations whose documents were rewritten.
    pub(crate) fn flush_all(&mut self, force: bool) -> CoreResult<usize> {
        let ids: Vec<u64> = self.registry.iter().map(Aggregation::id).collect();
        let mut written = 0;
        for id in ids {
            if self.flush_one(id, force)? {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Indexes a blob that already exists in the zone.
    ///
    /// The file joins the nearest enclosing aggregation that attaches
    /// content automatically. Returns the owner it joined, if any; the
    /// owner is left dirty, not flushed.
    pub(crate) fn register_file(&mut self, path: ContentPath) -> CoreResult<Option<u64>> {
        let key = self.key(path.as_str());
        let size = self.store.size(&key)?;
        let checksum = self.store.checksum(&key)?;
        self.index
            .insert_new(ResourceFile::new(path.clone(), size, checksum))?;

        if let Some(id) = self
            .registry
            .fileset_containing(&path.folder())
            .map(Aggregation::id)
        {
            self.index.set_aggregation(&path, Some(id))?;
            self.mark_dirty(id);
            return Ok(Some(id));
        }
        Ok(None)
    }

    /// Writes new content into the zone and indexes it.
    ///
    /// Returns the aggregation the file joined, if any. Unlike
    /// [`EngineCtx::register_file`] this flushes the owner before
    /// returning.
    pub(crate) fn ingest_file(&mut self, path: &ContentPath, bytes: &[u8]) -> CoreResult<Option<u64>> {
        self.ensure_not_document_name(path)?;
        self.check_configured_length(path.file_name())?;
        let folder = path.folder();
        self.ensure_folder_exists(&folder)?;
        if self.index.contains(path) || self.store.exists(&self.key(path.as_str()))? {
            return Err(CoreError::Validation(format!(
                "file '{path}' already exists"
            )));
        }
        self.ensure_placeable(&folder)?;

        self.store.put_bytes(&self.key(path.as_str()), bytes)?;
        let owner = self.register_file(path.clone())?;

        let mut affected = BTreeSet::new();
        if let Some(id) = owner {
            affected.insert(id);
        }
        self.flush_ids(&affected)?;
        info!(path = %path, owner = ?owner, "ingested file");
        Ok(owner)
    }

    /// Creates an empty folder.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when the parent folder does not
    /// exist and `CoreError::Validation` when the name is taken or the
    /// location does not accept new content.
    pub(crate) fn create_folder(&mut self, folder: &FolderPath) -> CoreResult<()> {
        if folder.is_root() {
            return Err(CoreError::Validation(
                "folder must have a name".to_string(),
            ));
        }
        self.check_configured_length(folder.name())?;
        let parent = folder.parent().unwrap_or_else(FolderPath::root);
        self.ensure_folder_exists(&parent)?;
        self.ensure_folder_target_free(folder)?;
        self.ensure_placeable(&parent)?;
        self.store.create_folder(&self.key(folder.as_str()))?;
        info!(folder = %folder, "created folder");
        Ok(())
    }

    /// Moves or renames one file, cascading into identities, document
    /// names, and memberships.
    ///
    /// A file that anchors its own aggregation takes the aggregation
    /// with it. A member of an aggregation that refuses member renames
    /// cannot be moved at all. Otherwise the file detaches from an
    /// owner it leaves behind and attaches to an aggregation that
    /// absorbs content at the destination.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when the source file or target
    /// folder is missing and `CoreError::Validation` when the target
    /// name is taken, reserved, or refused by an aggregation.
    pub(crate) fn move_file(&mut self, src: &ContentPath, dst: &ContentPath) -> CoreResult<()> {
        let owner = self.index.require(src)?.aggregation_id();
        let identity = self.registry.by_file_identity(src).map(Aggregation::id);

        if src == dst {
            return Err(CoreError::Validation(
                "source and destination are the same".to_string(),
            ));
        }
        self.ensure_not_document_name(dst)?;
        self.check_configured_length(dst.file_name())?;
        if self.index.contains(dst) || self.store.exists(&self.key(dst.as_str()))? {
            return Err(CoreError::Validation(format!("file '{dst}' already exists")));
        }
        let dst_folder = dst.folder();
        self.ensure_folder_exists(&dst_folder)?;

        if let Some(id) = identity.or(owner) {
            let kind = self.registry.require(id)?.kind();
            if !kind.capabilities().allows_member_rename {
                return Err(CoreError::Validation(format!(
                    "files of a {} aggregation cannot be renamed or moved",
                    kind.display_name()
                )));
            }
        }

        let destination_owner = self.nearest_folder_aggregation(&dst_folder);
        if let Some(dest_id) = destination_owner {
            let dest_kind = self.registry.require(dest_id)?.kind();
            if Some(dest_id) != owner && !dest_kind.capabilities().accepts_loose_files {
                return Err(CoreError::Validation(format!(
                    "cannot place content inside a {} aggregation",
                    dest_kind.display_name()
                )));
            }
        }

        self.store
            .move_object(&self.key(src.as_str()), &self.key(dst.as_str()))?;
        self.index.rewrite_path(src, dst.clone())?;

        let mut affected = BTreeSet::new();
        if let Some(id) = identity {
            // The aggregation and its documents follow the file.
            let old_documents = self.registry.require(id)?.documents();
            if let Some(aggregation) = self.registry.get_mut(id) {
                aggregation.set_identity(AggregationIdentity::File(dst.clone()));
                aggregation.metadata_mut().mark_dirty();
            }
            let new_documents = self.registry.require(id)?.documents();
            self.remove_stale_documents(&old_documents, &new_documents)?;
            affected.insert(id);
        } else {
            let expected = match destination_owner {
                Some(dest_id) if owner == Some(dest_id) => owner,
                Some(dest_id) => {
                    let capabilities = self.registry.require(dest_id)?.kind().capabilities();
                    if capabilities.accepts_loose_files {
                        Some(dest_id)
                    } else {
                        owner
                    }
                }
                None => None,
            };
            if expected != owner {
                self.index.set_aggregation(dst, expected)?;
                if let Some(old_id) = owner {
                    self.mark_dirty(old_id);
                    affected.insert(old_id);
                }
                if let Some(new_id) = expected {
                    self.mark_dirty(new_id);
                    affected.insert(new_id);
                }
            } else if let Some(owner_id) = owner {
                // The map document lists member paths, so a plain
                // rename still goes stale.
                self.mark_dirty(owner_id);
                affected.insert(owner_id);
            }
        }
        self.flush_ids(&affected)?;
        info!(from = %src, to = %dst, "moved file");
        Ok(())
    }

    /// Moves or renames a folder and everything beneath it.
    ///
    /// Aggregation identities under the folder are rebased onto the
    /// new location, their documents are renamed through a rewrite,
    /// and memberships are recomputed for every moved file.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when the source folder or the
    /// target's parent is missing and `CoreError::Validation` when the
    /// move is structurally impossible or refused by an aggregation.
    pub(crate) fn move_folder(&mut self, src: &FolderPath, dst: &FolderPath) -> CoreResult<()> {
        if src.is_root() {
            return Err(CoreError::Validation(
                "cannot move the content root".to_string(),
            ));
        }
        if dst.is_root() {
            return Err(CoreError::Validation(
                "destination folder must have a name".to_string(),
            ));
        }
        if src == dst {
            return Err(CoreError::Validation(
                "source and destination are the same".to_string(),
            ));
        }
        if dst.is_under(src) {
            return Err(CoreError::Validation(
                "cannot move a folder into itself".to_string(),
            ));
        }
        self.ensure_folder_exists(src)?;
        self.check_configured_length(dst.name())?;
        self.ensure_folder_target_free(dst)?;
        let dst_parent = dst.parent().unwrap_or_else(FolderPath::root);
        self.ensure_folder_exists(&dst_parent)?;

        let src_parent = src.parent().unwrap_or_else(FolderPath::root);
        if let Some(id) = self.nearest_folder_aggregation(&src_parent) {
            let kind = self.registry.require(id)?.kind();
            if !kind.capabilities().allows_member_rename {
                return Err(CoreError::Validation(format!(
                    "folders of a {} aggregation cannot be renamed or moved",
                    kind.display_name()
                )));
            }
        }
        if let Some(id) = self.nearest_folder_aggregation(&dst_parent) {
            let kind = self.registry.require(id)?.kind();
            if !kind.capabilities().accepts_loose_files {
                return Err(CoreError::Validation(format!(
                    "cannot place content inside a {} aggregation",
                    kind.display_name()
                )));
            }
        }

        let moved_files: Vec<(ContentPath, Option<u64>)> = self
            .index
            .files_under(src)
            .into_iter()
            .map(|file| (file.path().clone(), file.aggregation_id()))
            .collect();
        let moved_ids = self.registry.ids_under(src);

        self.store
            .move_object(&self.key(src.as_str()), &self.key(dst.as_str()))?;

        for (path, _) in &moved_files {
            self.index.rewrite_path(path, path.rebase(src, dst))?;
        }

        let mut affected = BTreeSet::new();
        for id in &moved_ids {
            let (old_documents, new_documents) = {
                let aggregation = match self.registry.get_mut(*id) {
                    Some(aggregation) => aggregation,
                    None => continue,
                };
                let old_documents = aggregation.documents();
                let identity = aggregation.identity().rebase(src, dst);
                aggregation.set_identity(identity);
                aggregation.metadata_mut().mark_dirty();
                (old_documents, aggregation.documents())
            };
            // The old documents travelled inside the moved folder;
            // drop the ones whose derived names changed.
            let travelled_metadata =
                ContentPath::from_validated(old_documents.metadata_path().to_string())
                    .rebase(src, dst);
            let travelled_map =
                ContentPath::from_validated(old_documents.map_path().to_string()).rebase(src, dst);
            if travelled_metadata.as_str() != new_documents.metadata_path() {
                self.delete_blob_if_present(travelled_metadata.as_str())?;
            }
            if travelled_map.as_str() != new_documents.map_path() {
                self.delete_blob_if_present(travelled_map.as_str())?;
            }
            affected.insert(*id);
        }

        for (old_path, owner) in &moved_files {
            let new_path = old_path.rebase(src, dst);
            if self.registry.by_file_identity(&new_path).is_some() {
                continue;
            }
            let enclosing = self.nearest_folder_aggregation(&new_path.folder());
            let expected = match enclosing {
                Some(id) if *owner == Some(id) => *owner,
                Some(id) => {
                    let capabilities = self.registry.require(id)?.kind().capabilities();
                    if capabilities.accepts_loose_files {
                        Some(id)
                    } else {
                        *owner
                    }
                }
                None => None,
            };
            if expected != *owner {
                self.index.set_aggregation(&new_path, expected)?;
                if let Some(old_id) = *owner {
                    self.mark_dirty(old_id);
                    affected.insert(old_id);
                }
                if let Some(new_id) = expected {
                    self.mark_dirty(new_id);
                    affected.insert(new_id);
                }
            } else if let Some(owner_id) = *owner {
                self.mark_dirty(owner_id);
                affected.insert(owner_id);
            }
        }
        self.flush_ids(&affected)?;
        info!(from = %src, to = %dst, files = moved_files.len(), "moved folder");
        Ok(())
    }

    /// Drops an aggregation's documents and registry entry, leaving
    /// its former members unowned.
    pub(crate) fn remove_aggregation_record(&mut self, id: u64) -> CoreResult<()> {
        let documents = match self.registry.get(id) {
            Some(aggregation) => aggregation.documents(),
            None => return Ok(()),
        };
        self.delete_blob_if_present(documents.metadata_path())?;
        self.delete_blob_if_present(documents.map_path())?;
        let members: Vec<ContentPath> = self
            .index
            .files_in_aggregation(id)
            .into_iter()
            .map(|file| file.path().clone())
            .collect();
        for member in &members {
            self.index.set_aggregation(member, None)?;
        }
        self.registry.remove(id);
        Ok(())
    }

    /// Deletes one file, removing any aggregation it anchors and
    /// updating the one it belonged to.
    ///
    /// An aggregation that cannot exist without its content files is
    /// removed when its last member goes.
    pub(crate) fn delete_file(&mut self, path: &ContentPath) -> CoreResult<()> {
        let owner = self.index.require(path)?.aggregation_id();
        let identity = self.registry.by_file_identity(path).map(Aggregation::id);

        if let Some(id) = identity {
            self.remove_aggregation_record(id)?;
        }
        self.store.delete(&self.key(path.as_str()))?;
        self.index.remove(path)?;

        let mut affected = BTreeSet::new();
        if let Some(owner_id) = owner {
            if Some(owner_id) != identity && self.registry.get(owner_id).is_some() {
                let capabilities = self.registry.require(owner_id)?.kind().capabilities();
                let typed_content =
                    capabilities.folder_identity && !capabilities.allows_member_rename;
                if typed_content && self.index.files_in_aggregation(owner_id).is_empty() {
                    self.remove_aggregation_record(owner_id)?;
                } else {
                    self.mark_dirty(owner_id);
                    affected.insert(owner_id);
                }
            }
        }
        self.flush_ids(&affected)?;
        info!(path = %path, "deleted file");
        Ok(())
    }

    /// Deletes a folder and everything beneath it. Aggregations whose
    /// identities lived under the folder disappear with it.
    pub(crate) fn delete_folder(&mut self, folder: &FolderPath) -> CoreResult<()> {
        if folder.is_root() {
            return Err(CoreError::Validation(
                "cannot delete the content root".to_string(),
            ));
        }
        self.ensure_folder_exists(folder)?;

        let removed_ids = self.registry.ids_under(folder);
        let files: Vec<(ContentPath, Option<u64>)> = self
            .index
            .files_under(folder)
            .into_iter()
            .map(|file| (file.path().clone(), file.aggregation_id()))
            .collect();

        self.store.delete(&self.key(folder.as_str()))?;

        for id in &removed_ids {
            self.registry.remove(*id);
        }
        let removed_files = files.len();
        let mut outside_owners = BTreeSet::new();
        for (path, owner) in files {
            self.index.remove(&path)?;
            if let Some(owner_id) = owner {
                if !removed_ids.contains(&owner_id) && self.registry.get(owner_id).is_some() {
                    outside_owners.insert(owner_id);
                }
            }
        }
        let mut affected = BTreeSet::new();
        for owner_id in outside_owners {
            let capabilities = self.registry.require(owner_id)?.kind().capabilities();
            let typed_content = capabilities.folder_identity && !capabilities.allows_member_rename;
            if typed_content && self.index.files_in_aggregation(owner_id).is_empty() {
                self.remove_aggregation_record(owner_id)?;
            } else {
                self.mark_dirty(owner_id);
                affected.insert(owner_id);
            }
        }
        self.flush_ids(&affected)?;
        info!(folder = %folder, files = removed_files, "deleted folder");
        Ok(())
    }

    /// Archives a folder into a sibling zip file.
    ///
    /// `archive_name` overrides the default name, which is the folder
    /// name. With `delete_original` the folder is removed after the
    /// archive is written, which is refused when any aggregation under
    /// the folder must keep its original content.
    ///
    /// # Returns
    ///
    /// The path of the new archive.
    pub(crate) fn zip_folder(
        &mut self,
        folder: &FolderPath,
        archive_name: Option<&str>,
        delete_original: bool,
    ) -> CoreResult<ContentPath> {
        if folder.is_root() {
            return Err(CoreError::Validation(
                "cannot zip the content root".to_string(),
            ));
        }
        self.ensure_folder_exists(folder)?;

        let base = archive_name.unwrap_or_else(|| folder.name());
        let zip_suffix = format!(".{ZIP_EXTENSION}");
        let file_name = if base.to_ascii_lowercase().ends_with(&zip_suffix) {
            base.to_string()
        } else {
            format!("{base}.{ZIP_EXTENSION}")
        };
        validate_name(&file_name)?;
        self.check_configured_length(&file_name)?;
        let parent = folder.parent().unwrap_or_else(FolderPath::root);
        let target = parent.file(&file_name)?;
        if self.index.contains(&target) || self.store.exists(&self.key(target.as_str()))? {
            return Err(CoreError::Validation(
                "Zip filename already exists. Provide a different name.".to_string(),
            ));
        }
        if delete_original {
            for id in self.registry.ids_under(folder) {
                let kind = self.registry.require(id)?.kind();
                if !kind.capabilities().supports_delete_original_on_zip {
                    return Err(CoreError::Validation(format!(
                        "a {} aggregation cannot be deleted by zipping",
                        kind.display_name()
                    )));
                }
            }
        }
        self.ensure_placeable(&parent)?;

        self.store
            .zipup(&self.key(folder.as_str()), &self.key(target.as_str()))?;

        let mut affected = BTreeSet::new();
        if let Some(id) = self.register_file(target.clone())? {
            affected.insert(id);
        }
        if delete_original {
            self.delete_folder(folder)?;
        }
        self.flush_ids(&affected)?;
        info!(folder = %folder, archive = %target, delete_original, "zipped folder");
        Ok(target)
    }

    fn to_content_relative(&self, store_key: &str) -> CoreResult<ContentPath> {
        let prefix = format!("{}/", content_root(self.resource));
        let relative = store_key.strip_prefix(&prefix).ok_or_else(|| {
            CoreError::Validation(format!("unexpected archive path '{store_key}'"))
        })?;
        ContentPath::parse(relative)
    }

    /// Extracts a zip archive into a folder named after it.
    ///
    /// Extracted metadata documents are parsed and their aggregations
    /// restored; everything else is indexed as content. The archive
    /// itself can be removed afterwards.
    ///
    /// # Returns
    ///
    /// The extracted content files, excluding sidecar documents.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` when the file is not an
    /// archive, the destination folder exists, or an archive entry
    /// carries a name the content tree refuses. In the last case the
    /// partially extracted folder is removed again.
    pub(crate) fn unzip_file(
        &mut self,
        zip_path: &ContentPath,
        remove_zip: bool,
    ) -> CoreResult<Vec<ContentPath>> {
        self.index.require(zip_path)?;
        let is_zip = zip_path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case(ZIP_EXTENSION));
        if !is_zip {
            return Err(CoreError::Validation(format!(
                "file '{zip_path}' is not a zip archive"
            )));
        }
        let parent = zip_path.folder();
        let destination = parent.join(zip_path.stem())?;
        self.check_configured_length(destination.name())?;
        self.ensure_folder_target_free(&destination)?;
        self.ensure_placeable(&parent)?;

        let extracted = self
            .store
            .unzip(&self.key(zip_path.as_str()), &self.key(destination.as_str()))?;

        let mut content_files = Vec::new();
        let mut metadata_documents = Vec::new();
        for store_key in &extracted {
            match self.to_content_relative(store_key) {
                Ok(path) => {
                    let name = path.file_name();
                    if name.ends_with(METADATA_FILE_SUFFIX) {
                        metadata_documents.push(path);
                    } else if name.ends_with(MAP_FILE_SUFFIX) {
                        // Map documents are derived state; the flush
                        // below rewrites them.
                    } else {
                        content_files.push(path);
                    }
                }
                Err(error) => {
                    self.delete_blob_if_present(destination.as_str())?;
                    return Err(CoreError::Validation(format!(
                        "archive contains an invalid name: {error}"
                    )));
                }
            }
        }

        let mut affected = BTreeSet::new();
        for path in &content_files {
            if let Some(id) = self.register_file(path.clone())? {
                affected.insert(id);
            }
        }
        let restored = self.restore_aggregations(&metadata_documents)?;
        for id in restored {
            // Restored documents carry identifiers from the archived
            // location, so rewrite them here.
            self.mark_dirty(id);
            affected.insert(id);
        }
        if remove_zip {
            self.delete_file(zip_path)?;
        }
        self.flush_ids(&affected)?;
        info!(archive = %zip_path, files = content_files.len(), "unzipped archive");
        Ok(content_files)
    }

    /// Rebuilds aggregations from metadata documents found in the
    /// zone, attaching indexed files to them.
    ///
    /// A document that cannot be read, parsed, or matched to content
    /// is logged and skipped so one bad document never blocks the
    /// rest. Folder identities are restored from the shallowest down
    /// and file identities last, leaving each file owned by the most
    /// specific aggregation that claims it.
    pub(crate) fn restore_aggregations(
        &mut self,
        metadata_documents: &[ContentPath],
    ) -> CoreResult<Vec<u64>> {
        let mut folder_targets: Vec<(FolderPath, RestoredAggregation)> = Vec::new();
        let mut file_targets: Vec<(ContentPath, RestoredAggregation)> = Vec::new();

        for document in metadata_documents {
            let bytes = match self.store.get_bytes(&self.key(document.as_str())) {
                Ok(bytes) => bytes,
                Err(error) => {
                    warn!(document = %document, error = %error, "skipping unreadable metadata document");
                    continue;
                }
            };
            let text = match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!(document = %document, "skipping non-UTF-8 metadata document");
                    continue;
                }
            };
            let restored = match xml::parse_metadata_document(&text) {
                Ok(restored) => restored,
                Err(error) => {
                    warn!(document = %document, error = %error, "skipping unparseable metadata document");
                    continue;
                }
            };
            let owner = match classify_metadata_document(document) {
                Some(owner) => owner,
                None => {
                    warn!(document = %document, "skipping misnamed metadata document");
                    continue;
                }
            };
            if restored.kind.uses_folder_identity() {
                match owner {
                    DocumentOwner::Folder(folder) => folder_targets.push((folder, restored)),
                    DocumentOwner::FileStem { .. } => {
                        warn!(document = %document, "folder aggregation document found beside a file");
                    }
                }
            } else {
                let (folder, stem) = match owner {
                    DocumentOwner::FileStem { folder, stem } => (folder, stem),
                    // A file named like its folder produces the folder
                    // document shape; the parsed kind disambiguates.
                    DocumentOwner::Folder(folder) => {
                        let stem = folder.name().to_string();
                        (folder, stem)
                    }
                };
                let file = self
                    .index
                    .list_folder(&folder)
                    .into_iter()
                    .find(|file| file.path().stem() == stem)
                    .map(|file| file.path().clone());
                match file {
                    Some(path) => file_targets.push((path, restored)),
                    None => {
                        warn!(document = %document, "no data file matches metadata document");
                    }
                }
            }
        }

        folder_targets.sort_by_key(|(folder, _)| folder.depth());

        let mut created = Vec::new();
        for (folder, restored) in folder_targets {
            let kind = restored.kind;
            let identity = AggregationIdentity::Folder(folder.clone());
            let id = match self
                .registry
                .create(kind, identity, metadata_from_restored(restored))
            {
                Ok(id) => id,
                Err(error) => {
                    warn!(identity = %folder, error = %error, "skipping aggregation restore");
                    continue;
                }
            };
            let members: Vec<ContentPath> = self
                .index
                .files_under(&folder)
                .into_iter()
                .map(|file| file.path().clone())
                .collect();
            for member in &members {
                self.index.set_aggregation(member, Some(id))?;
            }
            created.push(id);
        }
        for (path, restored) in file_targets {
            let kind = restored.kind;
            let identity = AggregationIdentity::File(path.clone());
            let id = match self
                .registry
                .create(kind, identity, metadata_from_restored(restored))
            {
                Ok(id) => id,
                Err(error) => {
                    warn!(identity = %path, error = %error, "skipping aggregation restore");
                    continue;
                }
            };
            self.index.set_aggregation(&path, Some(id))?;
            created.push(id);
        }
        debug!(count = created.len(), "restored aggregations from documents");
        Ok(created)
    }

    /// Creates an aggregation from one file.
    ///
    /// File-identity kinds anchor to the file itself. Folder-identity
    /// kinds claim the file's folder when nothing else lives there, or
    /// otherwise make a sibling folder named after the file's stem and
    /// move the file inside.
    ///
    /// # Returns
    ///
    /// The id of the new aggregation.
    pub(crate) fn aggregate_file(
        &mut self,
        kind: AggregationKind,
        path: &ContentPath,
    ) -> CoreResult<u64> {
        let owner = self.index.require(path)?.aggregation_id();
        if self.registry.by_file_identity(path).is_some() {
            return Err(CoreError::Validation(format!(
                "file '{path}' already anchors an aggregation"
            )));
        }
        if let Some(owner_id) = owner {
            let owner_kind = self.registry.require(owner_id)?.kind();
            if !owner_kind.capabilities().auto_attaches {
                return Err(CoreError::Validation(format!(
                    "file '{path}' already belongs to a {} aggregation",
                    owner_kind.display_name()
                )));
            }
        }
        match kind {
            AggregationKind::TimeSeries => {
                let is_sqlite = path
                    .extension()
                    .is_some_and(|extension| extension.eq_ignore_ascii_case("sqlite"));
                if !is_sqlite {
                    return Err(CoreError::Validation(
                        "a Time Series aggregation requires a SQLite data file".to_string(),
                    ));
                }
            }
            AggregationKind::RefTimeSeries => {
                if !path.file_name().to_ascii_lowercase().ends_with(".refts.json") {
                    return Err(CoreError::Validation(
                        "a Referenced Time Series aggregation requires a .refts.json file"
                            .to_string(),
                    ));
                }
            }
            _ => {}
        }

        let mut affected = BTreeSet::new();
        let id = if kind.uses_folder_identity() {
            self.promote_file_to_folder_aggregation(kind, path, owner, &mut affected)?
        } else {
            let id = self.registry.create(
                kind,
                AggregationIdentity::File(path.clone()),
                AggregationMetadata::new(kind),
            )?;
            if let Some(owner_id) = owner {
                self.mark_dirty(owner_id);
                affected.insert(owner_id);
            }
            self.index.set_aggregation(path, Some(id))?;
            id
        };
        affected.insert(id);
        self.flush_ids(&affected)?;
        info!(id, kind = %kind, path = %path, "created aggregation");
        Ok(id)
    }

    fn folder_files_promotable(&self, folder: &FolderPath) -> CoreResult<bool> {
        for file in self.index.files_under(folder) {
            if let Some(owner_id) = file.aggregation_id() {
                let owner_kind = self.registry.require(owner_id)?.kind();
                if !owner_kind.capabilities().auto_attaches {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn promote_file_to_folder_aggregation(
        &mut self,
        kind: AggregationKind,
        path: &ContentPath,
        owner: Option<u64>,
        affected: &mut BTreeSet<u64>,
    ) -> CoreResult<u64> {
        let folder = path.folder();
        let can_promote = !folder.is_root()
            && self.registry.ids_under(&folder).is_empty()
            && self.folder_files_promotable(&folder)?;

        if can_promote {
            let members: Vec<(ContentPath, Option<u64>)> = self
                .index
                .files_under(&folder)
                .into_iter()
                .map(|file| (file.path().clone(), file.aggregation_id()))
                .collect();
            let id = self.registry.create(
                kind,
                AggregationIdentity::Folder(folder),
                AggregationMetadata::new(kind),
            )?;
            for (member, previous) in members {
                if let Some(previous_id) = previous {
                    if previous_id != id {
                        self.mark_dirty(previous_id);
                        affected.insert(previous_id);
                    }
                }
                self.index.set_aggregation(&member, Some(id))?;
            }
            return Ok(id);
        }

        let candidate = folder.join(path.stem())?;
        if self.store.exists(&self.key(candidate.as_str()))?
            || self
                .index
                .contains(&ContentPath::from_validated(candidate.as_str().to_string()))
            || self.registry.by_folder_identity(&candidate).is_some()
        {
            return Err(CoreError::Validation(format!(
                "'{candidate}' already exists"
            )));
        }
        self.store.create_folder(&self.key(candidate.as_str()))?;
        let target = candidate.file(path.file_name())?;
        self.store
            .move_object(&self.key(path.as_str()), &self.key(target.as_str()))?;
        self.index.rewrite_path(path, target.clone())?;
        if let Some(owner_id) = owner {
            self.mark_dirty(owner_id);
            affected.insert(owner_id);
        }
        let id = self.registry.create(
            kind,
            AggregationIdentity::Folder(candidate),
            AggregationMetadata::new(kind),
        )?;
        self.index.set_aggregation(&target, Some(id))?;
        Ok(id)
    }

    /// Creates a folder-identity aggregation over an existing folder.
    ///
    /// Kinds that absorb loose content may contain other aggregations,
    /// whose files keep their owners. Typed content kinds require the
    /// folder to hold nothing but plain files.
    ///
    /// # Returns
    ///
    /// The id of the new aggregation.
    pub(crate) fn aggregate_folder(
        &mut self,
        kind: AggregationKind,
        folder: &FolderPath,
    ) -> CoreResult<u64> {
        if !kind.uses_folder_identity() {
            return Err(CoreError::Validation(format!(
                "a {} aggregation cannot be created from a folder",
                kind.display_name()
            )));
        }
        if folder.is_root() {
            return Err(CoreError::Validation(
                "the content root cannot be aggregated".to_string(),
            ));
        }
        self.ensure_folder_exists(folder)?;
        let parent = folder.parent().unwrap_or_else(FolderPath::root);
        if let Some(id) = self.nearest_folder_aggregation(&parent) {
            let enclosing_kind = self.registry.require(id)?.kind();
            if !enclosing_kind.capabilities().accepts_loose_files {
                return Err(CoreError::Validation(format!(
                    "cannot create an aggregation inside a {} aggregation",
                    enclosing_kind.display_name()
                )));
            }
        }
        let files: Vec<(ContentPath, Option<u64>)> = self
            .index
            .files_under(folder)
            .into_iter()
            .map(|file| (file.path().clone(), file.aggregation_id()))
            .collect();
        if files.is_empty() {
            return Err(CoreError::Validation(format!(
                "folder '{folder}' has no files to aggregate"
            )));
        }
        if !kind.capabilities().auto_attaches && !self.registry.ids_under(folder).is_empty() {
            return Err(CoreError::Validation(format!(
                "folder '{folder}' already contains aggregations"
            )));
        }

        let id = self.registry.create(
            kind,
            AggregationIdentity::Folder(folder.clone()),
            AggregationMetadata::new(kind),
        )?;
        let mut affected = BTreeSet::new();
        for (path, previous) in files {
            if self.registry.by_file_identity(&path).is_some() {
                continue;
            }
            if self.nearest_folder_aggregation(&path.folder()) != Some(id) {
                continue;
            }
            if let Some(previous_id) = previous {
                if previous_id == id {
                    continue;
                }
                self.mark_dirty(previous_id);
                affected.insert(previous_id);
            }
            self.index.set_aggregation(&path, Some(id))?;
        }
        affected.insert(id);
        self.flush_ids(&affected)?;
        info!(id, kind = %kind, folder = %folder, "created aggregation");
        Ok(id)
    }

    /// Dissolves an aggregation, keeping its content files.
    ///
    /// Former members fall back to the nearest enclosing aggregation
    /// that attaches content automatically.
    pub(crate) fn remove_aggregation(&mut self, id: u64) -> CoreResult<()> {
        self.registry.require(id)?;
        let members: Vec<ContentPath> = self
            .index
            .files_in_aggregation(id)
            .into_iter()
            .map(|file| file.path().clone())
            .collect();
        self.remove_aggregation_record(id)?;

        let mut affected = BTreeSet::new();
        for member in members {
            if let Some(enclosing) = self
                .registry
                .fileset_containing(&member.folder())
                .map(Aggregation::id)
            {
                self.index.set_aggregation(&member, Some(enclosing))?;
                self.mark_dirty(enclosing);
                affected.insert(enclosing);
            }
        }
        self.flush_ids(&affected)?;
        info!(id, "removed aggregation");
        Ok(())
    }

    /// Applies pending time series edits to the data file.
    ///
    /// The patcher receives the current bytes and the pending change
    /// list; the pending list is cleared only after the patched bytes
    /// are stored and the index reflects them.
    ///
    /// # Returns
    ///
    /// True when the data file was patched, false when nothing was
    /// pending.
    pub(crate) fn sync_time_series(
        &mut self,
        path: &ContentPath,
        patcher: &dyn DataFilePatcher,
    ) -> CoreResult<bool> {
        let id = match self.registry.by_file_identity(path) {
            Some(aggregation) if aggregation.kind() == AggregationKind::TimeSeries => {
                aggregation.id()
            }
            _ => {
                return Err(CoreError::Validation(format!(
                    "file '{path}' does not anchor a time series aggregation"
                )));
            }
        };
        let changes: Vec<DataFileChange> = match self
            .registry
            .require(id)?
            .metadata()
            .time_series()
        {
            Some(series) => series.pending_changes().to_vec(),
            None => Vec::new(),
        };
        if changes.is_empty() {
            return Ok(false);
        }

        let key = self.key(path.as_str());
        let bytes = self.store.get_bytes(&key)?;
        let patched = patcher.apply(bytes, &changes)?;
        self.store.put_bytes(&key, &patched)?;
        let size = self.store.size(&key)?;
        let checksum = self.store.checksum(&key)?;
        self.index.update_content(path, size, checksum)?;
        if let Some(series) = self
            .registry
            .get_mut(id)
            .and_then(|aggregation| aggregation.metadata_mut().time_series_mut())
        {
            series.clear_pending();
        }
        info!(path = %path, changes = changes.len(), "synchronised time series data file");
        Ok(true)
    }
}

/// Builds in-memory metadata from a parsed document. The result is
/// clean and stamped with the document's modification time.
fn metadata_from_restored(restored: RestoredAggregation) -> AggregationMetadata {
    let mut metadata = AggregationMetadata::new(restored.kind);
    metadata.set_title(restored.title);
    for keyword in restored.keywords {
        metadata.add_keyword(keyword);
    }
    metadata.set_spatial_coverage(restored.spatial);
    metadata.set_temporal_coverage(restored.temporal);
    for (key, value) in restored.extra {
        metadata.set_extra_value(key, value);
    }
    if let Some(series) = restored.time_series {
        metadata.restore_time_series(series);
    }
    if let Some(modified) = restored.modified {
        metadata.set_modified_on(modified);
    }
    metadata.mark_clean();
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdr_files::LocalBlobStore;
    use cdr_types::NonEmptyText;
    use tempfile::TempDir;

    use crate::aggregations::Site;

    struct Fixture {
        _zone: TempDir,
        resource: ResourceId,
        index: FileIndex,
        registry: AggregationRegistry,
        store: LocalBlobStore,
        config: CoreConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let zone = TempDir::new().unwrap();
            let store = LocalBlobStore::new(zone.path()).unwrap();
            let resource = ResourceId::generate();
            store.create_folder(&content_root(&resource)).unwrap();
            Self {
                _zone: zone,
                resource,
                index: FileIndex::new(),
                registry: AggregationRegistry::new(),
                store,
                config: CoreConfig::default(),
            }
        }

        fn ctx(&mut self) -> EngineCtx<'_> {
            EngineCtx {
                resource: &self.resource,
                index: &mut self.index,
                registry: &mut self.registry,
                store: &self.store,
                config: &self.config,
            }
        }

        /// Writes a blob and indexes it.
        fn put(&mut self, path: &str) -> ContentPath {
            let parsed = ContentPath::parse(path).unwrap();
            self.store
                .put_bytes(&content_key(&self.resource, path), b"payload")
                .unwrap();
            self.ctx().register_file(parsed.clone()).unwrap();
            parsed
        }

        fn blob_exists(&self, path: &str) -> bool {
            self.store
                .exists(&content_key(&self.resource, path))
                .unwrap()
        }

        fn owner_of(&self, path: &str) -> Option<u64> {
            self.index
                .get(&ContentPath::parse(path).unwrap())
                .and_then(ResourceFile::aggregation_id)
        }
    }

    fn folder(path: &str) -> FolderPath {
        FolderPath::parse(path).unwrap()
    }

    fn path(raw: &str) -> ContentPath {
        ContentPath::parse(raw).unwrap()
    }

    fn text(value: &str) -> NonEmptyText {
        NonEmptyText::new(value).unwrap()
    }

    #[test]
    fn test_register_file_attaches_inside_file_set() {
        let mut fixture = Fixture::new();
        fixture.ctx().create_folder(&folder("pack")).unwrap();
        fixture.put("pack/a.txt");
        let id = fixture
            .ctx()
            .aggregate_folder(AggregationKind::FileSet, &folder("pack"))
            .unwrap();

        fixture.put("pack/b.txt");

        assert_eq!(fixture.owner_of("pack/b.txt"), Some(id));
        assert!(fixture.blob_exists("pack/pack_meta.xml"));
        assert!(fixture.blob_exists("pack/pack_resmap.xml"));
    }

    #[test]
    fn test_move_file_updates_index_and_store() {
        let mut fixture = Fixture::new();
        fixture.ctx().create_folder(&folder("docs")).unwrap();
        let readme = fixture.put("readme.md");

        fixture.ctx().move_file(&readme, &path("docs/readme.md")).unwrap();

        assert!(!fixture.blob_exists("readme.md"));
        assert!(fixture.blob_exists("docs/readme.md"));
        assert!(!fixture.index.contains(&readme));
        assert!(fixture.index.contains(&path("docs/readme.md")));
        assert!(matches!(
            fixture.ctx().move_file(&readme, &path("elsewhere.md")),
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            fixture
                .ctx()
                .move_file(&path("docs/readme.md"), &path("missing/readme.md")),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_move_file_rejects_reserved_names() {
        let mut fixture = Fixture::new();
        let notes = fixture.put("notes.txt");

        assert!(matches!(
            fixture.ctx().move_file(&notes, &path("notes_meta.xml")),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_rename_blocked_for_raster_member() {
        let mut fixture = Fixture::new();
        fixture.ctx().create_folder(&folder("raster")).unwrap();
        let cell = fixture.put("raster/logan.tif");
        fixture
            .ctx()
            .aggregate_folder(AggregationKind::GeoRaster, &folder("raster"))
            .unwrap();

        let result = fixture.ctx().move_file(&cell, &path("raster/renamed.tif"));

        match result {
            Err(CoreError::Validation(message)) => {
                assert!(message.contains("cannot be renamed or moved"));
            }
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_file_identity_rename_carries_documents() {
        let mut fixture = Fixture::new();
        let notes = fixture.put("notes.txt");
        let id = fixture
            .ctx()
            .aggregate_file(AggregationKind::Generic, &notes)
            .unwrap();
        assert!(fixture.blob_exists("notes_meta.xml"));

        fixture
            .ctx()
            .move_file(&notes, &path("field_notes.txt"))
            .unwrap();

        assert!(fixture.blob_exists("field_notes_meta.xml"));
        assert!(fixture.blob_exists("field_notes_resmap.xml"));
        assert!(!fixture.blob_exists("notes_meta.xml"));
        assert!(!fixture.blob_exists("notes_resmap.xml"));
        let aggregation = fixture
            .registry
            .by_file_identity(&path("field_notes.txt"))
            .expect("identity follows the file");
        assert_eq!(aggregation.id(), id);
    }

    #[test]
    fn test_move_file_between_file_sets_switches_owner() {
        let mut fixture = Fixture::new();
        fixture.ctx().create_folder(&folder("a")).unwrap();
        fixture.ctx().create_folder(&folder("b")).unwrap();
        let moving = fixture.put("a/x.txt");
        fixture.put("b/y.txt");
        let set_a = fixture
            .ctx()
            .aggregate_folder(AggregationKind::FileSet, &folder("a"))
            .unwrap();
        let set_b = fixture
            .ctx()
            .aggregate_folder(AggregationKind::FileSet, &folder("b"))
            .unwrap();
        assert_eq!(fixture.owner_of("a/x.txt"), Some(set_a));

        fixture.ctx().move_file(&moving, &path("b/x.txt")).unwrap();

        assert_eq!(fixture.owner_of("b/x.txt"), Some(set_b));
        assert!(fixture.index.files_in_aggregation(set_a).is_empty());
    }

    #[test]
    fn test_move_file_out_of_file_set_detaches() {
        let mut fixture = Fixture::new();
        fixture.ctx().create_folder(&folder("pack")).unwrap();
        let member = fixture.put("pack/a.txt");
        fixture
            .ctx()
            .aggregate_folder(AggregationKind::FileSet, &folder("pack"))
            .unwrap();

        fixture.ctx().move_file(&member, &path("a.txt")).unwrap();

        assert_eq!(fixture.owner_of("a.txt"), None);
    }

    #[test]
    fn test_move_folder_rebases_identities_and_documents() {
        let mut fixture = Fixture::new();
        fixture.ctx().create_folder(&folder("raster")).unwrap();
        fixture.put("raster/logan.tif");
        let id = fixture
            .ctx()
            .aggregate_folder(AggregationKind::GeoRaster, &folder("raster"))
            .unwrap();
        assert!(fixture.blob_exists("raster/raster_meta.xml"));

        fixture
            .ctx()
            .move_folder(&folder("raster"), &folder("raster_1"))
            .unwrap();

        let aggregation = fixture.registry.require(id).unwrap();
        assert_eq!(aggregation.identity().path_str(), "raster_1");
        assert!(fixture.index.contains(&path("raster_1/logan.tif")));
        assert!(!fixture.index.contains(&path("raster/logan.tif")));
        assert_eq!(fixture.owner_of("raster_1/logan.tif"), Some(id));
        assert!(fixture.blob_exists("raster_1/raster_1_meta.xml"));
        assert!(fixture.blob_exists("raster_1/raster_1_resmap.xml"));
        assert!(!fixture.blob_exists("raster_1/raster_meta.xml"));
        assert!(!fixture.blob_exists("raster/raster_meta.xml"));
    }

    #[test]
    fn test_move_folder_into_itself_is_rejected() {
        let mut fixture = Fixture::new();
        fixture.ctx().create_folder(&folder("a")).unwrap();

        assert!(matches!(
            fixture.ctx().move_folder(&folder("a"), &folder("a/b")),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_delete_file_drops_its_aggregation() {
        let mut fixture = Fixture::new();
        let notes = fixture.put("notes.txt");
        fixture
            .ctx()
            .aggregate_file(AggregationKind::Generic, &notes)
            .unwrap();

        fixture.ctx().delete_file(&notes).unwrap();

        assert!(fixture.registry.is_empty());
        assert!(fixture.index.is_empty());
        assert!(!fixture.blob_exists("notes.txt"));
        assert!(!fixture.blob_exists("notes_meta.xml"));
        assert!(!fixture.blob_exists("notes_resmap.xml"));
    }

    #[test]
    fn test_delete_last_member_drops_typed_aggregation() {
        let mut fixture = Fixture::new();
        fixture.ctx().create_folder(&folder("raster")).unwrap();
        let cell = fixture.put("raster/logan.tif");
        let id = fixture
            .ctx()
            .aggregate_folder(AggregationKind::GeoRaster, &folder("raster"))
            .unwrap();

        fixture.ctx().delete_file(&cell).unwrap();

        assert!(fixture.registry.is_empty());
        assert!(!fixture.blob_exists("raster/raster_meta.xml"));
        assert!(fixture.blob_exists("raster"));

        // A second cleanup of the same aggregation finds nothing to do.
        fixture.ctx().remove_aggregation_record(id).unwrap();
        assert!(fixture.registry.is_empty());
    }

    #[test]
    fn test_delete_folder_cascades_to_nested_aggregations() {
        let mut fixture = Fixture::new();
        fixture.ctx().create_folder(&folder("zone")).unwrap();
        fixture.ctx().create_folder(&folder("zone/raster")).unwrap();
        fixture.put("zone/raster/cell.tif");
        fixture.put("zone/free.txt");
        let id = fixture
            .ctx()
            .aggregate_folder(AggregationKind::GeoRaster, &folder("zone/raster"))
            .unwrap();

        fixture.ctx().delete_folder(&folder("zone")).unwrap();

        assert!(fixture.registry.get(id).is_none());
        assert!(fixture.index.is_empty());
        assert!(!fixture.blob_exists("zone"));
    }

    #[test]
    fn test_zip_collision_message() {
        let mut fixture = Fixture::new();
        fixture.ctx().create_folder(&folder("field")).unwrap();
        fixture.put("field/notes.txt");
        let archive = fixture.ctx().zip_folder(&folder("field"), None, false).unwrap();
        assert_eq!(archive.as_str(), "field.zip");

        match fixture.ctx().zip_folder(&folder("field"), None, false) {
            Err(CoreError::Validation(message)) => {
                assert_eq!(message, "Zip filename already exists. Provide a different name.");
            }
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_zip_delete_original_blocked_for_time_series() {
        let mut fixture = Fixture::new();
        fixture.ctx().create_folder(&folder("sensors")).unwrap();
        let data = fixture.put("sensors/logan.sqlite");
        fixture
            .ctx()
            .aggregate_file(AggregationKind::TimeSeries, &data)
            .unwrap();

        let refused = fixture.ctx().zip_folder(&folder("sensors"), None, true);
        assert!(matches!(refused, Err(CoreError::Validation(_))));
        assert!(!fixture.blob_exists("sensors.zip"));

        let archive = fixture.ctx().zip_folder(&folder("sensors"), None, false).unwrap();
        assert_eq!(archive.as_str(), "sensors.zip");
        assert!(fixture.blob_exists("sensors"));
    }

    #[test]
    fn test_unzip_restores_aggregations() {
        let mut fixture = Fixture::new();
        fixture.ctx().create_folder(&folder("field")).unwrap();
        let notes = fixture.put("field/notes.txt");
        let id = fixture
            .ctx()
            .aggregate_file(AggregationKind::Generic, &notes)
            .unwrap();
        {
            let aggregation = fixture.registry.get_mut(id).unwrap();
            aggregation
                .metadata_mut()
                .set_title(Some(text("Field notes")));
        }
        fixture.ctx().flush_all(false).unwrap();

        let archive = fixture
            .ctx()
            .zip_folder(&folder("field"), Some("bundle"), false)
            .unwrap();
        let extracted = fixture.ctx().unzip_file(&archive, true).unwrap();

        assert_eq!(extracted, vec![path("bundle/notes.txt")]);
        assert!(!fixture.index.contains(&archive));
        assert!(!fixture.blob_exists("bundle.zip"));
        let restored = fixture
            .registry
            .by_file_identity(&path("bundle/notes.txt"))
            .expect("aggregation restored from documents");
        assert_eq!(restored.kind(), AggregationKind::Generic);
        assert_eq!(restored.metadata().title().unwrap().as_str(), "Field notes");
        assert!(fixture.blob_exists("bundle/notes_meta.xml"));
    }

    #[test]
    fn test_unzip_rejects_existing_destination() {
        let mut fixture = Fixture::new();
        fixture.ctx().create_folder(&folder("field")).unwrap();
        fixture.put("field/notes.txt");
        let archive = fixture.ctx().zip_folder(&folder("field"), None, false).unwrap();

        assert!(matches!(
            fixture.ctx().unzip_file(&archive, false),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_aggregate_file_promotes_enclosing_folder() {
        let mut fixture = Fixture::new();
        fixture.ctx().create_folder(&folder("geo")).unwrap();
        let cell = fixture.put("geo/cell.tif");
        fixture.put("geo/cell.prj");

        let id = fixture
            .ctx()
            .aggregate_file(AggregationKind::GeoRaster, &cell)
            .unwrap();

        let aggregation = fixture.registry.require(id).unwrap();
        assert_eq!(aggregation.identity().path_str(), "geo");
        assert_eq!(fixture.owner_of("geo/cell.tif"), Some(id));
        assert_eq!(fixture.owner_of("geo/cell.prj"), Some(id));
        assert!(fixture.blob_exists("geo/geo_meta.xml"));
    }

    #[test]
    fn test_aggregate_file_builds_sibling_folder_at_root() {
        let mut fixture = Fixture::new();
        let cell = fixture.put("logan.tif");

        let id = fixture
            .ctx()
            .aggregate_file(AggregationKind::GeoRaster, &cell)
            .unwrap();

        let aggregation = fixture.registry.require(id).unwrap();
        assert_eq!(aggregation.identity().path_str(), "logan");
        assert!(!fixture.index.contains(&cell));
        assert!(!fixture.blob_exists("logan.tif"));
        assert!(fixture.blob_exists("logan/logan.tif"));
        assert_eq!(fixture.owner_of("logan/logan.tif"), Some(id));
        assert!(fixture.blob_exists("logan/logan_meta.xml"));
    }

    #[test]
    fn test_aggregate_file_requires_matching_data_file() {
        let mut fixture = Fixture::new();
        let wrong = fixture.put("observations.csv");

        assert!(matches!(
            fixture
                .ctx()
                .aggregate_file(AggregationKind::TimeSeries, &wrong),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            fixture
                .ctx()
                .aggregate_file(AggregationKind::RefTimeSeries, &wrong),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_aggregate_folder_requires_files() {
        let mut fixture = Fixture::new();
        fixture.ctx().create_folder(&folder("empty")).unwrap();

        match fixture
            .ctx()
            .aggregate_folder(AggregationKind::FileSet, &folder("empty"))
        {
            Err(CoreError::Validation(message)) => {
                assert!(message.contains("no files to aggregate"));
            }
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_remove_aggregation_reattaches_members() {
        let mut fixture = Fixture::new();
        fixture.ctx().create_folder(&folder("pack")).unwrap();
        fixture.put("pack/a.txt");
        let set_id = fixture
            .ctx()
            .aggregate_folder(AggregationKind::FileSet, &folder("pack"))
            .unwrap();
        fixture.ctx().create_folder(&folder("pack/r")).unwrap();
        fixture.put("pack/r/cell.tif");
        let raster_id = fixture
            .ctx()
            .aggregate_folder(AggregationKind::GeoRaster, &folder("pack/r"))
            .unwrap();
        assert_eq!(fixture.owner_of("pack/r/cell.tif"), Some(raster_id));

        fixture.ctx().remove_aggregation(raster_id).unwrap();

        assert!(fixture.registry.get(raster_id).is_none());
        assert_eq!(fixture.owner_of("pack/r/cell.tif"), Some(set_id));
        assert!(!fixture.blob_exists("pack/r/r_meta.xml"));
    }

    #[test]
    fn test_sync_time_series_two_phase() {
        struct CountingPatcher;

        impl DataFilePatcher for CountingPatcher {
            fn apply(
                &self,
                mut bytes: Vec<u8>,
                changes: &[DataFileChange],
            ) -> CoreResult<Vec<u8>> {
                bytes.extend_from_slice(format!("+{}", changes.len()).as_bytes());
                Ok(bytes)
            }
        }

        let mut fixture = Fixture::new();
        let data = fixture.put("observations.sqlite");
        let id = fixture
            .ctx()
            .aggregate_file(AggregationKind::TimeSeries, &data)
            .unwrap();
        {
            let aggregation = fixture.registry.get_mut(id).unwrap();
            let series = aggregation.metadata_mut().time_series_mut().unwrap();
            series
                .add_site(Site::new(text("USU-LBR-Mendon"), text("Little Bear River")))
                .unwrap();
        }

        let synced = fixture.ctx().sync_time_series(&data, &CountingPatcher).unwrap();
        assert!(synced);
        let bytes = fixture
            .store
            .get_bytes(&content_key(&fixture.resource, "observations.sqlite"))
            .unwrap();
        assert_eq!(bytes, b"payload+1");
        let series = fixture
            .registry
            .require(id)
            .unwrap()
            .metadata()
            .time_series()
            .unwrap();
        assert!(!series.has_pending_changes());

        let again = fixture.ctx().sync_time_series(&data, &CountingPatcher).unwrap();
        assert!(!again);
    }

    #[test]
    fn test_rename_blocked_for_time_series_data_file() {
        let mut fixture = Fixture::new();
        let data = fixture.put("observations.sqlite");
        fixture
            .ctx()
            .aggregate_file(AggregationKind::TimeSeries, &data)
            .unwrap();

        match fixture.ctx().move_file(&data, &path("renamed.sqlite")) {
            Err(CoreError::Validation(message)) => {
                assert!(message.contains("cannot be renamed or moved"));
            }
            other => panic!("expected a validation error, got {other:?}"),
        }
        assert!(fixture.index.contains(&data));
        assert!(fixture.blob_exists("observations.sqlite"));
        assert!(!fixture.blob_exists("renamed.sqlite"));
    }

    #[test]
    fn test_ingest_rejects_duplicates_and_reserved_names() {
        let mut fixture = Fixture::new();
        fixture
            .ctx()
            .ingest_file(&path("notes.txt"), b"first")
            .unwrap();

        assert!(matches!(
            fixture.ctx().ingest_file(&path("notes.txt"), b"second"),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            fixture.ctx().ingest_file(&path("notes_meta.xml"), b"doc"),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            fixture.ctx().ingest_file(&path("nowhere/a.txt"), b"lost"),
            Err(CoreError::NotFound(_))
        ));

        let bytes = fixture
            .store
            .get_bytes(&content_key(&fixture.resource, "notes.txt"))
            .unwrap();
        assert_eq!(bytes, b"first");
    }

    #[test]
    fn test_ingest_into_file_set_flushes_the_owner() {
        let mut fixture = Fixture::new();
        fixture.ctx().create_folder(&folder("pack")).unwrap();
        fixture.put("pack/seed.txt");
        let id = fixture
            .ctx()
            .aggregate_folder(AggregationKind::FileSet, &folder("pack"))
            .unwrap();

        let owner = fixture
            .ctx()
            .ingest_file(&path("pack/late.txt"), b"payload")
            .unwrap();

        assert_eq!(owner, Some(id));
        assert_eq!(fixture.owner_of("pack/late.txt"), Some(id));
        assert!(!fixture.registry.require(id).unwrap().metadata().is_dirty());
    }
}

//! The resource facade.
//!
//! [`CompositeResource`] ties one resource's file index, aggregation
//! registry, and storage zone together behind a single API. Every
//! mutating call names the [`Principal`] acting, and the facade checks
//! edit rights and publication state before any state changes.
//!
//! Paths cross this boundary as strings. A string naming an indexed
//! file resolves as a file; otherwise it resolves as a folder when the
//! zone has one. Aggregations are addressed by their identity path or
//! by the path of any member file.

use std::sync::Arc;

use tracing::{debug, info, warn};

use cdr_files::BlobStore;
use cdr_types::NonEmptyText;
use cdr_uuid::ResourceId;

use crate::aggregations::{
    Aggregation, AggregationKind, AggregationMetadata, AggregationRegistry, Capabilities,
    DataFilePatcher, SpatialCoverage, TemporalCoverage, TimeSeriesMetadata,
};
use crate::classify::{AggregationClassifier, ExtensionClassifier};
use crate::config::CoreConfig;
use crate::constants::METADATA_FILE_SUFFIX;
use crate::coordinator::EngineCtx;
use crate::error::{CoreError, CoreResult};
use crate::index::{FileIndex, ResourceFile};
use crate::paths::{content_key, is_document_path, ContentPath, FolderPath};
use crate::reconcile::ReconcileReport;

/// Someone acting on a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    name: String,
    can_edit: bool,
}

impl Principal {
    /// Builds a principal with the given edit rights.
    pub fn new(name: impl Into<String>, can_edit: bool) -> Self {
        Self {
            name: name.into(),
            can_edit,
        }
    }

    /// A principal allowed to modify the resource.
    pub fn editor(name: impl Into<String>) -> Self {
        Self::new(name, true)
    }

    /// A principal limited to reading.
    pub fn viewer(name: impl Into<String>) -> Self {
        Self::new(name, false)
    }

    /// The principal's display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the principal may modify resources.
    #[must_use]
    pub fn can_edit(&self) -> bool {
        self.can_edit
    }
}

/// One composite resource and its content.
///
/// The facade owns the in-memory state and a handle to the storage
/// zone. Operations go through [`EngineCtx`] so that index, registry,
/// and zone stay consistent; this type adds authorisation, string
/// path resolution, and the ingest classifier on top.
pub struct CompositeResource {
    id: ResourceId,
    index: FileIndex,
    registry: AggregationRegistry,
    store: Arc<dyn BlobStore>,
    config: CoreConfig,
    classifier: Box<dyn AggregationClassifier>,
    published: bool,
    spatial: Option<SpatialCoverage>,
    temporal: Option<TemporalCoverage>,
}

impl CompositeResource {
    /// Initialises a fresh resource and creates its content root in
    /// the zone.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Transport` when the zone already holds this
    /// resource or cannot be written.
    pub fn create(
        id: ResourceId,
        store: Arc<dyn BlobStore>,
        config: CoreConfig,
    ) -> CoreResult<Self> {
        store.create_folder(&content_key(&id, ""))?;
        info!(resource = %id, "created resource");
        Ok(Self::empty(id, store, config))
    }

    /// Loads an existing resource by scanning its zone.
    ///
    /// Content files are indexed first, then aggregations are restored
    /// from the metadata documents found alongside them. Loading never
    /// writes to the zone; restored metadata starts clean.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Transport` when the content root cannot be
    /// listed.
    pub fn open(
        id: ResourceId,
        store: Arc<dyn BlobStore>,
        config: CoreConfig,
    ) -> CoreResult<Self> {
        let mut resource = Self::empty(id, store, config);
        resource.load()?;
        debug!(
            resource = %resource.id,
            files = resource.index.len(),
            aggregations = resource.registry.len(),
            "opened resource"
        );
        Ok(resource)
    }

    /// Replaces the ingest classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Box<dyn AggregationClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    fn empty(id: ResourceId, store: Arc<dyn BlobStore>, config: CoreConfig) -> Self {
        Self {
            id,
            index: FileIndex::new(),
            registry: AggregationRegistry::new(),
            store,
            config,
            classifier: Box::new(ExtensionClassifier),
            published: false,
            spatial: None,
            temporal: None,
        }
    }

    fn load(&mut self) -> CoreResult<()> {
        let mut ctx = self.ctx();
        let mut zone_files = Vec::new();
        ctx.collect_zone_files(&FolderPath::root(), &mut zone_files)?;

        let mut documents = Vec::new();
        for path in zone_files {
            if is_document_path(&path) {
                if path.file_name().ends_with(METADATA_FILE_SUFFIX) {
                    documents.push(path);
                }
                continue;
            }
            ctx.register_file(path)?;
        }
        ctx.restore_aggregations(&documents)?;
        Ok(())
    }

    fn ctx(&mut self) -> EngineCtx<'_> {
        EngineCtx {
            resource: &self.id,
            index: &mut self.index,
            registry: &mut self.registry,
            store: self.store.as_ref(),
            config: &self.config,
        }
    }

    fn ensure_can_edit(&self, principal: &Principal) -> CoreResult<()> {
        if !principal.can_edit() {
            return Err(CoreError::Unauthorised(format!(
                "{} may not edit this resource",
                principal.name()
            )));
        }
        Ok(())
    }

    fn ensure_editable(&self, principal: &Principal) -> CoreResult<()> {
        self.ensure_can_edit(principal)?;
        if self.published {
            return Err(CoreError::Validation(format!(
                "resource {} is published and cannot be modified",
                self.id
            )));
        }
        Ok(())
    }

    fn resolve_file(&self, raw: &str) -> Option<ContentPath> {
        let path = ContentPath::parse(raw).ok()?;
        self.index.contains(&path).then_some(path)
    }

    fn resolve_folder(&self, raw: &str) -> CoreResult<Option<FolderPath>> {
        let folder = match FolderPath::parse(raw) {
            Ok(folder) => folder,
            Err(_) => return Ok(None),
        };
        if folder.is_root() || self.store.exists(&content_key(&self.id, folder.as_str()))? {
            return Ok(Some(folder));
        }
        Ok(None)
    }

    /// The resource identifier.
    #[must_use]
    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    /// The configuration this resource was opened with.
    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Whether the resource has been published.
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.published
    }

    /// Marks the resource as published or withdraws publication.
    /// Published resources refuse every content and metadata edit.
    pub fn set_published(&mut self, principal: &Principal, published: bool) -> CoreResult<()> {
        self.ensure_can_edit(principal)?;
        self.published = published;
        Ok(())
    }

    /// Looks up one indexed file.
    pub fn file(&self, path: &str) -> CoreResult<&ResourceFile> {
        let path = ContentPath::parse(path)?;
        self.index.require(&path)
    }

    /// Iterates over all indexed files in path order.
    pub fn files(&self) -> impl Iterator<Item = &ResourceFile> {
        self.index.iter()
    }

    /// Number of indexed files.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.index.len()
    }

    /// The files directly inside `folder`.
    pub fn list_folder(&self, folder: &str) -> CoreResult<Vec<&ResourceFile>> {
        let folder = FolderPath::parse(folder)?;
        Ok(self.index.list_folder(&folder))
    }

    /// Iterates over all aggregations in id order.
    pub fn aggregations(&self) -> impl Iterator<Item = &Aggregation> {
        self.registry.iter()
    }

    /// Number of registered aggregations.
    #[must_use]
    pub fn aggregation_count(&self) -> usize {
        self.registry.len()
    }

    /// The member files of an aggregation.
    #[must_use]
    pub fn aggregation_members(&self, id: u64) -> Vec<&ResourceFile> {
        self.index.files_in_aggregation(id)
    }

    /// Resolves an aggregation from its identity path or the path of
    /// any member file.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when nothing at `target` belongs
    /// to an aggregation.
    pub fn aggregation(&self, target: &str) -> CoreResult<&Aggregation> {
        if let Some(aggregation) = self.registry.find_by_path(target) {
            return Ok(aggregation);
        }
        if let Ok(path) = ContentPath::parse(target) {
            if let Some(id) = self.index.get(&path).and_then(ResourceFile::aggregation_id) {
                return self.registry.require(id);
            }
        }
        Err(CoreError::NotFound(format!(
            "no aggregation at '{target}'"
        )))
    }

    /// Writes new content into the resource.
    ///
    /// When automatic aggregation is enabled the classifier decides
    /// whether the file seeds a typed aggregation; a classification
    /// that cannot be applied leaves the file loose. Returns the path
    /// the file ended up at, which differs from the requested one when
    /// seeding moved it into a new aggregation folder.
    pub fn add_file(
        &mut self,
        principal: &Principal,
        folder: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> CoreResult<ContentPath> {
        self.ensure_editable(principal)?;
        let folder = FolderPath::parse(folder)?;
        let path = folder.file(file_name)?;
        self.ctx().ingest_file(&path, bytes)?;
        debug!(resource = %self.id, path = %path, size = bytes.len(), "added file");

        if self.config.auto_aggregate_on_ingest() {
            if let Some(kind) = self.classifier.classify(&path) {
                return Ok(self.auto_aggregate(kind, path));
            }
        }
        Ok(path)
    }

    fn auto_aggregate(&mut self, kind: AggregationKind, path: ContentPath) -> ContentPath {
        let outcome = self.ctx().aggregate_file(kind, &path);
        match outcome {
            Ok(id) if !self.index.contains(&path) => self
                .index
                .files_in_aggregation(id)
                .into_iter()
                .map(ResourceFile::path)
                .find(|moved| moved.file_name() == path.file_name())
                .cloned()
                .unwrap_or(path),
            Ok(_) => path,
            Err(error) => {
                warn!(path = %path, error = %error, "automatic aggregation failed");
                path
            }
        }
    }

    /// Creates an empty folder.
    pub fn create_folder(&mut self, principal: &Principal, folder: &str) -> CoreResult<()> {
        self.ensure_editable(principal)?;
        let folder = FolderPath::parse(folder)?;
        self.ctx().create_folder(&folder)
    }

    /// Renames or moves a file or folder, carrying aggregations and
    /// their documents along.
    pub fn rename_or_move(
        &mut self,
        principal: &Principal,
        source: &str,
        destination: &str,
    ) -> CoreResult<()> {
        self.ensure_editable(principal)?;
        if let Some(file) = self.resolve_file(source) {
            let target = ContentPath::parse(destination)?;
            return self.ctx().move_file(&file, &target);
        }
        if let Some(folder) = self.resolve_folder(source)? {
            let target = FolderPath::parse(destination)?;
            return self.ctx().move_folder(&folder, &target);
        }
        Err(CoreError::NotFound(format!(
            "no file or folder at '{source}'"
        )))
    }

    /// Deletes a file or folder together with the aggregations living
    /// on it.
    pub fn delete(&mut self, principal: &Principal, target: &str) -> CoreResult<()> {
        self.ensure_editable(principal)?;
        if let Some(file) = self.resolve_file(target) {
            return self.ctx().delete_file(&file);
        }
        if let Some(folder) = self.resolve_folder(target)? {
            return self.ctx().delete_folder(&folder);
        }
        Err(CoreError::NotFound(format!(
            "no file or folder at '{target}'"
        )))
    }

    /// Archives a folder into a zip file stored next to it.
    pub fn zip_folder(
        &mut self,
        principal: &Principal,
        folder: &str,
        archive_name: Option<&str>,
        delete_original: bool,
    ) -> CoreResult<ContentPath> {
        self.ensure_editable(principal)?;
        let folder = FolderPath::parse(folder)?;
        self.ctx().zip_folder(&folder, archive_name, delete_original)
    }

    /// Extracts a zip archive into a folder named after it, restoring
    /// any aggregations described by archived metadata documents.
    ///
    /// When automatic aggregation is enabled, extracted files that no
    /// restored aggregation claimed are offered to the classifier.
    pub fn unzip_file(
        &mut self,
        principal: &Principal,
        archive: &str,
        remove_zip: bool,
    ) -> CoreResult<Vec<ContentPath>> {
        self.ensure_editable(principal)?;
        let archive = ContentPath::parse(archive)?;
        let extracted = self.ctx().unzip_file(&archive, remove_zip)?;

        if self.config.auto_aggregate_on_ingest() {
            for path in &extracted {
                if self.registry.by_file_identity(path).is_some() {
                    continue;
                }
                let owner_allows = match self.index.get(path).and_then(ResourceFile::aggregation_id)
                {
                    Some(owner) => self
                        .registry
                        .get(owner)
                        .is_some_and(|aggregation| aggregation.kind().capabilities().auto_attaches),
                    None => true,
                };
                if !owner_allows {
                    continue;
                }
                if let Some(kind) = self.classifier.classify(path) {
                    if let Err(error) = self.ctx().aggregate_file(kind, path) {
                        warn!(path = %path, error = %error, "automatic aggregation failed");
                    }
                }
            }
        }
        Ok(extracted)
    }

    /// Creates an aggregation of `kind` on a file or folder.
    pub fn aggregate(
        &mut self,
        principal: &Principal,
        kind: AggregationKind,
        target: &str,
    ) -> CoreResult<u64> {
        self.ensure_editable(principal)?;
        if let Some(file) = self.resolve_file(target) {
            return self.ctx().aggregate_file(kind, &file);
        }
        if let Some(folder) = self.resolve_folder(target)? {
            return self.ctx().aggregate_folder(kind, &folder);
        }
        Err(CoreError::NotFound(format!(
            "no file or folder at '{target}'"
        )))
    }

    /// Dissolves an aggregation, keeping its content files.
    pub fn deaggregate(&mut self, principal: &Principal, target: &str) -> CoreResult<()> {
        self.ensure_editable(principal)?;
        let id = self.aggregation(target)?.id();
        self.ctx().remove_aggregation(id)
    }

    /// Whether new content may be placed inside `folder`.
    pub fn can_add_files(&self, folder: &str) -> CoreResult<bool> {
        self.loose_additions_allowed(folder)
    }

    /// Whether a subfolder may be created inside `folder`. This
    /// follows the same rule as adding files.
    pub fn supports_folder_creation(&self, folder: &str) -> CoreResult<bool> {
        self.loose_additions_allowed(folder)
    }

    fn loose_additions_allowed(&self, folder: &str) -> CoreResult<bool> {
        let folder = FolderPath::parse(folder)?;
        Ok(match self.registry.nearest_folder_identity(&folder) {
            Some(aggregation) => aggregation.kind().capabilities().accepts_loose_files,
            None => true,
        })
    }

    /// Whether the file or folder at `path` may be renamed or moved.
    /// Folders always may; files defer to the aggregation that governs
    /// them.
    pub fn supports_rename_path(&self, path: &str) -> CoreResult<bool> {
        if let Some(file) = self.resolve_file(path) {
            let governing = self
                .registry
                .by_file_identity(&file)
                .map(Aggregation::id)
                .or_else(|| self.index.get(&file).and_then(ResourceFile::aggregation_id));
            return Ok(match governing {
                Some(id) => {
                    self.registry
                        .require(id)?
                        .kind()
                        .capabilities()
                        .allows_member_rename
                }
                None => true,
            });
        }
        Ok(true)
    }

    /// Whether every aggregation under `folder` permits zipping.
    pub fn supports_zip(&self, folder: &str) -> CoreResult<bool> {
        let folder = FolderPath::parse(folder)?;
        Ok(self.folder_aggregations_allow(&folder, |capabilities| capabilities.supports_zip))
    }

    /// Whether zipping `folder` may delete the original content.
    pub fn supports_delete_folder_on_zip(&self, folder: &str) -> CoreResult<bool> {
        let folder = FolderPath::parse(folder)?;
        Ok(self.folder_aggregations_allow(&folder, |capabilities| {
            capabilities.supports_delete_original_on_zip
        }))
    }

    fn folder_aggregations_allow(
        &self,
        folder: &FolderPath,
        allow: impl Fn(&Capabilities) -> bool,
    ) -> bool {
        self.registry.ids_under(folder).into_iter().all(|id| {
            self.registry
                .get(id)
                .is_some_and(|aggregation| allow(&aggregation.kind().capabilities()))
        })
    }

    fn metadata_mut_for(&mut self, target: &str) -> CoreResult<&mut AggregationMetadata> {
        let id = self.aggregation(target)?.id();
        match self.registry.get_mut(id) {
            Some(aggregation) => Ok(aggregation.metadata_mut()),
            None => Err(CoreError::NotFound(format!("no aggregation at '{target}'"))),
        }
    }

    /// Sets or clears the title of an aggregation. The change lands in
    /// the sidecar documents on the next flush.
    pub fn set_title(
        &mut self,
        principal: &Principal,
        target: &str,
        title: Option<&str>,
    ) -> CoreResult<()> {
        self.ensure_editable(principal)?;
        let title = title.map(NonEmptyText::new).transpose()?;
        self.metadata_mut_for(target)?.set_title(title);
        Ok(())
    }

    /// Adds a keyword to an aggregation. Returns false when it was
    /// already present.
    pub fn add_keyword(
        &mut self,
        principal: &Principal,
        target: &str,
        keyword: &str,
    ) -> CoreResult<bool> {
        self.ensure_editable(principal)?;
        let keyword = NonEmptyText::new(keyword)?;
        Ok(self.metadata_mut_for(target)?.add_keyword(keyword))
    }

    /// Removes a keyword from an aggregation. Returns false when it
    /// was not present.
    pub fn remove_keyword(
        &mut self,
        principal: &Principal,
        target: &str,
        keyword: &str,
    ) -> CoreResult<bool> {
        self.ensure_editable(principal)?;
        Ok(self.metadata_mut_for(target)?.remove_keyword(keyword))
    }

    /// Sets or clears the spatial coverage of an aggregation.
    pub fn set_spatial_coverage(
        &mut self,
        principal: &Principal,
        target: &str,
        coverage: Option<SpatialCoverage>,
    ) -> CoreResult<()> {
        self.ensure_editable(principal)?;
        self.metadata_mut_for(target)?.set_spatial_coverage(coverage);
        Ok(())
    }

    /// Sets or clears the temporal coverage of an aggregation.
    pub fn set_temporal_coverage(
        &mut self,
        principal: &Principal,
        target: &str,
        coverage: Option<TemporalCoverage>,
    ) -> CoreResult<()> {
        self.ensure_editable(principal)?;
        self.metadata_mut_for(target)?.set_temporal_coverage(coverage);
        Ok(())
    }

    /// Stores one extra key-value pair on an aggregation.
    pub fn set_extra_metadata(
        &mut self,
        principal: &Principal,
        target: &str,
        key: &str,
        value: &str,
    ) -> CoreResult<()> {
        self.ensure_editable(principal)?;
        self.metadata_mut_for(target)?
            .set_extra_value(key.to_string(), value.to_string());
        Ok(())
    }

    /// Removes one extra key-value pair from an aggregation.
    pub fn remove_extra_metadata(
        &mut self,
        principal: &Principal,
        target: &str,
        key: &str,
    ) -> CoreResult<bool> {
        self.ensure_editable(principal)?;
        Ok(self.metadata_mut_for(target)?.remove_extra_value(key))
    }

    /// Edits the time series element lists of an aggregation.
    ///
    /// The closure runs against the in-memory metadata; changes it
    /// records are applied to the data file later by
    /// [`CompositeResource::sync_time_series`].
    pub fn edit_time_series<R>(
        &mut self,
        principal: &Principal,
        target: &str,
        edit: impl FnOnce(&mut TimeSeriesMetadata) -> CoreResult<R>,
    ) -> CoreResult<R> {
        self.ensure_editable(principal)?;
        let metadata = self.metadata_mut_for(target)?;
        let outcome = match metadata.time_series_mut() {
            Some(series) => edit(series)?,
            None => {
                return Err(CoreError::Validation(format!(
                    "no time series metadata at '{target}'"
                )))
            }
        };
        metadata.mark_dirty();
        Ok(outcome)
    }

    /// Applies pending time series changes to the data file anchoring
    /// the aggregation at `target`.
    pub fn sync_time_series(
        &mut self,
        principal: &Principal,
        target: &str,
        patcher: &dyn DataFilePatcher,
    ) -> CoreResult<bool> {
        self.ensure_editable(principal)?;
        let path = ContentPath::parse(target)?;
        self.ctx().sync_time_series(&path, patcher)
    }

    /// Rewrites the sidecar documents of dirty aggregations, or of all
    /// aggregations when `force` is set. Returns how many were
    /// rewritten.
    pub fn flush_metadata(&mut self, principal: &Principal, force: bool) -> CoreResult<usize> {
        self.ensure_can_edit(principal)?;
        self.ctx().flush_all(force)
    }

    /// Reconciles the index and registry against the zone.
    pub fn reconcile(&mut self, principal: &Principal) -> CoreResult<ReconcileReport> {
        self.ensure_can_edit(principal)?;
        self.ctx().reconcile()
    }

    /// Sets or clears the resource-level spatial coverage. While
    /// unset, the coverage reported is the union over aggregations.
    pub fn set_resource_spatial_coverage(
        &mut self,
        principal: &Principal,
        coverage: Option<SpatialCoverage>,
    ) -> CoreResult<()> {
        self.ensure_editable(principal)?;
        self.spatial = coverage;
        Ok(())
    }

    /// Sets or clears the resource-level temporal coverage. While
    /// unset, the coverage reported is the union over aggregations.
    pub fn set_resource_temporal_coverage(
        &mut self,
        principal: &Principal,
        coverage: Option<TemporalCoverage>,
    ) -> CoreResult<()> {
        self.ensure_editable(principal)?;
        self.temporal = coverage;
        Ok(())
    }

    /// The resource's spatial coverage, explicit or derived.
    #[must_use]
    pub fn resource_spatial_coverage(&self) -> Option<SpatialCoverage> {
        if self.spatial.is_some() {
            return self.spatial;
        }
        self.registry
            .iter()
            .filter_map(|aggregation| aggregation.metadata().spatial_coverage())
            .fold(None, |union, next| match union {
                Some(current) => Some(current.union(next)),
                None => Some(*next),
            })
    }

    /// The resource's temporal coverage, explicit or derived.
    #[must_use]
    pub fn resource_temporal_coverage(&self) -> Option<TemporalCoverage> {
        if self.temporal.is_some() {
            return self.temporal;
        }
        self.registry
            .iter()
            .filter_map(|aggregation| aggregation.metadata().temporal_coverage())
            .fold(None, |union, next| match union {
                Some(current) => Some(current.union(next)),
                None => Some(*next),
            })
    }
}

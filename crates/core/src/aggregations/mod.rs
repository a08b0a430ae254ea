//! Aggregation kinds, capabilities, and the registry.
//!
//! An aggregation groups one or more content files under a typed kind
//! (raster, time series, file set, and so on) and carries its own
//! metadata. Each kind anchors to either a file or a folder identity
//! and declares a fixed set of capabilities that the cascade logic
//! consults instead of matching on kinds directly.
//!
//! The registry owns every aggregation of a resource and hands out
//! stable numeric ids. Files point back at aggregations through the
//! file index, so membership queries live there.

pub mod metadata;
pub mod timeseries;
pub(crate) mod xml;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::paths::{AggregationDocuments, AggregationIdentity, ContentPath, FolderPath};

pub use metadata::{AggregationMetadata, MetadataBody, SpatialCoverage, TemporalCoverage};
pub use timeseries::{
    CvTableKind, DataFileChange, DataFilePatcher, MethodPatch, ProcessingLevel,
    ProcessingLevelPatch, ResultPatch, Site, SitePatch, TimeSeriesMetadata, TimeSeriesMethod,
    TimeSeriesResult, Variable, VariablePatch,
};

/// The nine aggregation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationKind {
    Generic,
    FileSet,
    GeoRaster,
    GeoFeature,
    NetCdf,
    TimeSeries,
    RefTimeSeries,
    ModelProgram,
    ModelInstance,
}

/// What a kind permits, queried by the cascade logic.
///
/// Capabilities are fixed per kind. Code that coordinates moves,
/// deletes, and zip operations branches on these flags rather than on
/// the kinds themselves, so adding a kind means filling in one table
/// row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// The identity is a folder (and the aggregation spans its subtree)
    /// rather than a single file.
    pub folder_identity: bool,
    /// Member files may be renamed or moved individually while the
    /// aggregation exists.
    pub allows_member_rename: bool,
    /// The identity may be zipped in place.
    pub supports_zip: bool,
    /// Zipping the identity may also delete the original content.
    pub supports_delete_original_on_zip: bool,
    /// Files ingested inside the identity folder join automatically.
    pub auto_attaches: bool,
    /// Files moved into the identity folder join automatically.
    pub accepts_loose_files: bool,
    /// Metadata elements that must be present before the aggregation
    /// counts as complete.
    pub required_elements: &'static [MetadataElement],
}

/// A named metadata element that a kind may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataElement {
    Site,
    Variable,
    Method,
    ProcessingLevel,
    TimeSeriesResult,
}

impl fmt::Display for MetadataElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Site => "Site",
            Self::Variable => "Variable",
            Self::Method => "Method",
            Self::ProcessingLevel => "ProcessingLevel",
            Self::TimeSeriesResult => "TimeSeriesResult",
        };
        write!(f, "{name}")
    }
}

const TIME_SERIES_REQUIRED: &[MetadataElement] = &[
    MetadataElement::Site,
    MetadataElement::Variable,
    MetadataElement::Method,
    MetadataElement::ProcessingLevel,
    MetadataElement::TimeSeriesResult,
];

impl AggregationKind {
    /// Returns the human-readable name of the kind.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Generic => "Generic",
            Self::FileSet => "File Set",
            Self::GeoRaster => "Geographic Raster",
            Self::GeoFeature => "Geographic Feature",
            Self::NetCdf => "Multidimensional (NetCDF)",
            Self::TimeSeries => "Time Series",
            Self::RefTimeSeries => "Referenced Time Series",
            Self::ModelProgram => "Model Program",
            Self::ModelInstance => "Model Instance",
        }
    }

    /// Returns the term used for the kind in metadata documents.
    #[must_use]
    pub const fn term(self) -> &'static str {
        match self {
            Self::Generic => "GenericAggregation",
            Self::FileSet => "FileSetAggregation",
            Self::GeoRaster => "GeoRasterAggregation",
            Self::GeoFeature => "GeoFeatureAggregation",
            Self::NetCdf => "NetCdfAggregation",
            Self::TimeSeries => "TimeSeriesAggregation",
            Self::RefTimeSeries => "RefTimeSeriesAggregation",
            Self::ModelProgram => "ModelProgramAggregation",
            Self::ModelInstance => "ModelInstanceAggregation",
        }
    }

    /// Parses a document term back into a kind.
    #[must_use]
    pub fn parse_term(term: &str) -> Option<Self> {
        match term {
            "GenericAggregation" => Some(Self::Generic),
            "FileSetAggregation" => Some(Self::FileSet),
            "GeoRasterAggregation" => Some(Self::GeoRaster),
            "GeoFeatureAggregation" => Some(Self::GeoFeature),
            "NetCdfAggregation" => Some(Self::NetCdf),
            "TimeSeriesAggregation" => Some(Self::TimeSeries),
            "RefTimeSeriesAggregation" => Some(Self::RefTimeSeries),
            "ModelProgramAggregation" => Some(Self::ModelProgram),
            "ModelInstanceAggregation" => Some(Self::ModelInstance),
            _ => None,
        }
    }

    /// Returns the capability row for the kind.
    #[must_use]
    pub const fn capabilities(self) -> Capabilities {
        match self {
            Self::Generic => Capabilities {
                folder_identity: false,
                allows_member_rename: true,
                supports_zip: true,
                supports_delete_original_on_zip: true,
                auto_attaches: false,
                accepts_loose_files: false,
                required_elements: &[],
            },
            Self::FileSet | Self::ModelProgram | Self::ModelInstance => Capabilities {
                folder_identity: true,
                allows_member_rename: true,
                supports_zip: true,
                supports_delete_original_on_zip: true,
                auto_attaches: true,
                accepts_loose_files: true,
                required_elements: &[],
            },
            Self::GeoRaster | Self::GeoFeature | Self::NetCdf => Capabilities {
                folder_identity: true,
                allows_member_rename: false,
                supports_zip: true,
                supports_delete_original_on_zip: true,
                auto_attaches: false,
                accepts_loose_files: false,
                required_elements: &[],
            },
            Self::TimeSeries => Capabilities {
                folder_identity: false,
                allows_member_rename: false,
                supports_zip: true,
                supports_delete_original_on_zip: false,
                auto_attaches: false,
                accepts_loose_files: false,
                required_elements: TIME_SERIES_REQUIRED,
            },
            Self::RefTimeSeries => Capabilities {
                folder_identity: false,
                allows_member_rename: false,
                supports_zip: true,
                supports_delete_original_on_zip: false,
                auto_attaches: false,
                accepts_loose_files: false,
                required_elements: &[],
            },
        }
    }

    /// Returns true when the kind anchors to a folder.
    #[must_use]
    pub const fn uses_folder_identity(self) -> bool {
        self.capabilities().folder_identity
    }
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// One aggregation: a kind, an identity, and its metadata.
#[derive(Debug)]
pub struct Aggregation {
    id: u64,
    kind: AggregationKind,
    identity: AggregationIdentity,
    metadata: AggregationMetadata,
}

impl Aggregation {
    /// Returns the registry id of the aggregation.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the aggregation kind.
    #[must_use]
    pub fn kind(&self) -> AggregationKind {
        self.kind
    }

    /// Returns the file or folder identity.
    #[must_use]
    pub fn identity(&self) -> &AggregationIdentity {
        &self.identity
    }

    /// Returns the aggregation metadata.
    #[must_use]
    pub fn metadata(&self) -> &AggregationMetadata {
        &self.metadata
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut AggregationMetadata {
        &mut self.metadata
    }

    /// Returns the sidecar document paths derived from the identity.
    #[must_use]
    pub fn documents(&self) -> AggregationDocuments {
        AggregationDocuments::for_identity(&self.identity)
    }

    /// Re-anchors the aggregation after its identity path changed.
    ///
    /// The documents derive from the identity, so callers must remove
    /// any documents written under the old identity and mark the
    /// metadata dirty when the derived paths change.
    pub(crate) fn set_identity(&mut self, identity: AggregationIdentity) {
        self.identity = identity;
    }
}

/// The set of aggregations belonging to one resource.
#[derive(Debug, Default)]
pub struct AggregationRegistry {
    aggregations: BTreeMap<u64, Aggregation>,
    next_id: u64,
}

impl AggregationRegistry {
    pub(crate) fn new() -> Self {
        Self {
            aggregations: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Registers a new aggregation and returns its id.
    ///
    /// The caller decides the metadata's initial dirty state: fresh
    /// aggregations start dirty so their documents get written, while
    /// restored ones start clean.
    pub(crate) fn create(
        &mut self,
        kind: AggregationKind,
        identity: AggregationIdentity,
        metadata: AggregationMetadata,
    ) -> CoreResult<u64> {
        if self.find_by_identity(&identity).is_some() {
            return Err(CoreError::Validation(format!(
                "an aggregation already exists at '{identity}'"
            )));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.aggregations.insert(
            id,
            Aggregation {
                id,
                kind,
                identity,
                metadata,
            },
        );
        Ok(id)
    }

    pub(crate) fn remove(&mut self, id: u64) -> Option<Aggregation> {
        self.aggregations.remove(&id)
    }

    pub(crate) fn get_mut(&mut self, id: u64) -> Option<&mut Aggregation> {
        self.aggregations.get_mut(&id)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Aggregation> {
        self.aggregations.values_mut()
    }

    /// Returns the aggregation with the given id.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<&Aggregation> {
        self.aggregations.get(&id)
    }

    /// Returns the aggregation with the given id or a `NotFound` error.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when no aggregation has the id.
    pub fn require(&self, id: u64) -> CoreResult<&Aggregation> {
        self.aggregations
            .get(&id)
            .ok_or_else(|| CoreError::NotFound(format!("no aggregation with id {id}")))
    }

    /// Iterates over all aggregations in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Aggregation> {
        self.aggregations.values()
    }

    /// Returns the number of registered aggregations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.aggregations.len()
    }

    /// Returns true when no aggregations are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aggregations.is_empty()
    }

    /// Finds the aggregation anchored to exactly this identity.
    #[must_use]
    pub fn find_by_identity(&self, identity: &AggregationIdentity) -> Option<&Aggregation> {
        self.aggregations
            .values()
            .find(|aggregation| aggregation.identity == *identity)
    }

    /// Finds the aggregation anchored to this file.
    #[must_use]
    pub fn by_file_identity(&self, path: &ContentPath) -> Option<&Aggregation> {
        self.aggregations
            .values()
            .find(|aggregation| aggregation.identity.as_file() == Some(path))
    }

    /// Finds the aggregation anchored to this folder.
    #[must_use]
    pub fn by_folder_identity(&self, folder: &FolderPath) -> Option<&Aggregation> {
        self.aggregations
            .values()
            .find(|aggregation| aggregation.identity.as_folder() == Some(folder))
    }

    /// Looks an aggregation up from a raw path string.
    ///
    /// The shape of the identity is not known at the boundary, so the
    /// final path segment decides the order of the typed lookups: a
    /// segment containing a dot is tried as a file identity first,
    /// then as a folder; any other segment the other way round.
    /// Internal callers hold typed paths and use
    /// [`Self::by_file_identity`] or [`Self::by_folder_identity`]
    /// directly.
    #[must_use]
    pub fn find_by_path(&self, raw: &str) -> Option<&Aggregation> {
        let as_file = ContentPath::parse(raw)
            .ok()
            .and_then(|path| self.by_file_identity(&path));
        let as_folder = FolderPath::parse(raw)
            .ok()
            .and_then(|folder| self.by_folder_identity(&folder));
        let name = raw.rsplit('/').next().unwrap_or(raw);
        if name.contains('.') {
            as_file.or(as_folder)
        } else {
            as_folder.or(as_file)
        }
    }

    /// Walks from `folder` towards the root and returns the first
    /// folder-identity aggregation found, so the nearest one wins.
    #[must_use]
    pub fn nearest_folder_identity(&self, folder: &FolderPath) -> Option<&Aggregation> {
        let mut cursor = Some(folder.clone());
        while let Some(current) = cursor {
            if current.is_root() {
                break;
            }
            if let Some(aggregation) = self.by_folder_identity(&current) {
                return Some(aggregation);
            }
            cursor = current.parent();
        }
        None
    }

    /// Walks from `folder` towards the root and returns the first
    /// enclosing aggregation that attaches content automatically.
    ///
    /// Folder identities that do not auto-attach are stepped over, so
    /// a file set still claims loose files that surface inside a
    /// nested typed folder.
    #[must_use]
    pub fn fileset_containing(&self, folder: &FolderPath) -> Option<&Aggregation> {
        let mut cursor = Some(folder.clone());
        while let Some(current) = cursor {
            if current.is_root() {
                break;
            }
            if let Some(aggregation) = self.by_folder_identity(&current) {
                if aggregation.kind().capabilities().auto_attaches {
                    return Some(aggregation);
                }
            }
            cursor = current.parent();
        }
        None
    }

    /// Returns the ids of every aggregation whose identity lies at or
    /// below `folder`, in id order.
    #[must_use]
    pub fn ids_under(&self, folder: &FolderPath) -> Vec<u64> {
        self.aggregations
            .values()
            .filter(|aggregation| aggregation.identity.is_under(folder))
            .map(Aggregation::id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder_identity(path: &str) -> AggregationIdentity {
        AggregationIdentity::Folder(FolderPath::parse(path).unwrap())
    }

    fn file_identity(path: &str) -> AggregationIdentity {
        AggregationIdentity::File(ContentPath::parse(path).unwrap())
    }

    #[test]
    fn test_folder_identity_kinds() {
        for kind in [
            AggregationKind::FileSet,
            AggregationKind::GeoRaster,
            AggregationKind::GeoFeature,
            AggregationKind::NetCdf,
            AggregationKind::ModelProgram,
            AggregationKind::ModelInstance,
        ] {
            assert!(kind.uses_folder_identity(), "{kind}");
        }
        for kind in [
            AggregationKind::Generic,
            AggregationKind::TimeSeries,
            AggregationKind::RefTimeSeries,
        ] {
            assert!(!kind.uses_folder_identity(), "{kind}");
        }
    }

    #[test]
    fn test_typed_content_kinds_refuse_member_renames() {
        for kind in [
            AggregationKind::GeoRaster,
            AggregationKind::GeoFeature,
            AggregationKind::NetCdf,
            AggregationKind::TimeSeries,
            AggregationKind::RefTimeSeries,
        ] {
            assert!(!kind.capabilities().allows_member_rename, "{kind}");
        }
        for kind in [
            AggregationKind::Generic,
            AggregationKind::FileSet,
            AggregationKind::ModelProgram,
            AggregationKind::ModelInstance,
        ] {
            assert!(kind.capabilities().allows_member_rename, "{kind}");
        }
    }

    #[test]
    fn test_only_time_series_kinds_protect_originals_on_zip() {
        for kind in [AggregationKind::TimeSeries, AggregationKind::RefTimeSeries] {
            let caps = kind.capabilities();
            assert!(caps.supports_zip);
            assert!(!caps.supports_delete_original_on_zip, "{kind}");
        }
        assert!(
            AggregationKind::GeoRaster
                .capabilities()
                .supports_delete_original_on_zip
        );
    }

    #[test]
    fn test_auto_attach_kinds() {
        for kind in [
            AggregationKind::FileSet,
            AggregationKind::ModelProgram,
            AggregationKind::ModelInstance,
        ] {
            let caps = kind.capabilities();
            assert!(caps.auto_attaches, "{kind}");
            assert!(caps.accepts_loose_files, "{kind}");
        }
        assert!(!AggregationKind::GeoRaster.capabilities().auto_attaches);
    }

    #[test]
    fn test_time_series_requires_all_five_elements() {
        let required = AggregationKind::TimeSeries.capabilities().required_elements;
        assert_eq!(required.len(), 5);
        assert!(required.contains(&MetadataElement::Site));
        assert!(required.contains(&MetadataElement::TimeSeriesResult));
        assert!(AggregationKind::Generic
            .capabilities()
            .required_elements
            .is_empty());
    }

    #[test]
    fn test_term_round_trip() {
        for kind in [
            AggregationKind::Generic,
            AggregationKind::FileSet,
            AggregationKind::GeoRaster,
            AggregationKind::GeoFeature,
            AggregationKind::NetCdf,
            AggregationKind::TimeSeries,
            AggregationKind::RefTimeSeries,
            AggregationKind::ModelProgram,
            AggregationKind::ModelInstance,
        ] {
            assert_eq!(AggregationKind::parse_term(kind.term()), Some(kind));
        }
        assert_eq!(AggregationKind::parse_term("NoSuchAggregation"), None);
    }

    #[test]
    fn test_registry_create_and_lookup() {
        let mut registry = AggregationRegistry::new();
        let id = registry
            .create(
                AggregationKind::GeoRaster,
                folder_identity("raster"),
                AggregationMetadata::new(AggregationKind::GeoRaster),
            )
            .unwrap();
        let found = registry
            .by_folder_identity(&FolderPath::parse("raster").unwrap())
            .unwrap();
        assert_eq!(found.id(), id);
        assert_eq!(found.kind(), AggregationKind::GeoRaster);
        assert!(registry
            .by_file_identity(&ContentPath::parse("raster").unwrap())
            .is_none());
    }

    #[test]
    fn test_registry_rejects_duplicate_identity() {
        let mut registry = AggregationRegistry::new();
        registry
            .create(
                AggregationKind::TimeSeries,
                file_identity("a/logan.sqlite"),
                AggregationMetadata::new(AggregationKind::TimeSeries),
            )
            .unwrap();
        let second = registry.create(
            AggregationKind::Generic,
            file_identity("a/logan.sqlite"),
            AggregationMetadata::new(AggregationKind::Generic),
        );
        assert!(matches!(second, Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_find_by_path_prefers_files_for_dotted_names() {
        let mut registry = AggregationRegistry::new();
        registry
            .create(
                AggregationKind::FileSet,
                folder_identity("model.v2"),
                AggregationMetadata::new(AggregationKind::FileSet),
            )
            .unwrap();
        let as_file = registry
            .create(
                AggregationKind::Generic,
                file_identity("model.v2"),
                AggregationMetadata::new(AggregationKind::Generic),
            )
            .unwrap();
        let as_folder = registry
            .create(
                AggregationKind::GeoRaster,
                folder_identity("raster"),
                AggregationMetadata::new(AggregationKind::GeoRaster),
            )
            .unwrap();

        assert_eq!(
            registry.find_by_path("model.v2").map(Aggregation::id),
            Some(as_file)
        );
        assert_eq!(
            registry.find_by_path("raster").map(Aggregation::id),
            Some(as_folder)
        );
        assert!(registry.find_by_path("missing.txt").is_none());
    }

    #[test]
    fn test_fileset_containing_steps_over_typed_folders() {
        let mut registry = AggregationRegistry::new();
        let fileset = registry
            .create(
                AggregationKind::FileSet,
                folder_identity("project"),
                AggregationMetadata::new(AggregationKind::FileSet),
            )
            .unwrap();
        registry
            .create(
                AggregationKind::GeoRaster,
                folder_identity("project/raster"),
                AggregationMetadata::new(AggregationKind::GeoRaster),
            )
            .unwrap();

        let nested = FolderPath::parse("project/raster").unwrap();
        assert_eq!(
            registry.fileset_containing(&nested).map(Aggregation::id),
            Some(fileset)
        );
        assert_eq!(
            registry
                .nearest_folder_identity(&nested)
                .map(Aggregation::kind),
            Some(AggregationKind::GeoRaster)
        );
        assert!(registry
            .fileset_containing(&FolderPath::parse("elsewhere").unwrap())
            .is_none());
    }

    #[test]
    fn test_ids_under_scopes_to_the_subtree() {
        let mut registry = AggregationRegistry::new();
        let inside = registry
            .create(
                AggregationKind::NetCdf,
                folder_identity("a/climate"),
                AggregationMetadata::new(AggregationKind::NetCdf),
            )
            .unwrap();
        let outside = registry
            .create(
                AggregationKind::Generic,
                file_identity("b/readme.txt"),
                AggregationMetadata::new(AggregationKind::Generic),
            )
            .unwrap();
        let a = FolderPath::parse("a").unwrap();
        let under = registry.ids_under(&a);
        assert!(under.contains(&inside));
        assert!(!under.contains(&outside));
    }

    #[test]
    fn test_documents_follow_the_identity() {
        let mut registry = AggregationRegistry::new();
        let id = registry
            .create(
                AggregationKind::GeoRaster,
                folder_identity("raster"),
                AggregationMetadata::new(AggregationKind::GeoRaster),
            )
            .unwrap();
        let aggregation = registry.get_mut(id).unwrap();
        assert_eq!(
            aggregation.documents().metadata_path(),
            "raster/raster_meta.xml"
        );
        aggregation.set_identity(folder_identity("raster_1"));
        assert_eq!(
            aggregation.documents().metadata_path(),
            "raster_1/raster_1_meta.xml"
        );
    }
}

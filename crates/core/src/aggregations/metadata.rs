//! Aggregation metadata and the dirty flag lifecycle.
//!
//! Every aggregation carries common metadata (title, keywords,
//! coverage, extra key/value pairs) plus a kind-specific body. Each
//! mutation raises the dirty flag; [`flush_documents`] regenerates the
//! sidecar documents for dirty aggregations and lowers the flag again.
//! Documents are also rewritten when missing from the store, so a
//! deleted sidecar heals on the next flush.

use std::collections::{BTreeMap, BTreeSet};

use cdr_files::BlobStore;
use cdr_types::NonEmptyText;
use cdr_uuid::ResourceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregations::timeseries::TimeSeriesMetadata;
use crate::aggregations::xml;
use crate::aggregations::{Aggregation, AggregationKind, MetadataElement};
use crate::error::{CoreError, CoreResult};
use crate::paths::{content_key, ContentPath};

/// Geographic coverage of an aggregation or resource.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SpatialCoverage {
    /// A single point, in decimal degrees.
    Point { north: f64, east: f64 },
    /// A bounding box, in decimal degrees.
    Box {
        northlimit: f64,
        southlimit: f64,
        eastlimit: f64,
        westlimit: f64,
    },
}

impl SpatialCoverage {
    /// Returns the bounding limits as (north, south, east, west).
    #[must_use]
    pub fn limits(&self) -> (f64, f64, f64, f64) {
        match *self {
            Self::Point { north, east } => (north, north, east, east),
            Self::Box {
                northlimit,
                southlimit,
                eastlimit,
                westlimit,
            } => (northlimit, southlimit, eastlimit, westlimit),
        }
    }

    /// Returns the smallest coverage containing both inputs.
    ///
    /// Two identical points stay a point; anything else widens to a
    /// bounding box.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        if self == other {
            if let Self::Point { .. } = self {
                return *self;
            }
        }
        let (n1, s1, e1, w1) = self.limits();
        let (n2, s2, e2, w2) = other.limits();
        Self::Box {
            northlimit: n1.max(n2),
            southlimit: s1.min(s2),
            eastlimit: e1.max(e2),
            westlimit: w1.min(w2),
        }
    }
}

/// Temporal coverage of an aggregation or resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalCoverage {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TemporalCoverage {
    /// Builds a coverage from an ordered pair of instants.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` when `start` is after `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> CoreResult<Self> {
        if start > end {
            return Err(CoreError::Validation(format!(
                "temporal coverage starts at {start} but ends before it at {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Returns the start of the covered period.
    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Returns the end of the covered period.
    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Returns the smallest coverage containing both inputs.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// The kind-specific part of aggregation metadata.
#[derive(Debug)]
pub enum MetadataBody {
    /// Kinds with no extra structure beyond the common fields.
    Common,
    /// The element lists of a time series aggregation.
    TimeSeries(TimeSeriesMetadata),
}

/// Metadata of one aggregation.
///
/// All mutators raise the dirty flag and refresh the modification
/// time. The flag is only lowered by [`flush_documents`] after the
/// sidecar documents have been rewritten.
#[derive(Debug)]
pub struct AggregationMetadata {
    title: Option<NonEmptyText>,
    keywords: BTreeSet<NonEmptyText>,
    spatial: Option<SpatialCoverage>,
    temporal: Option<TemporalCoverage>,
    extra: BTreeMap<String, String>,
    body: MetadataBody,
    modified_on: DateTime<Utc>,
    dirty: bool,
}

impl AggregationMetadata {
    /// Builds empty metadata for a fresh aggregation of `kind`.
    ///
    /// Fresh metadata starts dirty so the first flush writes the
    /// documents.
    #[must_use]
    pub fn new(kind: AggregationKind) -> Self {
        let body = if kind == AggregationKind::TimeSeries {
            MetadataBody::TimeSeries(TimeSeriesMetadata::default())
        } else {
            MetadataBody::Common
        };
        Self {
            title: None,
            keywords: BTreeSet::new(),
            spatial: None,
            temporal: None,
            extra: BTreeMap::new(),
            body,
            modified_on: Utc::now(),
            dirty: true,
        }
    }

    /// Returns the title, if set.
    #[must_use]
    pub fn title(&self) -> Option<&NonEmptyText> {
        self.title.as_ref()
    }

    /// Returns the keywords in sorted order.
    #[must_use]
    pub fn keywords(&self) -> &BTreeSet<NonEmptyText> {
        &self.keywords
    }

    /// Returns the spatial coverage, if set.
    #[must_use]
    pub fn spatial_coverage(&self) -> Option<&SpatialCoverage> {
        self.spatial.as_ref()
    }

    /// Returns the temporal coverage, if set.
    #[must_use]
    pub fn temporal_coverage(&self) -> Option<&TemporalCoverage> {
        self.temporal.as_ref()
    }

    /// Returns the extra key/value metadata in key order.
    #[must_use]
    pub fn extra_metadata(&self) -> &BTreeMap<String, String> {
        &self.extra
    }

    /// Returns when the metadata last changed.
    #[must_use]
    pub fn modified_on(&self) -> DateTime<Utc> {
        self.modified_on
    }

    /// Returns true when the documents are stale.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns the kind-specific body.
    #[must_use]
    pub fn body(&self) -> &MetadataBody {
        &self.body
    }

    /// Returns the time series body, when this is a time series.
    #[must_use]
    pub fn time_series(&self) -> Option<&TimeSeriesMetadata> {
        match &self.body {
            MetadataBody::TimeSeries(series) => Some(series),
            MetadataBody::Common => None,
        }
    }

    pub(crate) fn time_series_mut(&mut self) -> Option<&mut TimeSeriesMetadata> {
        match &mut self.body {
            MetadataBody::TimeSeries(series) => Some(series),
            MetadataBody::Common => None,
        }
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.modified_on = Utc::now();
    }

    pub(crate) fn set_title(&mut self, title: Option<NonEmptyText>) {
        self.title = title;
        self.touch();
    }

    pub(crate) fn add_keyword(&mut self, keyword: NonEmptyText) -> bool {
        let added = self.keywords.insert(keyword);
        if added {
            self.touch();
        }
        added
    }

    pub(crate) fn remove_keyword(&mut self, keyword: &str) -> bool {
        let before = self.keywords.len();
        self.keywords.retain(|k| k.as_str() != keyword);
        let removed = self.keywords.len() != before;
        if removed {
            self.touch();
        }
        removed
    }

    pub(crate) fn set_spatial_coverage(&mut self, coverage: Option<SpatialCoverage>) {
        self.spatial = coverage;
        self.touch();
    }

    pub(crate) fn set_temporal_coverage(&mut self, coverage: Option<TemporalCoverage>) {
        self.temporal = coverage;
        self.touch();
    }

    pub(crate) fn set_extra_value(&mut self, key: String, value: String) {
        self.extra.insert(key, value);
        self.touch();
    }

    pub(crate) fn remove_extra_value(&mut self, key: &str) -> bool {
        let removed = self.extra.remove(key).is_some();
        if removed {
            self.touch();
        }
        removed
    }

    pub(crate) fn restore_time_series(&mut self, series: TimeSeriesMetadata) {
        self.body = MetadataBody::TimeSeries(series);
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn set_modified_on(&mut self, instant: DateTime<Utc>) {
        self.modified_on = instant;
    }

    /// Lists the required elements that are still missing for `kind`.
    #[must_use]
    pub fn missing_elements(&self, kind: AggregationKind) -> Vec<MetadataElement> {
        kind.capabilities()
            .required_elements
            .iter()
            .copied()
            .filter(|element| !self.has_element(*element))
            .collect()
    }

    /// Returns true when every required element for `kind` is present.
    #[must_use]
    pub fn is_complete(&self, kind: AggregationKind) -> bool {
        self.missing_elements(kind).is_empty()
    }

    fn has_element(&self, element: MetadataElement) -> bool {
        let Some(series) = self.time_series() else {
            return false;
        };
        match element {
            MetadataElement::Site => !series.sites().is_empty(),
            MetadataElement::Variable => !series.variables().is_empty(),
            MetadataElement::Method => !series.methods().is_empty(),
            MetadataElement::ProcessingLevel => !series.processing_levels().is_empty(),
            MetadataElement::TimeSeriesResult => !series.results().is_empty(),
        }
    }
}

/// Regenerates the sidecar documents of one aggregation when needed.
///
/// Documents are rewritten when the metadata is dirty, when either
/// document is missing from the store, or when `force` is set. On
/// success the dirty flag is lowered.
///
/// # Arguments
///
/// * `resource` - The resource the aggregation belongs to
/// * `store` - The blob store holding the content zone
/// * `aggregation` - The aggregation whose documents to refresh
/// * `members` - Zone-relative paths of the aggregation's files
/// * `force` - Rewrite even when clean and present
///
/// # Returns
///
/// True when the documents were rewritten.
///
/// # Errors
///
/// Returns `CoreError::Transport` when the store rejects a write.
pub(crate) fn flush_documents(
    resource: &ResourceId,
    store: &dyn BlobStore,
    aggregation: &mut Aggregation,
    members: &[&ContentPath],
    force: bool,
) -> CoreResult<bool> {
    let documents = aggregation.documents();
    let metadata_key = content_key(resource, documents.metadata_path());
    let map_key = content_key(resource, documents.map_path());

    let missing = !store.exists(&metadata_key)? || !store.exists(&map_key)?;
    if !aggregation.metadata().is_dirty() && !missing && !force {
        return Ok(false);
    }

    let metadata_doc = xml::build_metadata_document(resource, aggregation);
    let map_doc = xml::build_map_document(resource, aggregation, members);
    store.put_bytes(&metadata_key, metadata_doc.as_bytes())?;
    store.put_bytes(&map_key, map_doc.as_bytes())?;
    aggregation.metadata_mut().mark_clean();
    debug!(
        identity = %aggregation.identity(),
        kind = %aggregation.kind(),
        "regenerated aggregation documents"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn text(value: &str) -> NonEmptyText {
        NonEmptyText::new(value).unwrap()
    }

    fn instant(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_fresh_metadata_starts_dirty() {
        let metadata = AggregationMetadata::new(AggregationKind::Generic);
        assert!(metadata.is_dirty());
        assert!(metadata.title().is_none());
    }

    #[test]
    fn test_mutation_raises_the_dirty_flag_again() {
        let mut metadata = AggregationMetadata::new(AggregationKind::Generic);
        metadata.mark_clean();
        assert!(!metadata.is_dirty());
        metadata.set_title(Some(text("Logan River")));
        assert!(metadata.is_dirty());
        assert_eq!(metadata.title().unwrap().as_str(), "Logan River");
    }

    #[test]
    fn test_keywords_deduplicate() {
        let mut metadata = AggregationMetadata::new(AggregationKind::Generic);
        assert!(metadata.add_keyword(text("hydrology")));
        assert!(!metadata.add_keyword(text("hydrology")));
        assert_eq!(metadata.keywords().len(), 1);

        metadata.mark_clean();
        assert!(!metadata.remove_keyword("absent"));
        assert!(!metadata.is_dirty());
        assert!(metadata.remove_keyword("hydrology"));
        assert!(metadata.is_dirty());
        assert!(metadata.keywords().is_empty());
    }

    #[test]
    fn test_spatial_union_of_identical_points_stays_a_point() {
        let point = SpatialCoverage::Point {
            north: 41.7,
            east: -111.8,
        };
        assert_eq!(point.union(&point), point);
    }

    #[test]
    fn test_spatial_union_widens_to_a_box() {
        let a = SpatialCoverage::Point {
            north: 41.7,
            east: -111.8,
        };
        let b = SpatialCoverage::Point {
            north: 40.1,
            east: -110.2,
        };
        let union = a.union(&b);
        assert_eq!(
            union,
            SpatialCoverage::Box {
                northlimit: 41.7,
                southlimit: 40.1,
                eastlimit: -110.2,
                westlimit: -111.8,
            }
        );
    }

    #[test]
    fn test_temporal_coverage_rejects_reversed_bounds() {
        let result = TemporalCoverage::new(instant(2024, 6, 1), instant(2024, 1, 1));
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_temporal_union_spans_both_periods() {
        let a = TemporalCoverage::new(instant(2023, 1, 1), instant(2023, 6, 1)).unwrap();
        let b = TemporalCoverage::new(instant(2023, 3, 1), instant(2024, 1, 1)).unwrap();
        let union = a.union(&b);
        assert_eq!(union.start(), instant(2023, 1, 1));
        assert_eq!(union.end(), instant(2024, 1, 1));
    }

    #[test]
    fn test_generic_metadata_is_always_complete() {
        let metadata = AggregationMetadata::new(AggregationKind::Generic);
        assert!(metadata.is_complete(AggregationKind::Generic));
        assert!(metadata
            .missing_elements(AggregationKind::Generic)
            .is_empty());
    }

    #[test]
    fn test_empty_time_series_is_missing_all_five_elements() {
        let metadata = AggregationMetadata::new(AggregationKind::TimeSeries);
        let missing = metadata.missing_elements(AggregationKind::TimeSeries);
        assert_eq!(missing.len(), 5);
        assert!(!metadata.is_complete(AggregationKind::TimeSeries));
    }

    #[test]
    fn test_extra_metadata_round_trip() {
        let mut metadata = AggregationMetadata::new(AggregationKind::Generic);
        metadata.set_extra_value("station".to_string(), "USU-LBR-Mendon".to_string());
        assert_eq!(
            metadata.extra_metadata().get("station"),
            Some(&"USU-LBR-Mendon".to_string())
        );
        assert!(metadata.remove_extra_value("station"));
        assert!(!metadata.remove_extra_value("station"));
    }
}

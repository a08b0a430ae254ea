//! Aggregation kind detection for ingested files.
//!
//! When configured to do so, the resource facade asks a classifier
//! whether a freshly ingested file should seed a typed aggregation.
//! The default implementation goes by file extension alone; embedders
//! that inspect content can supply their own.

use crate::aggregations::AggregationKind;
use crate::paths::ContentPath;

/// Decides whether a file should seed an aggregation of some kind.
pub trait AggregationClassifier: Send + Sync {
    /// Returns the kind the file should seed, or `None` to leave the
    /// file loose.
    fn classify(&self, path: &ContentPath) -> Option<AggregationKind>;
}

/// The default extension-based classifier.
///
/// Referenced time series come as `.refts.json`, so the compound
/// suffix is checked before the plain extension table.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtensionClassifier;

impl AggregationClassifier for ExtensionClassifier {
    fn classify(&self, path: &ContentPath) -> Option<AggregationKind> {
        let name = path.file_name().to_ascii_lowercase();
        if name.ends_with(".refts.json") {
            return Some(AggregationKind::RefTimeSeries);
        }
        match path.extension()?.to_ascii_lowercase().as_str() {
            "tif" | "tiff" => Some(AggregationKind::GeoRaster),
            "nc" => Some(AggregationKind::NetCdf),
            "shp" => Some(AggregationKind::GeoFeature),
            "sqlite" => Some(AggregationKind::TimeSeries),
            _ => None,
        }
    }
}

//! # CDR Core
//!
//! Core logic for the composite dataset repository.
//!
//! A resource is a tree of content files inside a storage zone, a
//! path-keyed index over those files, and a set of typed aggregations
//! carrying their own metadata. This crate owns that model:
//! - Path and name validation for content keys
//! - The file index and the aggregation registry
//! - Sidecar metadata documents and their dirty-flag lifecycle
//! - Move, delete, zip, and unzip cascades
//! - The [`CompositeResource`] facade with authorisation checks
//!
//! **No transport concerns**: HTTP servers, queues, or service
//! interfaces belong to embedders. This crate speaks [`BlobStore`] to
//! storage and nothing else.

pub mod aggregations;
pub mod classify;
pub mod config;
pub mod constants;
mod coordinator;
pub mod error;
pub mod index;
pub mod paths;
mod reconcile;
mod resource;

pub use cdr_files::{BlobError, BlobStore, LocalBlobStore};
pub use cdr_types::NonEmptyText;
pub use cdr_uuid::ResourceId;

pub use aggregations::{Aggregation, AggregationKind, SpatialCoverage, TemporalCoverage};
pub use classify::{AggregationClassifier, ExtensionClassifier};
pub use config::CoreConfig;
pub use error::{CoreError, CoreResult};
pub use index::{FileIndex, ResourceFile};
pub use paths::{ContentPath, FolderPath};
pub use reconcile::ReconcileReport;
pub use resource::{CompositeResource, Principal};

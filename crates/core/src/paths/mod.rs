//! Path definitions for composite resource content.
//!
//! This module defines the zone-relative path types used throughout the
//! crate. It contains **no I/O logic** - only typed path construction and
//! the mapping from content-space paths to blob store keys.
//!
//! Content-space paths are always relative to the resource content root
//! (`<resource_id>/data/contents/`). The blob store never sees a content
//! path directly; callers translate through [`content_key`] first.

pub mod content;
pub mod documents;

pub use content::{validate_name, ContentPath, FolderPath};
pub use documents::{is_document_path, AggregationDocuments, AggregationIdentity};

use cdr_uuid::ResourceId;

use crate::constants::CONTENTS_DIR;

/// Returns the blob store key of the content root for a resource.
///
/// # Arguments
///
/// * `resource` - The resource whose content root is wanted
#[must_use]
pub fn content_root(resource: &ResourceId) -> String {
    format!("{}/{CONTENTS_DIR}", resource.as_simple())
}

/// Translates a zone-relative content path into a blob store key.
///
/// An empty `relative` yields the content root itself, so folder paths
/// (including the root folder) and file paths share one translation.
///
/// # Arguments
///
/// * `resource` - The resource the path belongs to
/// * `relative` - A content-space path, or `""` for the content root
#[must_use]
pub fn content_key(resource: &ResourceId, relative: &str) -> String {
    if relative.is_empty() {
        content_root(resource)
    } else {
        format!("{}/{CONTENTS_DIR}/{relative}", resource.as_simple())
    }
}

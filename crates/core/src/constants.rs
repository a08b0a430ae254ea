//! Constants used throughout the CDR core crate.
//!
//! This module contains all path, filename, and vocabulary constants to ensure
//! consistency across the codebase and make maintenance easier.

/// Path of the content area inside a resource, relative to the resource root.
///
/// Every user-visible file of a resource lives under
/// `<resource_id>/data/contents/` in the storage zone.
pub const CONTENTS_DIR: &str = "data/contents";

/// Filename suffix of an aggregation's metadata document.
///
/// The document sits next to the aggregation's identity path and is named
/// `<identity_stem>_meta.xml`.
pub const METADATA_FILE_SUFFIX: &str = "_meta.xml";

/// Filename suffix of an aggregation's resource-map document.
///
/// Derived the same way as [`METADATA_FILE_SUFFIX`], with `_resmap.xml`.
pub const MAP_FILE_SUFFIX: &str = "_resmap.xml";

/// Extension appended to zip archive names that arrive without one.
pub const ZIP_EXTENSION: &str = "zip";

/// Characters that may never appear in a file or folder name.
///
/// These either collide with path handling (`\`) or are rejected by common
/// storage backends and client filesystems.
pub const BANNED_NAME_CHARACTERS: &[char] = &['\\', ':', '*', '?', '"', '<', '>', '|'];

/// Maximum length of a single file or folder name, in bytes.
pub const MAX_NAME_LENGTH: usize = 255;

/// XML namespace of the RDF syntax vocabulary.
pub const RDF_NAMESPACE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";

/// XML namespace of the Dublin Core elements vocabulary.
pub const DC_NAMESPACE: &str = "http://purl.org/dc/elements/1.1/";

/// XML namespace of the Dublin Core terms vocabulary.
pub const DCTERMS_NAMESPACE: &str = "http://purl.org/dc/terms/";

/// XML namespace of the ORE aggregation vocabulary.
pub const ORE_NAMESPACE: &str = "http://www.openarchives.org/ore/terms/";

/// XML namespace of CDR's own metadata terms.
pub const CDRTERMS_NAMESPACE: &str = "https://purl.org/cdr/terms/";

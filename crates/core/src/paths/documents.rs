//! Aggregation identities and their sidecar document paths.
//!
//! Every aggregation is anchored to an identity: either a single file
//! or a folder. The identity determines where the two sidecar documents
//! live:
//!
//! * file identity `a/logan.sqlite` keeps its documents as siblings,
//!   `a/logan_meta.xml` and `a/logan_resmap.xml`
//! * folder identity `a/raster` keeps its documents inside the folder,
//!   named after it: `a/raster/raster_meta.xml` and
//!   `a/raster/raster_resmap.xml`
//!
//! Because document names derive from the identity, renaming the
//! identity renames the documents with it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{MAP_FILE_SUFFIX, METADATA_FILE_SUFFIX};
use crate::paths::content::{ContentPath, FolderPath};

/// The anchor of an aggregation inside the content root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationIdentity {
    /// An aggregation anchored to a single file.
    File(ContentPath),
    /// An aggregation anchored to a folder and its subtree.
    Folder(FolderPath),
}

impl AggregationIdentity {
    /// Returns the identity path as a zone-relative string.
    #[must_use]
    pub fn path_str(&self) -> &str {
        match self {
            Self::File(path) => path.as_str(),
            Self::Folder(folder) => folder.as_str(),
        }
    }

    /// Returns the identity file, if this is a file identity.
    #[must_use]
    pub fn as_file(&self) -> Option<&ContentPath> {
        match self {
            Self::File(path) => Some(path),
            Self::Folder(_) => None,
        }
    }

    /// Returns the identity folder, if this is a folder identity.
    #[must_use]
    pub fn as_folder(&self) -> Option<&FolderPath> {
        match self {
            Self::File(_) => None,
            Self::Folder(folder) => Some(folder),
        }
    }

    /// Returns the folder that contains the identity.
    ///
    /// For a file identity this is the file's folder; for a folder
    /// identity it is the folder's parent.
    #[must_use]
    pub fn parent_folder(&self) -> FolderPath {
        match self {
            Self::File(path) => path.folder(),
            Self::Folder(folder) => folder.parent().unwrap_or_else(FolderPath::root),
        }
    }

    /// Returns true when the identity lies at or below `folder`.
    #[must_use]
    pub fn is_under(&self, folder: &FolderPath) -> bool {
        match self {
            Self::File(path) => path.is_under(folder),
            Self::Folder(own) => own.is_under(folder),
        }
    }

    /// Rewrites an identity that lies under `from` so that it lies
    /// under `to` instead.
    pub(crate) fn rebase(&self, from: &FolderPath, to: &FolderPath) -> Self {
        match self {
            Self::File(path) => Self::File(path.rebase(from, to)),
            Self::Folder(folder) => Self::Folder(folder.rebase(from, to)),
        }
    }
}

impl fmt::Display for AggregationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{path}"),
            Self::Folder(folder) => write!(f, "{folder}"),
        }
    }
}

/// The pair of sidecar document paths belonging to one aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationDocuments {
    metadata: String,
    map: String,
}

impl AggregationDocuments {
    /// Derives the document paths for an identity.
    ///
    /// The identity must not be the content root; the registry never
    /// creates a root-anchored aggregation.
    #[must_use]
    pub fn for_identity(identity: &AggregationIdentity) -> Self {
        match identity {
            AggregationIdentity::File(path) => {
                let folder = path.folder();
                let base = if folder.is_root() {
                    path.stem().to_string()
                } else {
                    format!("{}/{}", folder.as_str(), path.stem())
                };
                Self {
                    metadata: format!("{base}{METADATA_FILE_SUFFIX}"),
                    map: format!("{base}{MAP_FILE_SUFFIX}"),
                }
            }
            AggregationIdentity::Folder(folder) => {
                debug_assert!(!folder.is_root());
                let base = format!("{}/{}", folder.as_str(), folder.name());
                Self {
                    metadata: format!("{base}{METADATA_FILE_SUFFIX}"),
                    map: format!("{base}{MAP_FILE_SUFFIX}"),
                }
            }
        }
    }

    /// Returns the zone-relative path of the metadata document.
    #[must_use]
    pub fn metadata_path(&self) -> &str {
        &self.metadata
    }

    /// Returns the zone-relative path of the resource map document.
    #[must_use]
    pub fn map_path(&self) -> &str {
        &self.map
    }
}

/// Returns true when a content path names a sidecar document rather
/// than user content.
#[must_use]
pub fn is_document_path(path: &ContentPath) -> bool {
    let name = path.file_name();
    name.ends_with(METADATA_FILE_SUFFIX) || name.ends_with(MAP_FILE_SUFFIX)
}

/// The syntactic owner of a metadata document, recovered from its path.
///
/// A document named after its own folder belongs to a folder identity;
/// any other document belongs to a file in the same folder whose stem
/// matches. The distinction is syntactic only, so callers restoring
/// state must cross-check against the aggregation kind parsed from the
/// document itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DocumentOwner {
    Folder(FolderPath),
    FileStem { folder: FolderPath, stem: String },
}

/// Classifies a metadata document path into its syntactic owner.
///
/// Returns `None` for paths that are not metadata documents.
pub(crate) fn classify_metadata_document(path: &ContentPath) -> Option<DocumentOwner> {
    let name = path.file_name();
    let stem = name.strip_suffix(METADATA_FILE_SUFFIX)?;
    if stem.is_empty() {
        return None;
    }
    let folder = path.folder();
    if !folder.is_root() && folder.name() == stem {
        return Some(DocumentOwner::Folder(folder));
    }
    Some(DocumentOwner::FileStem {
        folder,
        stem: stem.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_identity(path: &str) -> AggregationIdentity {
        AggregationIdentity::File(ContentPath::parse(path).unwrap())
    }

    fn folder_identity(path: &str) -> AggregationIdentity {
        AggregationIdentity::Folder(FolderPath::parse(path).unwrap())
    }

    #[test]
    fn test_file_identity_documents_sit_beside_the_file() {
        let docs = AggregationDocuments::for_identity(&file_identity("a/logan.sqlite"));
        assert_eq!(docs.metadata_path(), "a/logan_meta.xml");
        assert_eq!(docs.map_path(), "a/logan_resmap.xml");
    }

    #[test]
    fn test_root_level_file_identity_documents() {
        let docs = AggregationDocuments::for_identity(&file_identity("logan.sqlite"));
        assert_eq!(docs.metadata_path(), "logan_meta.xml");
        assert_eq!(docs.map_path(), "logan_resmap.xml");
    }

    #[test]
    fn test_folder_identity_documents_sit_inside_the_folder() {
        let docs = AggregationDocuments::for_identity(&folder_identity("raster"));
        assert_eq!(docs.metadata_path(), "raster/raster_meta.xml");
        assert_eq!(docs.map_path(), "raster/raster_resmap.xml");
    }

    #[test]
    fn test_nested_folder_identity_documents() {
        let docs = AggregationDocuments::for_identity(&folder_identity("a/b/netcdf"));
        assert_eq!(docs.metadata_path(), "a/b/netcdf/netcdf_meta.xml");
        assert_eq!(docs.map_path(), "a/b/netcdf/netcdf_resmap.xml");
    }

    #[test]
    fn test_renaming_the_identity_renames_the_documents() {
        let from = FolderPath::parse("raster").unwrap();
        let to = FolderPath::parse("raster_1").unwrap();
        let renamed = folder_identity("raster").rebase(&from, &to);
        let docs = AggregationDocuments::for_identity(&renamed);
        assert_eq!(docs.metadata_path(), "raster_1/raster_1_meta.xml");
        assert_eq!(docs.map_path(), "raster_1/raster_1_resmap.xml");
    }

    #[test]
    fn test_parent_folder_of_each_identity_kind() {
        assert_eq!(
            file_identity("a/logan.sqlite").parent_folder().as_str(),
            "a"
        );
        assert_eq!(folder_identity("a/raster").parent_folder().as_str(), "a");
        assert!(folder_identity("raster").parent_folder().is_root());
    }

    #[test]
    fn test_is_document_path_matches_both_suffixes() {
        let meta = ContentPath::parse("a/logan_meta.xml").unwrap();
        let map = ContentPath::parse("a/logan_resmap.xml").unwrap();
        let data = ContentPath::parse("a/logan.sqlite").unwrap();
        assert!(is_document_path(&meta));
        assert!(is_document_path(&map));
        assert!(!is_document_path(&data));
    }

    #[test]
    fn test_classify_folder_document() {
        let path = ContentPath::parse("a/raster/raster_meta.xml").unwrap();
        assert_eq!(
            classify_metadata_document(&path),
            Some(DocumentOwner::Folder(FolderPath::parse("a/raster").unwrap()))
        );
    }

    #[test]
    fn test_classify_file_document() {
        let path = ContentPath::parse("a/logan_meta.xml").unwrap();
        assert_eq!(
            classify_metadata_document(&path),
            Some(DocumentOwner::FileStem {
                folder: FolderPath::parse("a").unwrap(),
                stem: "logan".to_string(),
            })
        );
    }

    #[test]
    fn test_classify_ignores_non_documents() {
        let data = ContentPath::parse("a/logan.sqlite").unwrap();
        assert_eq!(classify_metadata_document(&data), None);
        let map = ContentPath::parse("a/logan_resmap.xml").unwrap();
        assert_eq!(classify_metadata_document(&map), None);
    }
}

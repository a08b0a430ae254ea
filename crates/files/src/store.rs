//! The storage-zone trait CDR's domain engine is written against.
//!
//! `cdr-core` never touches a filesystem or network client directly; every byte it
//! reads or writes goes through [`BlobStore`]. The trait is object-safe so embedders
//! can hand the engine an `Arc<dyn BlobStore>` backed by whatever their platform uses.

use crate::BlobError;

/// Immediate children of a zone folder, names only.
///
/// Folder and file names are returned separately and sorted, mirroring how
/// collection-style backends report a directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderListing {
    /// Names of immediate sub-folders
    pub folders: Vec<String>,
    /// Names of immediate files
    pub files: Vec<String>,
}

/// Primitive operations CDR requires of a storage zone.
///
/// Paths are `/`-separated strings relative to the zone root; the first segment is a
/// resource identifier. Implementations must treat paths as opaque keys apart from the
/// separator: no normalisation, no case folding.
///
/// # Failure semantics
///
/// A missing object is reported as [`BlobError::NotFound`] so callers can distinguish
/// "not there" from a failing backend. All other failures are transport-level and carry
/// the underlying cause.
pub trait BlobStore: Send + Sync {
    /// Returns true if an object (file or folder) exists at `path`.
    fn exists(&self, path: &str) -> Result<bool, BlobError>;

    /// Lists the immediate children of the folder at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::NotFound`] if the folder does not exist and
    /// [`BlobError::WrongKind`] if `path` names a file.
    fn listdir(&self, path: &str) -> Result<FolderListing, BlobError>;

    /// Returns the size in bytes of the file at `path`.
    fn size(&self, path: &str) -> Result<u64, BlobError>;

    /// Returns the SHA-256 digest (lowercase hex) of the file at `path`.
    fn checksum(&self, path: &str) -> Result<String, BlobError>;

    /// Moves a file or folder from `src` to `dst`, creating missing parent folders
    /// of `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::NotFound`] if `src` does not exist and
    /// [`BlobError::AlreadyExists`] if `dst` does.
    fn move_object(&self, src: &str, dst: &str) -> Result<(), BlobError>;

    /// Deletes the file or folder at `path`. Folder deletion is recursive.
    fn delete(&self, path: &str) -> Result<(), BlobError>;

    /// Creates the folder at `path`, creating missing parents.
    fn create_folder(&self, path: &str) -> Result<(), BlobError>;

    /// Writes `bytes` to the file at `path`, creating missing parent folders and
    /// replacing any existing content.
    fn put_bytes(&self, path: &str, bytes: &[u8]) -> Result<(), BlobError>;

    /// Reads the full content of the file at `path`.
    fn get_bytes(&self, path: &str) -> Result<Vec<u8>, BlobError>;

    /// Archives the folder at `src_folder` into a zip file written at `zip_path`.
    ///
    /// Entry names are relative to `src_folder`. The source folder is left in place.
    fn zipup(&self, src_folder: &str, zip_path: &str) -> Result<(), BlobError>;

    /// Extracts the archive at `zip_path` into `dest_folder` and returns the
    /// zone-relative paths of the files created.
    ///
    /// Implementations must refuse archive entries whose names would escape
    /// `dest_folder` before extracting anything.
    fn unzip(&self, zip_path: &str, dest_folder: &str) -> Result<Vec<String>, BlobError>;
}

//! The path-keyed file index.
//!
//! The index is the in-memory record of every content file in a
//! resource: its path, size, checksum, media type, and the aggregation
//! it belongs to (if any). Sidecar documents are never indexed; they
//! are derived artefacts of the aggregations themselves.
//!
//! The index is rebuilt from the blob store when a resource is opened,
//! so the store remains the source of truth for bytes while the index
//! answers structural queries without touching the filesystem.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{CoreError, CoreResult};
use crate::paths::{ContentPath, FolderPath};

/// One indexed content file.
#[derive(Debug, Clone)]
pub struct ResourceFile {
    path: ContentPath,
    size: u64,
    checksum: String,
    media_type: String,
    modified_on: DateTime<Utc>,
    aggregation: Option<u64>,
}

impl ResourceFile {
    pub(crate) fn new(path: ContentPath, size: u64, checksum: String) -> Self {
        let media_type = media_type_for(&path).to_string();
        Self {
            path,
            size,
            checksum,
            media_type,
            modified_on: Utc::now(),
            aggregation: None,
        }
    }

    /// Returns the zone-relative path of the file.
    #[must_use]
    pub fn path(&self) -> &ContentPath {
        &self.path
    }

    /// Returns the file name, without any folder prefix.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.path.file_name()
    }

    /// Returns the file extension, lowercased by the caller if needed.
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        self.path.extension()
    }

    /// Returns the folder the file sits in.
    #[must_use]
    pub fn folder(&self) -> FolderPath {
        self.path.folder()
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the hex-encoded SHA-256 checksum of the file content.
    #[must_use]
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Returns the media type guessed from the file extension.
    #[must_use]
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Returns when the file was indexed or its content last changed.
    #[must_use]
    pub fn modified_on(&self) -> DateTime<Utc> {
        self.modified_on
    }

    /// Returns the id of the aggregation this file belongs to.
    #[must_use]
    pub fn aggregation_id(&self) -> Option<u64> {
        self.aggregation
    }
}

/// Guesses a media type from a file extension.
///
/// The table covers the content types the aggregation kinds care
/// about; everything else falls back to `application/octet-stream`.
#[must_use]
pub(crate) fn media_type_for(path: &ContentPath) -> &'static str {
    let extension = match path.extension() {
        Some(ext) => ext.to_ascii_lowercase(),
        None => return "application/octet-stream",
    };
    match extension.as_str() {
        "tif" | "tiff" => "image/tiff",
        "nc" => "application/x-netcdf",
        "shp" => "application/x-esri-shapefile",
        "sqlite" => "application/x-sqlite3",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" | "md" => "text/plain",
        "csv" => "text/csv",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// The path-keyed index over every content file of one resource.
///
/// Keys are full zone-relative paths, so lookups, folder listings, and
/// prefix scans all ride on the map's ordering.
#[derive(Debug, Default)]
pub struct FileIndex {
    files: BTreeMap<ContentPath, ResourceFile>,
}

impl FileIndex {
    pub(crate) fn new() -> Self {
        Self {
            files: BTreeMap::new(),
        }
    }

    /// Returns the file at `path`, if indexed.
    #[must_use]
    pub fn get(&self, path: &ContentPath) -> Option<&ResourceFile> {
        self.files.get(path)
    }

    /// Returns the file at `path` or a `NotFound` error.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when no file is indexed at `path`.
    pub fn require(&self, path: &ContentPath) -> CoreResult<&ResourceFile> {
        self.files
            .get(path)
            .ok_or_else(|| CoreError::NotFound(format!("no file at '{path}'")))
    }

    /// Returns the file called `name` directly inside `folder`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` when `name` is not a legal file
    /// name and `CoreError::NotFound` when no such file is indexed.
    pub fn get_in_folder(&self, folder: &FolderPath, name: &str) -> CoreResult<&ResourceFile> {
        let path = folder.file(name)?;
        self.require(&path)
    }

    /// Returns true when a file is indexed at `path`.
    #[must_use]
    pub fn contains(&self, path: &ContentPath) -> bool {
        self.files.contains_key(path)
    }

    /// Returns the number of indexed files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true when no files are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Iterates over all indexed files in path order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceFile> {
        self.files.values()
    }

    /// Returns the files sitting directly inside `folder`, in path order.
    #[must_use]
    pub fn list_folder(&self, folder: &FolderPath) -> Vec<&ResourceFile> {
        self.files
            .values()
            .filter(|file| file.path.is_in_folder(folder))
            .collect()
    }

    /// Returns every file at or below `folder`, in path order.
    #[must_use]
    pub fn files_under(&self, folder: &FolderPath) -> Vec<&ResourceFile> {
        self.files
            .values()
            .filter(|file| file.path.is_under(folder))
            .collect()
    }

    /// Returns the files belonging to one aggregation, in path order.
    #[must_use]
    pub fn files_in_aggregation(&self, aggregation: u64) -> Vec<&ResourceFile> {
        self.files
            .values()
            .filter(|file| file.aggregation == Some(aggregation))
            .collect()
    }

    /// Adds a file that is not yet indexed.
    pub(crate) fn insert_new(&mut self, file: ResourceFile) -> CoreResult<()> {
        if self.files.contains_key(&file.path) {
            return Err(CoreError::Validation(format!(
                "file '{}' is already indexed",
                file.path
            )));
        }
        self.files.insert(file.path.clone(), file);
        Ok(())
    }

    /// Re-keys a file after a move or rename, keeping its state.
    pub(crate) fn rewrite_path(&mut self, from: &ContentPath, to: ContentPath) -> CoreResult<()> {
        if self.files.contains_key(&to) {
            return Err(CoreError::Validation(format!(
                "file '{to}' already exists"
            )));
        }
        let mut file = self
            .files
            .remove(from)
            .ok_or_else(|| CoreError::NotFound(format!("no file at '{from}'")))?;
        file.path = to.clone();
        self.files.insert(to, file);
        Ok(())
    }

    /// Removes a file from the index, returning its last state.
    pub(crate) fn remove(&mut self, path: &ContentPath) -> CoreResult<ResourceFile> {
        self.files
            .remove(path)
            .ok_or_else(|| CoreError::NotFound(format!("no file at '{path}'")))
    }

    /// Points a file at an aggregation, or clears the link.
    pub(crate) fn set_aggregation(
        &mut self,
        path: &ContentPath,
        aggregation: Option<u64>,
    ) -> CoreResult<()> {
        let file = self
            .files
            .get_mut(path)
            .ok_or_else(|| CoreError::NotFound(format!("no file at '{path}'")))?;
        file.aggregation = aggregation;
        Ok(())
    }

    /// Refreshes size, checksum, and the modification stamp after the
    /// file content changed.
    pub(crate) fn update_content(
        &mut self,
        path: &ContentPath,
        size: u64,
        checksum: String,
    ) -> CoreResult<()> {
        let file = self
            .files
            .get_mut(path)
            .ok_or_else(|| CoreError::NotFound(format!("no file at '{path}'")))?;
        file.size = size;
        file.checksum = checksum;
        file.modified_on = Utc::now();
        Ok(())
    }
}

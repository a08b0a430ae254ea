//! Filesystem implementation of the storage zone
//!
//! This module provides [`LocalBlobStore`], the [`BlobStore`] implementation CDR uses
//! for local zones: development setups, the `cdr` CLI, and tests. Production embedders
//! running against a remote object store supply their own implementation of the trait.
//!
//! # Path Safety
//!
//! Zone paths arrive as untrusted strings (CLI arguments, archive entry names). Every
//! operation resolves its path through a single guard that rejects anything able to
//! escape the zone root before the filesystem is touched:
//!
//! - empty paths and empty segments (`a//b`)
//! - absolute paths and leading `/`
//! - `.` and `..` segments
//! - backslashes, NUL, and other ASCII control bytes
//!
//! # Archive Handling
//!
//! `zipup` walks the source folder and writes deflate entries named relative to it.
//! `unzip` validates every entry name in a first pass and extracts in a second, so a
//! hostile archive cannot place even one file before being rejected.

use crate::{BlobError, BlobStore, FolderListing};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::CompressionMethod;
use zip::ZipWriter;

/// A storage zone rooted at a local directory.
///
/// # Design
///
/// - Zone-scoped: every path resolves strictly beneath the root
/// - Stateless: the constructor validates, operations perform the I/O
/// - Guarded: every path is checked before any filesystem access
#[derive(Debug)]
pub struct LocalBlobStore {
    /// Canonicalised zone root directory
    root: PathBuf,
}

impl LocalBlobStore {
    /// Creates a store over an existing zone root directory.
    ///
    /// # Arguments
    ///
    /// * `root` - Directory that holds (or will hold) per-resource trees
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::InvalidRoot`] if the root does not exist, is not a
    /// directory, or cannot be canonicalised.
    pub fn new(root: &Path) -> Result<Self, BlobError> {
        if !root.exists() {
            return Err(BlobError::InvalidRoot(format!(
                "Directory does not exist: {}",
                root.display()
            )));
        }

        if !root.is_dir() {
            return Err(BlobError::InvalidRoot(format!(
                "Path is not a directory: {}",
                root.display()
            )));
        }

        let root = root.canonicalize().map_err(|e| {
            BlobError::InvalidRoot(format!(
                "Cannot canonicalise path {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(Self { root })
    }

    /// Resolves a zone path to an absolute filesystem path beneath the root.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::SuspiciousPath`] if the path could address anything
    /// outside the zone root.
    fn resolve(&self, path: &str) -> Result<PathBuf, BlobError> {
        ensure_zone_path_safe(path)?;
        Ok(self.root.join(path))
    }

    /// Returns the canonicalised zone root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Validates that `path` is a safe `/`-separated zone path.
///
/// This is a purely syntactic check; it does not consult the filesystem.
fn ensure_zone_path_safe(path: &str) -> Result<(), BlobError> {
    if path.is_empty() {
        return Err(BlobError::SuspiciousPath("empty path".to_owned()));
    }
    if path.starts_with('/') {
        return Err(BlobError::SuspiciousPath(format!(
            "absolute path not allowed: '{}'",
            path
        )));
    }
    if path
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(BlobError::SuspiciousPath(format!(
            "control byte or backslash in path: '{}'",
            path.escape_debug()
        )));
    }
    for segment in path.split('/') {
        if segment.is_empty() {
            return Err(BlobError::SuspiciousPath(format!(
                "empty segment in path: '{}'",
                path
            )));
        }
        if segment == "." || segment == ".." {
            return Err(BlobError::SuspiciousPath(format!(
                "relative segment in path: '{}'",
                path
            )));
        }
    }
    Ok(())
}

/// Converts a filesystem path relative to some base into a `/`-separated zone path.
fn to_zone_relative(path: &Path) -> Result<String, BlobError> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            std::path::Component::Normal(os) => {
                let s = os.to_str().ok_or_else(|| {
                    BlobError::SuspiciousPath(format!(
                        "non-UTF-8 name in zone: {}",
                        path.display()
                    ))
                })?;
                parts.push(s.to_owned());
            }
            _ => {
                return Err(BlobError::SuspiciousPath(format!(
                    "unexpected path component in: {}",
                    path.display()
                )))
            }
        }
    }
    Ok(parts.join("/"))
}

impl BlobStore for LocalBlobStore {
    fn exists(&self, path: &str) -> Result<bool, BlobError> {
        Ok(self.resolve(path)?.exists())
    }

    fn listdir(&self, path: &str) -> Result<FolderListing, BlobError> {
        let dir = self.resolve(path)?;
        if !dir.exists() {
            return Err(BlobError::NotFound(path.to_owned()));
        }
        if !dir.is_dir() {
            return Err(BlobError::WrongKind(format!("not a folder: {}", path)));
        }

        let mut listing = FolderListing::default();
        for entry in fs::read_dir(&dir).map_err(|e| {
            BlobError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to list folder {}: {}", dir.display(), e),
            ))
        })? {
            let entry = entry?;
            let name = match entry.file_name().into_string() {
                Ok(n) => n,
                Err(_) => continue,
            };
            if entry.path().is_dir() {
                listing.folders.push(name);
            } else {
                listing.files.push(name);
            }
        }
        listing.folders.sort();
        listing.files.sort();
        Ok(listing)
    }

    fn size(&self, path: &str) -> Result<u64, BlobError> {
        let file = self.resolve(path)?;
        if !file.exists() {
            return Err(BlobError::NotFound(path.to_owned()));
        }
        if file.is_dir() {
            return Err(BlobError::WrongKind(format!("not a file: {}", path)));
        }
        let meta = fs::metadata(&file).map_err(|e| {
            BlobError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to stat {}: {}", file.display(), e),
            ))
        })?;
        Ok(meta.len())
    }

    fn checksum(&self, path: &str) -> Result<String, BlobError> {
        let file = self.resolve(path)?;
        if !file.exists() {
            return Err(BlobError::NotFound(path.to_owned()));
        }
        if file.is_dir() {
            return Err(BlobError::WrongKind(format!("not a file: {}", path)));
        }

        let mut reader = fs::File::open(&file).map_err(|e| {
            BlobError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to open {}: {}", file.display(), e),
            ))
        })?;

        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];
        loop {
            let read = reader.read(&mut buffer).map_err(|e| {
                BlobError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to read {}: {}", file.display(), e),
                ))
            })?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    fn move_object(&self, src: &str, dst: &str) -> Result<(), BlobError> {
        let src_path = self.resolve(src)?;
        let dst_path = self.resolve(dst)?;

        if !src_path.exists() {
            return Err(BlobError::NotFound(src.to_owned()));
        }
        if dst_path.exists() {
            return Err(BlobError::AlreadyExists(dst.to_owned()));
        }

        if let Some(parent) = dst_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BlobError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create parent of {}: {}", dst_path.display(), e),
                ))
            })?;
        }

        fs::rename(&src_path, &dst_path).map_err(|e| {
            BlobError::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to move {} to {}: {}",
                    src_path.display(),
                    dst_path.display(),
                    e
                ),
            ))
        })
    }

    fn delete(&self, path: &str) -> Result<(), BlobError> {
        let target = self.resolve(path)?;
        if !target.exists() {
            return Err(BlobError::NotFound(path.to_owned()));
        }

        let result = if target.is_dir() {
            fs::remove_dir_all(&target)
        } else {
            fs::remove_file(&target)
        };

        result.map_err(|e| {
            BlobError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to delete {}: {}", target.display(), e),
            ))
        })
    }

    fn create_folder(&self, path: &str) -> Result<(), BlobError> {
        let dir = self.resolve(path)?;
        fs::create_dir_all(&dir).map_err(|e| {
            BlobError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create folder {}: {}", dir.display(), e),
            ))
        })
    }

    fn put_bytes(&self, path: &str, bytes: &[u8]) -> Result<(), BlobError> {
        let file = self.resolve(path)?;
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BlobError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create parent of {}: {}", file.display(), e),
                ))
            })?;
        }
        fs::write(&file, bytes).map_err(|e| {
            BlobError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to write {}: {}", file.display(), e),
            ))
        })
    }

    fn get_bytes(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        let file = self.resolve(path)?;
        if !file.exists() {
            return Err(BlobError::NotFound(path.to_owned()));
        }
        fs::read(&file).map_err(|e| {
            BlobError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read {}: {}", file.display(), e),
            ))
        })
    }

    fn zipup(&self, src_folder: &str, zip_path: &str) -> Result<(), BlobError> {
        let src = self.resolve(src_folder)?;
        let dst = self.resolve(zip_path)?;

        if !src.is_dir() {
            return Err(BlobError::NotFound(src_folder.to_owned()));
        }
        if dst.exists() {
            return Err(BlobError::AlreadyExists(zip_path.to_owned()));
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }

        let zip_file = fs::File::create(&dst).map_err(|e| {
            BlobError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create archive {}: {}", dst.display(), e),
            ))
        })?;
        let mut writer = ZipWriter::new(zip_file);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        for entry in WalkDir::new(&src).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                BlobError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("Failed to walk {}: {}", src.display(), e),
                ))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&src).map_err(|e| {
                BlobError::SuspiciousPath(format!(
                    "walked entry escapes source folder: {}",
                    e
                ))
            })?;
            let name = to_zone_relative(relative)?;
            writer.start_file(&name, options)?;
            let content = fs::read(entry.path())?;
            writer.write_all(&content)?;
        }

        writer.finish()?;
        Ok(())
    }

    fn unzip(&self, zip_path: &str, dest_folder: &str) -> Result<Vec<String>, BlobError> {
        let archive_path = self.resolve(zip_path)?;
        let dest = self.resolve(dest_folder)?;

        if !archive_path.exists() {
            return Err(BlobError::NotFound(zip_path.to_owned()));
        }

        let reader = fs::File::open(&archive_path).map_err(|e| {
            BlobError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to open archive {}: {}", archive_path.display(), e),
            ))
        })?;
        let mut archive = zip::ZipArchive::new(reader)?;

        // First pass: refuse the whole archive if any entry could escape the
        // destination folder.
        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            if entry.enclosed_name().is_none() {
                return Err(BlobError::SuspiciousPath(format!(
                    "archive entry escapes destination: '{}'",
                    entry.name()
                )));
            }
        }

        let mut extracted = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let relative = match entry.enclosed_name() {
                Some(p) => p.to_owned(),
                None => continue,
            };
            let target = dest.join(&relative);

            if entry.is_dir() {
                fs::create_dir_all(&target)?;
                continue;
            }

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = fs::File::create(&target).map_err(|e| {
                BlobError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create {}: {}", target.display(), e),
                ))
            })?;
            std::io::copy(&mut entry, &mut out)?;

            let name = to_zone_relative(&relative)?;
            extracted.push(format!("{}/{}", dest_folder, name));
        }

        extracted.sort();
        Ok(extracted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Helper to create a zone with a store over it
    fn create_zone() -> (TempDir, LocalBlobStore) {
        let temp = TempDir::new().unwrap();
        let store = LocalBlobStore::new(temp.path()).unwrap();
        (temp, store)
    }

    #[test]
    fn test_new_missing_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("non-existent");

        let store = LocalBlobStore::new(&root);

        assert!(matches!(store, Err(BlobError::InvalidRoot(_))));
    }

    #[test]
    fn test_new_root_not_directory() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("file.txt");
        fs::write(&root, "not a directory").unwrap();

        let store = LocalBlobStore::new(&root);

        assert!(matches!(store, Err(BlobError::InvalidRoot(_))));
    }

    #[test]
    fn test_put_get_round_trip() {
        let (_temp, store) = create_zone();

        store.put_bytes("res1/data/contents/a.txt", b"hello").unwrap();

        assert!(store.exists("res1/data/contents/a.txt").unwrap());
        assert_eq!(store.get_bytes("res1/data/contents/a.txt").unwrap(), b"hello");
        assert_eq!(store.size("res1/data/contents/a.txt").unwrap(), 5);
    }

    #[test]
    fn test_checksum_known_value() {
        let (_temp, store) = create_zone();

        store.put_bytes("res1/data/contents/a.txt", b"hello").unwrap();

        assert_eq!(
            store.checksum("res1/data/contents/a.txt").unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_suspicious_paths_rejected() {
        let (_temp, store) = create_zone();

        for bad in [
            "",
            "/abs/path",
            "a/../b",
            "./a",
            "a//b",
            "a/b\\c",
            "a/\u{0007}bell",
        ] {
            let result = store.exists(bad);
            assert!(
                matches!(result, Err(BlobError::SuspiciousPath(_))),
                "expected rejection for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_move_object_creates_parents() {
        let (_temp, store) = create_zone();
        store.put_bytes("res1/data/contents/a.txt", b"x").unwrap();

        store
            .move_object("res1/data/contents/a.txt", "res1/data/contents/deep/nested/b.txt")
            .unwrap();

        assert!(!store.exists("res1/data/contents/a.txt").unwrap());
        assert_eq!(
            store.get_bytes("res1/data/contents/deep/nested/b.txt").unwrap(),
            b"x"
        );
    }

    #[test]
    fn test_move_object_missing_source() {
        let (_temp, store) = create_zone();

        let result = store.move_object("res1/missing.txt", "res1/other.txt");

        assert!(matches!(result, Err(BlobError::NotFound(_))));
    }

    #[test]
    fn test_move_object_target_exists() {
        let (_temp, store) = create_zone();
        store.put_bytes("res1/a.txt", b"a").unwrap();
        store.put_bytes("res1/b.txt", b"b").unwrap();

        let result = store.move_object("res1/a.txt", "res1/b.txt");

        assert!(matches!(result, Err(BlobError::AlreadyExists(_))));
    }

    #[test]
    fn test_move_folder() {
        let (_temp, store) = create_zone();
        store.put_bytes("res1/old/one.txt", b"1").unwrap();
        store.put_bytes("res1/old/sub/two.txt", b"2").unwrap();

        store.move_object("res1/old", "res1/new").unwrap();

        assert!(!store.exists("res1/old").unwrap());
        assert_eq!(store.get_bytes("res1/new/one.txt").unwrap(), b"1");
        assert_eq!(store.get_bytes("res1/new/sub/two.txt").unwrap(), b"2");
    }

    #[test]
    fn test_delete_file_and_folder() {
        let (_temp, store) = create_zone();
        store.put_bytes("res1/f/one.txt", b"1").unwrap();
        store.put_bytes("res1/f/sub/two.txt", b"2").unwrap();
        store.put_bytes("res1/solo.txt", b"s").unwrap();

        store.delete("res1/solo.txt").unwrap();
        store.delete("res1/f").unwrap();

        assert!(!store.exists("res1/solo.txt").unwrap());
        assert!(!store.exists("res1/f").unwrap());
        assert!(matches!(
            store.delete("res1/f"),
            Err(BlobError::NotFound(_))
        ));
    }

    #[test]
    fn test_listdir_splits_and_sorts() {
        let (_temp, store) = create_zone();
        store.put_bytes("res1/data/b.txt", b"b").unwrap();
        store.put_bytes("res1/data/a.txt", b"a").unwrap();
        store.create_folder("res1/data/zfolder").unwrap();
        store.create_folder("res1/data/afolder").unwrap();

        let listing = store.listdir("res1/data").unwrap();

        assert_eq!(listing.folders, vec!["afolder", "zfolder"]);
        assert_eq!(listing.files, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_listdir_missing_folder() {
        let (_temp, store) = create_zone();

        assert!(matches!(
            store.listdir("res1/missing"),
            Err(BlobError::NotFound(_))
        ));
    }

    #[test]
    fn test_listdir_on_file() {
        let (_temp, store) = create_zone();
        store.put_bytes("res1/a.txt", b"a").unwrap();

        assert!(matches!(
            store.listdir("res1/a.txt"),
            Err(BlobError::WrongKind(_))
        ));
    }

    #[test]
    fn test_zip_unzip_round_trip() {
        let (_temp, store) = create_zone();
        store.put_bytes("res1/data/contents/f/one.txt", b"one").unwrap();
        store.put_bytes("res1/data/contents/f/sub/two.txt", b"two").unwrap();

        store
            .zipup("res1/data/contents/f", "res1/data/contents/f.zip")
            .unwrap();
        assert!(store.exists("res1/data/contents/f.zip").unwrap());

        let extracted = store
            .unzip("res1/data/contents/f.zip", "res1/data/contents/out")
            .unwrap();

        assert_eq!(
            extracted,
            vec![
                "res1/data/contents/out/one.txt".to_owned(),
                "res1/data/contents/out/sub/two.txt".to_owned(),
            ]
        );
        assert_eq!(
            store.get_bytes("res1/data/contents/out/sub/two.txt").unwrap(),
            b"two"
        );
        // Source folder is left in place
        assert!(store.exists("res1/data/contents/f/one.txt").unwrap());
    }

    #[test]
    fn test_zipup_target_exists() {
        let (_temp, store) = create_zone();
        store.put_bytes("res1/f/one.txt", b"1").unwrap();
        store.put_bytes("res1/f.zip", b"existing").unwrap();

        let result = store.zipup("res1/f", "res1/f.zip");

        assert!(matches!(result, Err(BlobError::AlreadyExists(_))));
    }

    #[test]
    fn test_unzip_rejects_escaping_entry() {
        let (temp, store) = create_zone();

        // Build an archive with a traversal entry directly on disk
        let archive_path = temp.path().join("res1").join("evil.zip");
        fs::create_dir_all(archive_path.parent().unwrap()).unwrap();
        let file = fs::File::create(&archive_path).unwrap();
        let mut writer = ZipWriter::new(file);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        writer.start_file("../escape.txt", options).unwrap();
        writer.write_all(b"pwned").unwrap();
        writer.finish().unwrap();

        let result = store.unzip("res1/evil.zip", "res1/out");

        assert!(matches!(result, Err(BlobError::SuspiciousPath(_))));
        assert!(!store.exists("res1/out").unwrap());
        assert!(!temp.path().join("escape.txt").exists());
    }
}

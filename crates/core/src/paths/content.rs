//! Typed content-space paths.
//!
//! A [`ContentPath`] names a file and a [`FolderPath`] names a folder,
//! both relative to the resource content root. Validation happens at
//! construction so the rest of the crate can treat path values as
//! well-formed.
//!
//! Names may not contain path separators, control characters, or any of
//! the characters in [`BANNED_NAME_CHARACTERS`]. The reserved names `.`
//! and `..` are rejected outright, which also rules out traversal once a
//! path reaches the blob store.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::{BANNED_NAME_CHARACTERS, MAX_NAME_LENGTH};
use crate::error::{CoreError, CoreResult};

/// Validates a single file or folder name.
///
/// # Arguments
///
/// * `name` - The candidate name, without any `/` separators
///
/// # Errors
///
/// Returns `CoreError::Validation` when the name is empty, reserved,
/// padded with whitespace, longer than [`MAX_NAME_LENGTH`] bytes, or
/// contains a separator, control character, or banned character.
pub fn validate_name(name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::Validation("name must not be empty".to_string()));
    }
    if name != name.trim() {
        return Err(CoreError::Validation(format!(
            "name '{name}' has leading or trailing whitespace"
        )));
    }
    if name == "." || name == ".." {
        return Err(CoreError::Validation(format!("name '{name}' is reserved")));
    }
    if name.contains('/') {
        return Err(CoreError::Validation(format!(
            "name '{name}' must not contain '/'"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(CoreError::Validation(format!(
            "name '{name}' contains control characters"
        )));
    }
    if let Some(banned) = name.chars().find(|c| BANNED_NAME_CHARACTERS.contains(c)) {
        return Err(CoreError::Validation(format!(
            "name '{name}' contains the banned character '{banned}'"
        )));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(CoreError::Validation(format!(
            "name exceeds {MAX_NAME_LENGTH} bytes"
        )));
    }
    Ok(())
}

fn validate_segments(raw: &str) -> CoreResult<()> {
    for segment in raw.split('/') {
        validate_name(segment)?;
    }
    Ok(())
}

/// The zone-relative path of a file inside the content root.
///
/// Content paths are plain `/`-separated strings such as
/// `a/b/logan.sqlite`. They never start or end with a separator and
/// every segment satisfies [`validate_name`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentPath(String);

impl ContentPath {
    /// Parses and validates a zone-relative file path.
    ///
    /// # Arguments
    ///
    /// * `raw` - The candidate path, e.g. `a/b/logan.sqlite`
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` when the path is empty, absolute,
    /// ends with a separator, or contains an invalid segment.
    pub fn parse(raw: &str) -> CoreResult<Self> {
        if raw.is_empty() {
            return Err(CoreError::Validation(
                "file path must not be empty".to_string(),
            ));
        }
        if raw.starts_with('/') {
            return Err(CoreError::Validation(format!(
                "file path '{raw}' must be relative to the content root"
            )));
        }
        if raw.ends_with('/') {
            return Err(CoreError::Validation(format!(
                "file path '{raw}' must not end with '/'"
            )));
        }
        validate_segments(raw)?;
        Ok(Self(raw.to_string()))
    }

    /// Builds a path from segments that are already known to be valid.
    pub(crate) fn from_validated(path: String) -> Self {
        Self(path)
    }

    /// Returns the path as a zone-relative string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the final segment, including any extension.
    #[must_use]
    pub fn file_name(&self) -> &str {
        match self.0.rsplit_once('/') {
            Some((_, name)) => name,
            None => &self.0,
        }
    }

    /// Returns the file name with its final extension removed.
    ///
    /// A name without a dot, or with nothing before its only dot, is
    /// returned unchanged.
    #[must_use]
    pub fn stem(&self) -> &str {
        let name = self.file_name();
        match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => name,
        }
    }

    /// Returns the final extension, without the dot.
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
            _ => None,
        }
    }

    /// Returns the folder containing this file.
    #[must_use]
    pub fn folder(&self) -> FolderPath {
        match self.0.rsplit_once('/') {
            Some((folder, _)) => FolderPath(folder.to_string()),
            None => FolderPath::root(),
        }
    }

    /// Returns true when the file sits directly inside `folder`.
    #[must_use]
    pub fn is_in_folder(&self, folder: &FolderPath) -> bool {
        self.folder() == *folder
    }

    /// Returns true when the file lies anywhere below `folder`.
    #[must_use]
    pub fn is_under(&self, folder: &FolderPath) -> bool {
        folder.is_root() || self.0.starts_with(&format!("{}/", folder.0))
    }

    /// Rewrites the path of a file that lives under `from` so that it
    /// lives under `to` instead.
    ///
    /// Callers must ensure `self.is_under(from)` first.
    pub(crate) fn rebase(&self, from: &FolderPath, to: &FolderPath) -> Self {
        let tail = if from.is_root() {
            self.0.as_str()
        } else {
            &self.0[from.0.len() + 1..]
        };
        if to.is_root() {
            Self(tail.to_string())
        } else {
            Self(format!("{}/{tail}", to.0))
        }
    }
}

impl fmt::Display for ContentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for ContentPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ContentPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(de::Error::custom)
    }
}

/// The zone-relative path of a folder inside the content root.
///
/// The content root itself is the empty folder path, written `/` for
/// display. Non-root folder paths follow the same segment rules as
/// [`ContentPath`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FolderPath(String);

impl FolderPath {
    /// Returns the content root folder.
    #[must_use]
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Parses and validates a zone-relative folder path.
    ///
    /// Leading and trailing separators are tolerated, so `""`, `/` and
    /// `a/b/` all parse. An empty path is the content root.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` when any segment is invalid.
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        validate_segments(trimmed)?;
        Ok(Self(trimmed.to_string()))
    }

    /// Builds a folder path from segments already known to be valid.
    pub(crate) fn from_validated(path: String) -> Self {
        Self(path)
    }

    /// Returns true for the content root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the path as a zone-relative string, empty for the root.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the folder's own name, empty for the root.
    #[must_use]
    pub fn name(&self) -> &str {
        match self.0.rsplit_once('/') {
            Some((_, name)) => name,
            None => &self.0,
        }
    }

    /// Returns the enclosing folder, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rsplit_once('/') {
            Some((parent, _)) => Some(Self(parent.to_string())),
            None => Some(Self::root()),
        }
    }

    /// Appends a folder name, validating it first.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` when the name is invalid.
    pub fn join(&self, name: &str) -> CoreResult<Self> {
        validate_name(name)?;
        if self.is_root() {
            Ok(Self(name.to_string()))
        } else {
            Ok(Self(format!("{}/{name}", self.0)))
        }
    }

    /// Builds the path of a file directly inside this folder.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` when the name is invalid.
    pub fn file(&self, name: &str) -> CoreResult<ContentPath> {
        validate_name(name)?;
        if self.is_root() {
            Ok(ContentPath(name.to_string()))
        } else {
            Ok(ContentPath(format!("{}/{name}", self.0)))
        }
    }

    /// Returns true when this folder equals `other` or lies inside it.
    #[must_use]
    pub fn is_under(&self, other: &Self) -> bool {
        other.is_root() || self == other || self.0.starts_with(&format!("{}/", other.0))
    }

    /// Returns the number of segments, zero for the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.matches('/').count() + 1
        }
    }

    /// Rewrites a folder that lies under `from` so that it lies under
    /// `to` instead.
    ///
    /// Callers must ensure `self.is_under(from)` first.
    pub(crate) fn rebase(&self, from: &Self, to: &Self) -> Self {
        if self == from {
            return to.clone();
        }
        let tail = if from.is_root() {
            self.0.as_str()
        } else {
            &self.0[from.0.len() + 1..]
        };
        if to.is_root() {
            Self(tail.to_string())
        } else {
            Self(format!("{}/{tail}", to.0))
        }
    }
}

impl fmt::Display for FolderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl Serialize for FolderPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for FolderPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name_accepts_ordinary_names() {
        assert!(validate_name("logan.sqlite").is_ok());
        assert!(validate_name("New Folder").is_ok());
        assert!(validate_name("précipitation").is_ok());
    }

    #[test]
    fn test_validate_name_rejects_banned_characters() {
        for c in BANNED_NAME_CHARACTERS {
            let name = format!("bad{c}name");
            assert!(
                matches!(validate_name(&name), Err(CoreError::Validation(_))),
                "'{c}' should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_name_rejects_reserved_and_padded_names() {
        assert!(matches!(validate_name("."), Err(CoreError::Validation(_))));
        assert!(matches!(validate_name(".."), Err(CoreError::Validation(_))));
        assert!(matches!(validate_name(""), Err(CoreError::Validation(_))));
        assert!(matches!(
            validate_name(" padded"),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            validate_name("padded "),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_name_rejects_control_characters() {
        assert!(matches!(
            validate_name("line\nbreak"),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_name_rejects_overlong_names() {
        let name = "a".repeat(MAX_NAME_LENGTH + 1);
        assert!(matches!(
            validate_name(&name),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_content_path_parse_rejects_malformed_paths() {
        assert!(matches!(
            ContentPath::parse(""),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            ContentPath::parse("/abs.txt"),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            ContentPath::parse("a/"),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            ContentPath::parse("a//b.txt"),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            ContentPath::parse("a/../b.txt"),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_content_path_components() {
        let path = ContentPath::parse("a/b/logan.sqlite").unwrap();
        assert_eq!(path.file_name(), "logan.sqlite");
        assert_eq!(path.stem(), "logan");
        assert_eq!(path.extension(), Some("sqlite"));
        assert_eq!(path.folder().as_str(), "a/b");
    }

    #[test]
    fn test_content_path_components_without_extension() {
        let path = ContentPath::parse("notes").unwrap();
        assert_eq!(path.file_name(), "notes");
        assert_eq!(path.stem(), "notes");
        assert_eq!(path.extension(), None);
        assert!(path.folder().is_root());
    }

    #[test]
    fn test_stem_keeps_all_but_final_extension() {
        let path = ContentPath::parse("obs/archive.refts.json").unwrap();
        assert_eq!(path.stem(), "archive.refts");
        assert_eq!(path.extension(), Some("json"));
    }

    #[test]
    fn test_dotfile_has_no_extension() {
        let path = ContentPath::parse(".gitignore").unwrap();
        assert_eq!(path.stem(), ".gitignore");
        assert_eq!(path.extension(), None);
    }

    #[test]
    fn test_is_under_and_is_in_folder() {
        let path = ContentPath::parse("a/raster/cell.tif").unwrap();
        let raster = FolderPath::parse("a/raster").unwrap();
        let a = FolderPath::parse("a").unwrap();
        let other = FolderPath::parse("a/ras").unwrap();
        assert!(path.is_in_folder(&raster));
        assert!(!path.is_in_folder(&a));
        assert!(path.is_under(&raster));
        assert!(path.is_under(&a));
        assert!(path.is_under(&FolderPath::root()));
        assert!(!path.is_under(&other));
    }

    #[test]
    fn test_rebase_rewrites_prefix_only() {
        let path = ContentPath::parse("a/raster/cell.tif").unwrap();
        let from = FolderPath::parse("a").unwrap();
        let to = FolderPath::parse("b/c").unwrap();
        assert_eq!(path.rebase(&from, &to).as_str(), "b/c/raster/cell.tif");

        let from_root = path.rebase(&FolderPath::root(), &from);
        assert_eq!(from_root.as_str(), "a/a/raster/cell.tif");

        let to_root = path.rebase(&from, &FolderPath::root());
        assert_eq!(to_root.as_str(), "raster/cell.tif");
    }

    #[test]
    fn test_folder_parse_accepts_root_spellings() {
        assert!(FolderPath::parse("").unwrap().is_root());
        assert!(FolderPath::parse("/").unwrap().is_root());
        assert_eq!(FolderPath::parse("a/b/").unwrap().as_str(), "a/b");
        assert_eq!(FolderPath::parse("/a/b").unwrap().as_str(), "a/b");
    }

    #[test]
    fn test_folder_join_parent_and_name() {
        let root = FolderPath::root();
        let a = root.join("a").unwrap();
        let ab = a.join("b").unwrap();
        assert_eq!(ab.as_str(), "a/b");
        assert_eq!(ab.name(), "b");
        assert_eq!(ab.parent(), Some(a.clone()));
        assert_eq!(a.parent(), Some(root.clone()));
        assert_eq!(root.parent(), None);
        assert!(matches!(a.join("x/y"), Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_folder_is_under_includes_itself() {
        let a = FolderPath::parse("a").unwrap();
        let ab = FolderPath::parse("a/b").unwrap();
        assert!(ab.is_under(&a));
        assert!(a.is_under(&a));
        assert!(a.is_under(&FolderPath::root()));
        assert!(!a.is_under(&ab));
        assert!(!FolderPath::root().is_under(&a));
    }

    #[test]
    fn test_folder_depth() {
        assert_eq!(FolderPath::root().depth(), 0);
        assert_eq!(FolderPath::parse("a").unwrap().depth(), 1);
        assert_eq!(FolderPath::parse("a/b/c").unwrap().depth(), 3);
    }

    #[test]
    fn test_folder_rebase_handles_the_folder_itself() {
        let from = FolderPath::parse("a/raster").unwrap();
        let to = FolderPath::parse("a/raster_1").unwrap();
        assert_eq!(from.rebase(&from, &to), to);

        let nested = FolderPath::parse("a/raster/tiles").unwrap();
        assert_eq!(nested.rebase(&from, &to).as_str(), "a/raster_1/tiles");
    }

    #[test]
    fn test_serde_round_trip_revalidates() {
        let path = ContentPath::parse("a/logan.sqlite").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"a/logan.sqlite\"");
        let back: ContentPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);

        let bad: Result<ContentPath, _> = serde_json::from_str("\"a/bad:name\"");
        assert!(bad.is_err());

        let folder: FolderPath = serde_json::from_str("\"\"").unwrap();
        assert!(folder.is_root());
    }
}

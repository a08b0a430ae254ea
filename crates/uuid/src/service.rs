//! Implementation of [`ResourceId`].

use crate::{UuidError, UuidResult};
use std::{fmt, str::FromStr};

/// Re-exported for embedders that need the underlying type.
pub use ::uuid::Uuid;

/// A resource identifier in canonical form.
///
/// The canonical form is 32 lowercase hex characters with no hyphens, which is
/// exactly what `Uuid::new_v4().simple()` prints. Zone keys, metadata documents,
/// and the CLI all exchange identifiers in this form, and this type refuses any
/// other spelling so a resource can never end up split across two key prefixes.
///
/// # Construction
///
/// [`ResourceId::generate`] allocates an identifier for a new resource;
/// [`ResourceId::parse`] checks an externally supplied string. There is no
/// constructor that normalises: a hyphenated or uppercase identifier is the
/// caller's bug to fix, not this type's to repair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId(Uuid);

impl ResourceId {
    /// Allocates a fresh identifier for a new resource.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps `input`, which must already be canonical.
    ///
    /// # Errors
    ///
    /// Returns [`UuidError::InvalidInput`] if `input` is not 32 lowercase hex
    /// characters.
    pub fn parse(input: &str) -> UuidResult<Self> {
        if Self::is_canonical(input) {
            // is_canonical guarantees valid hex, so parse_str cannot fail
            let uuid = Uuid::parse_str(input)
                .map_err(|e| UuidError::InvalidInput(format!("unparseable identifier: {}", e)))?;
            return Ok(Self(uuid));
        }
        Err(UuidError::InvalidInput(format!(
            "expected 32 lowercase hex characters without hyphens, got: '{}'",
            input
        )))
    }

    /// Returns a copy of the inner UUID.
    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// Returns the canonical string form of this identifier.
    pub fn as_simple(&self) -> String {
        self.0.simple().to_string()
    }

    /// Reports whether `input` is already in canonical form.
    ///
    /// Purely syntactic: the string must be exactly 32 bytes of `0-9` and
    /// `a-f`. Anything else, including valid UUIDs in other spellings, is
    /// rejected.
    pub fn is_canonical(input: &str) -> bool {
        input.len() == 32
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }
}

impl fmt::Display for ResourceId {
    /// Always prints the canonical form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for ResourceId {
    type Err = UuidError;

    /// Equivalent to [`ResourceId::parse`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceId::parse(s)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for ResourceId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.as_simple())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for ResourceId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ResourceId::parse(&s).map_err(serde::de::Error::custom)
    }
}

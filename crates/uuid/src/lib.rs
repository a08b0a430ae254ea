//! Resource identifier utilities.
//!
//! Every object in a CDR storage zone lives under a key of the form
//! `<resource_id>/data/contents/...`, so the identifier at the front of the key
//! has to be written one way only. CDR fixes that spelling to the *simple* form
//! of a v4 UUID: 32 lowercase hexadecimal characters, no hyphens
//! (`550e8400e29b41d4a716446655440000`).
//!
//! [`ResourceId`] is the wrapper that enforces this. It can only be obtained by
//! generating a fresh identifier or by parsing a string already in canonical
//! form; hyphenated, uppercase, or otherwise non-canonical inputs are rejected
//! rather than normalised. Holding a `ResourceId` therefore means the value is
//! safe to splice into a zone key as-is.

mod service;

// Re-export public types
pub use service::{ResourceId, Uuid};

/// Error type for identifier operations.
#[derive(Debug, thiserror::Error)]
pub enum UuidError {
    /// The supplied string is not a canonical identifier
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for identifier operations.
pub type UuidResult<T> = Result<T, UuidError>;

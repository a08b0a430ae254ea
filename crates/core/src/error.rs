use cdr_files::BlobError;

/// Errors surfaced by CDR's domain engine.
///
/// The taxonomy mirrors how callers must react:
/// - [`Validation`] is caller-correctable (bad name, duplicate path, operation the
///   aggregation type refuses, edits to a published resource)
/// - [`NotFound`] names a file, folder, or aggregation that does not exist
/// - [`Unauthorised`] is the refused caller precondition
/// - [`Transport`] is a storage-zone failure; earlier steps of the operation are
///   **not** rolled back and a reconcile sweep repairs any drift
///
/// [`Validation`]: CoreError::Validation
/// [`NotFound`]: CoreError::NotFound
/// [`Unauthorised`]: CoreError::Unauthorised
/// [`Transport`]: CoreError::Transport
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not authorised: {0}")]
    Unauthorised(String),
    #[error("storage zone failure: {0}")]
    Transport(#[from] BlobError),
    #[error("failed to parse metadata document: {0}")]
    DocumentParse(String),
    #[error("failed to update data file: {0}")]
    DataFileUpdate(String),
    #[error("invalid text: {0}")]
    Text(#[from] cdr_types::TextError),
    #[error("invalid identifier: {0}")]
    Identifier(#[from] cdr_uuid::UuidError),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

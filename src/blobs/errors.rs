//! Blob error types

use thiserror::Error;

/// Result type for blob operations
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors raised while decoding, validating or reading release blobs.
#[derive(Debug, Clone, Error)]
pub enum BlobError {
    /// The document carries no integer `schema_version`
    #[error("blob has no schema_version field")]
    MissingSchemaVersion,

    /// No decoder is registered for this schema version
    #[error("no blob type registered for schema_version {0}")]
    UnknownSchema(u64),

    /// The document violates its schema's format descriptor
    #[error("invalid blob at '{path}': {reason}")]
    Invalid {
        /// Dotted path to the offending key
        path: String,
        /// What was wrong there
        reason: String,
    },

    /// A requested platform or locale does not exist in the blob
    #[error("{0} not found in blob")]
    NotFound(String),
}

impl BlobError {
    /// Shorthand for a validation failure at a key path.
    pub fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        BlobError::Invalid {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

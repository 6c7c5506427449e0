//! Release-table error types

use thiserror::Error;

use crate::blobs::BlobError;
use crate::versioned::VersionedError;

/// Result type for release operations
pub type ReleasesResult<T> = Result<T, ReleasesError>;

/// Errors raised by release-table operations.
#[derive(Debug, Error)]
pub enum ReleasesError {
    /// The release is marked read-only and cannot be modified
    #[error("release '{0}' is read-only")]
    ReadOnly(String),

    /// The release's blob data is invalid
    #[error(transparent)]
    Blob(#[from] BlobError),

    /// The underlying versioned table rejected the operation
    #[error(transparent)]
    Versioned(#[from] VersionedError),
}

impl ReleasesError {
    /// Whether retrying the whole unit of work may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReleasesError::Versioned(err) => err.is_retryable(),
            _ => false,
        }
    }
}

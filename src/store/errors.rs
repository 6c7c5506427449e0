//! Storage error types
//!
//! Transient store failures get their own class so callers can decide to
//! retry a bounded number of times. Everything else is fatal to the request.

use thiserror::Error;

/// Result type for raw store operations
pub type StoreResult<T> = Result<T, StorageError>;

/// Transient storage failures.
///
/// These are the only storage-level errors a caller is allowed to retry.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Row snapshot could not be serialized for the history table
    #[error("storage serialization failed: {0}")]
    Serialization(String),

    /// The backing store rejected or lost the write
    #[error("storage write failed: {0}")]
    WriteFailed(String),

    /// Connection to the backing store was lost mid-operation
    #[error("storage connection lost: {0}")]
    ConnectionLost(String),
}

impl StorageError {
    /// All storage errors are considered transient and retryable.
    pub fn is_retryable(&self) -> bool {
        true
    }
}

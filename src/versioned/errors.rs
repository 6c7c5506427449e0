//! Versioned-table error types
//!
//! `OutdatedData` is the only error class a caller may retry after a fresh
//! read; the table itself never retries anything.

use thiserror::Error;

use crate::store::StorageError;

/// Result type for versioned-table operations
pub type VersionedResult<T> = Result<T, VersionedError>;

/// Errors raised by a versioned table.
#[derive(Debug, Clone, Error)]
pub enum VersionedError {
    /// No row with the given primary key
    #[error("{table}: row {key} not found")]
    NotFound {
        /// Logical table name
        table: &'static str,
        /// Debug rendering of the missing key
        key: String,
    },

    /// An insert collided with an existing row
    #[error("{table}: row {key} already exists")]
    AlreadyExists {
        /// Logical table name
        table: &'static str,
        /// Debug rendering of the colliding key
        key: String,
    },

    /// The caller's expected data version no longer matches the row
    #[error("{table}: row {key} has data_version {actual}, caller expected {expected}")]
    OutdatedData {
        /// Logical table name
        table: &'static str,
        /// Debug rendering of the contested key
        key: String,
        /// Version the caller read before mutating
        expected: u64,
        /// Version currently on the row
        actual: u64,
    },

    /// An update tried to change the row's primary key
    #[error("{table}: primary key of row {key} is immutable")]
    ImmutableKey {
        /// Logical table name
        table: &'static str,
        /// Debug rendering of the row's original key
        key: String,
    },

    /// Transient storage failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl VersionedError {
    /// Whether a caller holding a fresh read may retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VersionedError::OutdatedData { .. } | VersionedError::Storage(_)
        )
    }
}

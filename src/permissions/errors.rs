//! Permission error types

use thiserror::Error;

use crate::versioned::VersionedError;

/// Result type for permission operations
pub type PermissionsResult<T> = Result<T, PermissionsError>;

/// Errors raised by permission and role management.
#[derive(Debug, Error)]
pub enum PermissionsError {
    /// The acting user lacks the right to perform the operation
    #[error("permission denied: '{username}' may not {action}")]
    Denied {
        /// Who attempted the operation
        username: String,
        /// What they attempted
        action: String,
    },

    /// The permission name is not one the system knows
    #[error("unknown permission '{0}'")]
    UnknownPermission(String),

    /// The underlying versioned table rejected the operation
    #[error(transparent)]
    Versioned(#[from] VersionedError),
}

//! Scheduled-change error types

use thiserror::Error;

use crate::versioned::VersionedError;

/// Result type for scheduled-change operations
pub type ScheduledResult<T> = Result<T, ScheduledError>;

/// Errors raised by the scheduled-change lifecycle.
#[derive(Debug, Error)]
pub enum ScheduledError {
    /// The change was already enacted; enacted changes are terminal
    #[error("scheduled change {0} is already complete")]
    AlreadyComplete(u64),

    /// The change's scheduled time has not arrived yet
    #[error("scheduled change {sc_id} is not ready: when={when}, now={now}")]
    NotReady {
        sc_id: u64,
        /// Millisecond timestamp the change is scheduled for
        when: i64,
        /// Millisecond timestamp of the enact attempt
        now: i64,
    },

    /// A required role has not collected enough signoffs
    #[error("role '{role}' requires {required} signoff(s), has {have}")]
    SignoffRequired {
        role: String,
        required: u32,
        have: u32,
    },

    /// No signoff by this user exists on the change
    #[error("no signoff by '{username}' on scheduled change {sc_id}")]
    SignoffNotFound { sc_id: u64, username: String },

    /// The user already signed off in a different role
    #[error("'{username}' already signed off on change {sc_id} as '{held}'")]
    SignoffRoleConflict {
        sc_id: u64,
        username: String,
        /// The role the existing signoff was made in
        held: String,
    },

    /// The user does not hold the role they tried to sign off in
    #[error("'{username}' does not hold role '{role}'")]
    RoleNotHeld { username: String, role: String },

    /// The proposed change is internally inconsistent
    #[error("invalid scheduled change: {0}")]
    InvalidChange(String),

    /// The underlying versioned table rejected the operation
    #[error(transparent)]
    Versioned(#[from] VersionedError),
}

//! Scheduled-change row types

use serde::{Deserialize, Serialize};

use crate::versioned::Record;

/// What a scheduled change will do to its target row when enacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// A pending (or completed) change against one row of a target table.
///
/// The change carries the full proposed row (`base`) for inserts and
/// updates, and the target row's expected `data_version`
/// (`base_data_version`) for updates and deletes, so enactment goes
/// through the same optimistic-concurrency check as a direct write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "R: Record")]
pub struct ScheduledChange<R: Record> {
    /// Unique id of this scheduled change
    pub sc_id: u64,
    /// Who proposed it
    pub scheduled_by: String,
    /// Insert, update or delete
    pub change_type: ChangeType,
    /// Millisecond timestamp the change may be enacted at
    pub when: i64,
    /// Set once enacted; complete changes are immutable
    pub complete: bool,
    /// Primary key of the target row
    pub base_key: R::Key,
    /// The proposed row; `None` for deletes
    pub base: Option<R>,
    /// Expected target data_version; `None` for inserts
    pub base_data_version: Option<u64>,
    /// Optimistic-concurrency counter of the change row itself
    pub data_version: u64,
}

impl<R: Record> Record for ScheduledChange<R> {
    type Key = u64;

    fn key(&self) -> u64 {
        self.sc_id
    }

    fn data_version(&self) -> u64 {
        self.data_version
    }

    fn set_data_version(&mut self, version: u64) {
        self.data_version = version;
    }
}

/// How many signoffs a role must contribute before changes in a
/// (product, channel) scope may be enacted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiredSignoff {
    pub product: String,
    pub channel: String,
    pub role: String,
    pub signoffs_required: u32,
    /// Optimistic-concurrency counter
    pub data_version: u64,
}

impl Record for RequiredSignoff {
    type Key = (String, String, String);

    fn key(&self) -> (String, String, String) {
        (
            self.product.clone(),
            self.channel.clone(),
            self.role.clone(),
        )
    }

    fn data_version(&self) -> u64 {
        self.data_version
    }

    fn set_data_version(&mut self, version: u64) {
        self.data_version = version;
    }
}

//! Append-only history rows
//!
//! Every mutation of a versioned table appends here. Rows are never
//! mutated or deleted; `change_id` is monotonic per table.

use serde_json::Value;

/// One history row.
///
/// `snapshot` is the full row as it stood *before* the mutation took
/// effect; `None` means the row did not exist. An insert appends two rows,
/// one absent-snapshot and one full-snapshot, so the "did not exist" to
/// "exists" transition is preserved.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry<K> {
    /// Monotonic change counter, scoped to one table.
    pub change_id: u64,
    /// Identity that performed the mutation.
    pub changed_by: String,
    /// Millisecond timestamp. For the absent-snapshot half of an insert
    /// this is recorded one millisecond earlier than the full-snapshot
    /// half, so a lifecycle stays strictly ordered even under fast clocks.
    pub timestamp: i64,
    /// Primary key of the affected row.
    pub key: K,
    /// Row state before the mutation, or `None` for "did not exist".
    pub snapshot: Option<Value>,
}

impl<K> HistoryEntry<K> {
    /// True if this entry records a row that did not exist at `timestamp`.
    pub fn is_absent(&self) -> bool {
        self.snapshot.is_none()
    }
}

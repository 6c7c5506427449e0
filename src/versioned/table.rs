//! Optimistic-concurrency table wrapper
//!
//! Wraps one logical table of rows each carrying a `data_version` column.
//! Mutations run inside a single critical section: re-read, version
//! compare, apply, append history — all or nothing. Between two callers
//! racing to update or delete the same row, at most one succeeds; the
//! loser observes `OutdatedData` and must re-read before retrying. The
//! table performs no implicit retry.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::observability::{AuditAction, AuditLog, AuditRecord, Logger, NullAuditLog};
use crate::store::{Clock, StorageError};

use super::errors::{VersionedError, VersionedResult};
use super::history::HistoryEntry;

/// A row type storable in a versioned table.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Primary key type.
    type Key: Clone + Eq + Ord + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Returns the row's primary key. Immutable for the row's lifetime.
    fn key(&self) -> Self::Key;

    /// Returns the row's optimistic-concurrency counter.
    fn data_version(&self) -> u64;

    /// Overwrites the row's optimistic-concurrency counter. Only the table
    /// calls this.
    fn set_data_version(&mut self, version: u64);
}

struct TableInner<R: Record> {
    rows: BTreeMap<R::Key, R>,
    history: Vec<HistoryEntry<R::Key>>,
    next_change_id: u64,
}

/// Generic optimistic-concurrency + audit-history wrapper around one table.
pub struct VersionedTable<R: Record> {
    name: &'static str,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditLog>,
    inner: RwLock<TableInner<R>>,
}

impl<R: Record> VersionedTable<R> {
    /// Creates an empty table with no audit sink.
    pub fn new(name: &'static str, clock: Arc<dyn Clock>) -> Self {
        Self::with_audit(name, clock, Arc::new(NullAuditLog))
    }

    /// Creates an empty table wired to an audit log.
    pub fn with_audit(name: &'static str, clock: Arc<dyn Clock>, audit: Arc<dyn AuditLog>) -> Self {
        Self {
            name,
            clock,
            audit,
            inner: RwLock::new(TableInner {
                rows: BTreeMap::new(),
                history: Vec::new(),
                next_change_id: 1,
            }),
        }
    }

    /// The logical table name, used in errors and audit records.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Inserts a new row. The row must not already exist by primary key.
    ///
    /// Sets `data_version` to 1 and appends two history rows: the absent
    /// snapshot (one millisecond earlier) and the inserted row.
    pub fn insert(&self, mut row: R, changed_by: &str) -> VersionedResult<R> {
        let key = row.key();
        let mut inner = self.inner.write().expect("table lock poisoned");
        if inner.rows.contains_key(&key) {
            return Err(VersionedError::AlreadyExists {
                table: self.name,
                key: format!("{:?}", key),
            });
        }

        row.set_data_version(1);
        let snapshot = snapshot_row(self.name, &row)?;
        let now = self.clock.now_millis();

        push_history(&mut inner, changed_by, now - 1, key.clone(), None);
        push_history(&mut inner, changed_by, now, key.clone(), Some(snapshot));
        inner.rows.insert(key.clone(), row.clone());
        drop(inner);

        self.audit_mutation(AuditAction::Insert, changed_by, &key, now);
        Ok(row)
    }

    /// Applies `changes` to the row at `key`, atomically.
    ///
    /// Fails with `OutdatedData` if the row's current `data_version` is not
    /// `old_data_version`; fails with `NotFound` if the row is gone. The
    /// closure may not rewrite the row's primary key; that fails with
    /// `ImmutableKey` and stores nothing. On success the version is
    /// incremented by one, a single pre-image history row is appended,
    /// and the new version is returned.
    pub fn update<F>(
        &self,
        key: &R::Key,
        old_data_version: u64,
        changed_by: &str,
        changes: F,
    ) -> VersionedResult<u64>
    where
        F: FnOnce(&mut R),
    {
        let mut inner = self.inner.write().expect("table lock poisoned");
        let current = inner
            .rows
            .get(key)
            .ok_or_else(|| VersionedError::NotFound {
                table: self.name,
                key: format!("{:?}", key),
            })?
            .clone();

        if current.data_version() != old_data_version {
            return Err(VersionedError::OutdatedData {
                table: self.name,
                key: format!("{:?}", key),
                expected: old_data_version,
                actual: current.data_version(),
            });
        }

        let pre_image = snapshot_row(self.name, &current)?;
        let mut updated = current.clone();
        changes(&mut updated);
        if updated.key() != *key {
            return Err(VersionedError::ImmutableKey {
                table: self.name,
                key: format!("{:?}", key),
            });
        }
        let new_version = current.data_version() + 1;
        updated.set_data_version(new_version);

        let now = self.clock.now_millis();
        push_history(&mut inner, changed_by, now, key.clone(), Some(pre_image));
        inner.rows.insert(key.clone(), updated);
        drop(inner);

        self.audit_mutation(AuditAction::Update, changed_by, key, now);
        Ok(new_version)
    }

    /// Removes the row at `key` after the same version check as `update`,
    /// appending one pre-delete history row.
    pub fn delete(
        &self,
        key: &R::Key,
        old_data_version: u64,
        changed_by: &str,
    ) -> VersionedResult<()> {
        let mut inner = self.inner.write().expect("table lock poisoned");
        let current = inner
            .rows
            .get(key)
            .ok_or_else(|| VersionedError::NotFound {
                table: self.name,
                key: format!("{:?}", key),
            })?
            .clone();

        if current.data_version() != old_data_version {
            return Err(VersionedError::OutdatedData {
                table: self.name,
                key: format!("{:?}", key),
                expected: old_data_version,
                actual: current.data_version(),
            });
        }

        let pre_image = snapshot_row(self.name, &current)?;
        let now = self.clock.now_millis();
        push_history(&mut inner, changed_by, now, key.clone(), Some(pre_image));
        inner.rows.remove(key);
        drop(inner);

        self.audit_mutation(AuditAction::Delete, changed_by, key, now);
        Ok(())
    }

    /// Returns the row at `key`, if any. Snapshot read, no version
    /// semantics.
    pub fn get(&self, key: &R::Key) -> Option<R> {
        self.inner
            .read()
            .expect("table lock poisoned")
            .rows
            .get(key)
            .cloned()
    }

    /// Like `get`, but a missing row is an error.
    pub fn get_required(&self, key: &R::Key) -> VersionedResult<R> {
        self.get(key).ok_or_else(|| VersionedError::NotFound {
            table: self.name,
            key: format!("{:?}", key),
        })
    }

    /// Returns every row matching `predicate`, in key order.
    pub fn select_where<P>(&self, predicate: P) -> Vec<R>
    where
        P: Fn(&R) -> bool,
    {
        self.inner
            .read()
            .expect("table lock poisoned")
            .rows
            .values()
            .filter(|row| predicate(row))
            .cloned()
            .collect()
    }

    /// Returns every row, in key order.
    pub fn select_all(&self) -> Vec<R> {
        self.select_where(|_| true)
    }

    /// Number of live rows.
    pub fn len(&self) -> usize {
        self.inner.read().expect("table lock poisoned").rows.len()
    }

    /// True if the table holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full history, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry<R::Key>> {
        self.inner
            .read()
            .expect("table lock poisoned")
            .history
            .clone()
    }

    /// History restricted to one primary key, oldest first.
    pub fn history_for(&self, key: &R::Key) -> Vec<HistoryEntry<R::Key>> {
        self.inner
            .read()
            .expect("table lock poisoned")
            .history
            .iter()
            .filter(|entry| &entry.key == key)
            .cloned()
            .collect()
    }

    fn audit_mutation(&self, action: AuditAction, changed_by: &str, key: &R::Key, now: i64) {
        let record = AuditRecord::new(now, self.name, action, changed_by, format!("{:?}", key));
        // The primary mutation already succeeded; an audit failure is an
        // observability event, not a caller-visible error.
        if let Err(err) = self.audit.record(record) {
            Logger::warn(
                "AUDIT_WRITE_FAILED",
                &[
                    ("table", self.name),
                    ("action", action.as_str()),
                    ("error", &err.to_string()),
                ],
            );
        }
    }
}

fn snapshot_row<R: Record>(table: &'static str, row: &R) -> VersionedResult<serde_json::Value> {
    serde_json::to_value(row).map_err(|e| {
        VersionedError::Storage(StorageError::Serialization(format!("{}: {}", table, e)))
    })
}

fn push_history<R: Record>(
    inner: &mut TableInner<R>,
    changed_by: &str,
    timestamp: i64,
    key: R::Key,
    snapshot: Option<serde_json::Value>,
) {
    let change_id = inner.next_change_id;
    inner.next_change_id += 1;
    inner.history.push(HistoryEntry {
        change_id,
        changed_by: changed_by.to_string(),
        timestamp,
        key,
        snapshot,
    });
}

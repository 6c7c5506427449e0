//! Append-only audit log
//!
//! Every mutation that goes through a versioned table is recorded here in
//! addition to the table's own history. The audit trail is best-effort
//! relative to the primary invariant that the live row is always correct:
//! an audit write failure is logged and reported to no caller.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::store::StorageError;

/// The kind of operation being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    /// A row was inserted.
    Insert,
    /// A row was updated.
    Update,
    /// A row was deleted.
    Delete,
    /// A scheduled change was proposed.
    ChangeProposed,
    /// A signoff was added to a scheduled change.
    SignoffAdded,
    /// A signoff was revoked from a scheduled change.
    SignoffRevoked,
    /// A scheduled change was enacted.
    ChangeEnacted,
}

impl AuditAction {
    /// Returns the action name string.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Insert => "INSERT",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::ChangeProposed => "CHANGE_PROPOSED",
            AuditAction::SignoffAdded => "SIGNOFF_ADDED",
            AuditAction::SignoffRevoked => "SIGNOFF_REVOKED",
            AuditAction::ChangeEnacted => "CHANGE_ENACTED",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single audit record.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    /// Millisecond timestamp of the action.
    pub timestamp: i64,
    /// Logical table the action applied to.
    pub table: String,
    /// The action.
    pub action: AuditAction,
    /// Identity that performed the action.
    pub changed_by: String,
    /// Debug rendering of the affected primary key.
    pub key: String,
}

impl AuditRecord {
    /// Creates a record for the given table, action, actor and key.
    pub fn new(
        timestamp: i64,
        table: impl Into<String>,
        action: AuditAction,
        changed_by: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            table: table.into(),
            action,
            changed_by: changed_by.into(),
            key: key.into(),
        }
    }

    fn as_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\n",
            self.timestamp, self.table, self.action, self.changed_by, self.key
        )
    }
}

/// Sink for audit records. Append-only; implementations never rewrite or
/// drop previously accepted records.
pub trait AuditLog: Send + Sync {
    /// Appends one record.
    fn record(&self, record: AuditRecord) -> Result<(), StorageError>;
}

/// In-memory audit log for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything recorded so far.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit log poisoned").clone()
    }
}

impl AuditLog for MemoryAuditLog {
    fn record(&self, record: AuditRecord) -> Result<(), StorageError> {
        self.records.lock().expect("audit log poisoned").push(record);
        Ok(())
    }
}

/// File-backed audit log, one tab-separated line per record.
#[derive(Debug)]
pub struct FileAuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileAuditLog {
    /// Creates a log that appends to the given path.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }
}

impl AuditLog for FileAuditLog {
    fn record(&self, record: AuditRecord) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().expect("audit log poisoned");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        file.write_all(record.as_line().as_bytes())
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        file.flush()
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        Ok(())
    }
}

/// Audit log that drops everything. Useful when a caller wires up tables
/// without an audit requirement.
#[derive(Debug, Default)]
pub struct NullAuditLog;

impl AuditLog for NullAuditLog {
    fn record(&self, _record: AuditRecord) -> Result<(), StorageError> {
        Ok(())
    }
}

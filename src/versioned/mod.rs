//! Versioned data layer
//!
//! Every mutable table in the system is a `VersionedTable`: rows carry a
//! `data_version` optimistic-concurrency counter, and every mutation
//! appends to an append-only history. The database-style critical section
//! is the sole concurrency primitive; no additional in-process locking is
//! required or correct above this layer.

mod errors;
mod history;
mod table;

pub use errors::{VersionedError, VersionedResult};
pub use history::HistoryEntry;
pub use table::{Record, VersionedTable};

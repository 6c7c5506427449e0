//! Observability subsystem
//!
//! Structured logging and the append-only audit log. Observability is
//! read-only with respect to the data model: no log or audit outcome may
//! change the result of the operation that produced it.

mod audit;
mod logger;

pub use audit::{AuditAction, AuditLog, AuditRecord, FileAuditLog, MemoryAuditLog, NullAuditLog};
pub use logger::{Logger, Severity};

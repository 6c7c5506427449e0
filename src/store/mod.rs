//! Shared store plumbing
//!
//! The pieces every table-level component is built on: a millisecond clock
//! handle, the transient storage error class, and the bounded retry helper
//! used by multi-step mutation call sites.

mod clock;
mod errors;
mod retry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{StorageError, StoreResult};
pub use retry::{with_retry, RetryPolicy};

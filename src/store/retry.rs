//! Bounded retry helper for version-conflict and transient storage errors
//!
//! The core never retries on its own. Callers performing multi-step
//! conditional mutations (read-then-conditionally-write) wrap the unit of
//! work in `with_retry` so every call site shares one attempt-count and
//! backoff policy. Only the error classes the predicate accepts are
//! retried; anything else fails the request immediately.

use std::thread;
use std::time::Duration;

/// Retry policy: how many attempts, and how long to sleep between them.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub attempts: u32,
    /// Sleep between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_millis(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps, for tests.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            backoff: Duration::ZERO,
        }
    }
}

/// Runs `work` until it succeeds, the error is not retryable, or the
/// attempt budget is exhausted. The final error is returned as-is.
pub fn with_retry<T, E, F, P>(policy: RetryPolicy, retryable: P, mut work: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    P: Fn(&E) -> bool,
{
    let attempts = policy.attempts.max(1);
    let mut last_err = None;
    for attempt in 0..attempts {
        match work() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !retryable(&err) || attempt + 1 == attempts {
                    return Err(err);
                }
                last_err = Some(err);
                if !policy.backoff.is_zero() {
                    thread::sleep(policy.backoff);
                }
            }
        }
    }
    // attempts >= 1, so we either returned above or recorded an error
    Err(last_err.expect("retry loop ran at least once"))
}

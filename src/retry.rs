//! Bounded fixed-backoff retry for durable writes.
//!
//! Checkpoint saves and sink writes share one policy: transient contention
//! (a file locked by another process, a permission flap on a synced folder)
//! is retried at a fixed interval; anything else fails immediately.

use std::io;
use std::time::Duration;

use tracing::warn;

use crate::error::RetryError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 50;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(10);

/// How often and how patiently to retry a transient write failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Sleep between consecutive attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Worst-case time spent sleeping before giving up.
    pub fn max_total_wait(&self) -> Duration {
        self.backoff * self.max_attempts.saturating_sub(1)
    }
}

/// Whether an I/O error is worth retrying.
pub fn is_transient(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::PermissionDenied
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::TimedOut
        | io::ErrorKind::Interrupted => true,
        _ => err.raw_os_error().is_some_and(is_busy_os_error),
    }
}

#[cfg(unix)]
fn is_busy_os_error(code: i32) -> bool {
    // EBUSY, ETXTBSY
    code == 16 || code == 26
}

#[cfg(windows)]
fn is_busy_os_error(code: i32) -> bool {
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    code == 32 || code == 33
}

#[cfg(not(any(unix, windows)))]
fn is_busy_os_error(_code: i32) -> bool {
    false
}

/// Run `op` until it succeeds, fails permanently, or the policy is exhausted.
pub async fn retry_io<T, F>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, RetryError>
where
    F: FnMut() -> io::Result<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if !is_transient(&e) => {
                return Err(RetryError::Permanent {
                    what: what.to_string(),
                    source: e,
                });
            }
            Err(e) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted {
                    what: what.to_string(),
                    attempts: attempt,
                    source: e,
                });
            }
            Err(e) => {
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {}s",
                    what,
                    attempt,
                    max_attempts,
                    e,
                    policy.backoff.as_secs()
                );
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
        }
    }
}

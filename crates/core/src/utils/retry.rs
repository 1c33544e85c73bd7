//! Scoped helpers wrapping store calls: lock retry and slow-call logging.

use std::future::Future;
use std::time::{Duration, Instant};

use log::warn;

use crate::errors::Result;

/// Operations slower than this are logged as warnings.
pub const SLOW_OPERATION_THRESHOLD: Duration = Duration::from_secs(1);

/// Bounded retry policy for lock contention on the relational store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Fixed wait between attempts.
    pub delay: Duration,
}

impl Default for LockRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Runs `op`, retrying it while it fails with a lock error.
///
/// Any other error is returned immediately. After `max_attempts` lock
/// failures the last lock error is propagated.
pub async fn retry_on_lock<T, F, Fut>(policy: LockRetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_locked() && attempt < max_attempts => {
                warn!(
                    "{}: database locked (attempt {}/{}), retrying in {:?}",
                    operation, attempt, max_attempts, policy.delay
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Logs a warning on drop if the scope took longer than the threshold.
pub struct Timed<'a> {
    operation: &'a str,
    started: Instant,
}

impl<'a> Timed<'a> {
    pub fn start(operation: &'a str) -> Self {
        Self {
            operation,
            started: Instant::now(),
        }
    }
}

impl Drop for Timed<'_> {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        if elapsed > SLOW_OPERATION_THRESHOLD {
            warn!("{} took {:.2}s", self.operation, elapsed.as_secs_f64());
        }
    }
}

//! Retry-with-backoff for transient storage failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{StorageError, StorageResult};

/// How many times to try and how long to wait between tries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `n` (0-based), `base_delay * 2^n`.
    #[must_use]
    pub fn delay_for(&self, n: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(n))
    }
}

/// Run `op`, retrying on [`StorageError::Unavailable`] with exponential
/// backoff. Non-transient errors surface immediately.
///
/// # Errors
///
/// Returns the final error once the attempt budget is spent, or the
/// first non-transient error.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let mut last: Option<StorageError> = None;
    for attempt in 0..policy.attempts.max(1) {
        if attempt > 0 {
            tokio::time::sleep(policy.delay_for(attempt - 1)).await;
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                warn!(attempt, error = %err, "Transient storage failure, will retry");
                last = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last.unwrap_or_else(|| StorageError::Unavailable("retry budget exhausted".into())))
}

//! Bounded retry with exponential backoff for store operations

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::error::{CoordinatorError, CoordinatorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based), with up to 50% jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_backoff.saturating_mul(1 << attempt.saturating_sub(1).min(6));
        let jitter_ms = exp.as_millis() as u64 / 2;
        if jitter_ms == 0 {
            return exp;
        }
        exp + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempts run out. The last transient error is returned in that case.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> CoordinatorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CoordinatorResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    tracing::debug!(what, attempt, error = %e, "Transient failure, retrying");
                    tokio::time::sleep(self.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(what, attempts = attempt, error = %e, "Giving up after retries");
                    return Err(e);
                }
                other => return other,
            }
        }
    }
}

/// Error for a conditional write that lost to a concurrent writer
pub fn contention(what: &str) -> CoordinatorError {
    CoordinatorError::Transient(format!("{} lost to a concurrent writer, try again", what))
}

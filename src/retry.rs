//! Retry policy for durable-store calls.
//!
//! Only transient faults are retried. The delay doubles from `base_delay` on
//! every attempt and gets up to `max_jitter` of random slack added.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::StoreResult;

/// Exponential backoff with jitter for classified-transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, first try included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_jitter: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Default::default()
        }
    }

    /// Set the upper bound of the random jitter.
    #[must_use]
    pub fn jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Delay slept after the given failed attempt (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exp)
    }

    fn jitter_sample(&self) -> Duration {
        let max = self.max_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max))
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempts are used up. The last error is returned as-is.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op = label, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff(attempt) + self.jitter_sample();
                    warn!(
                        op = label,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Transient store error, retrying: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Fixed-delay retry used while undoing a failed write. Any error is retried.
#[derive(Debug, Clone)]
pub struct RollbackPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RollbackPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(100),
        }
    }
}

impl RollbackPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts => {
                    warn!(op = label, attempt, attempts, "Rollback step failed, retrying: {}", err);
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

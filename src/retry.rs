//! Retry with exponential backoff for chain reads
//!
//! Only errors reporting `is_retryable()` are retried. Submissions never go
//! through here: a lost submission is recovered by resuming the flow, which
//! re-reads chain state first.

use crate::config::ClientConfig;
use crate::error::BridgeResult;

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl From<&ClientConfig> for RetryPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            initial_delay: Duration::from_millis(config.retry_delay_ms),
            max_delay: Duration::from_millis(config.max_retry_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1`, doubling and capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or runs out of attempts
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> BridgeResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BridgeResult<T>>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempts < policy.max_attempts => {
                let delay = policy.delay_for(attempts);
                warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {:?}",
                    operation, attempts, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

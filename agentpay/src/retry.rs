//! Typed retry with capped exponential backoff.
//!
//! Retries only errors classified transient by
//! [`PaymentError::is_transient`]: upstream timeouts, connection failures,
//! 5xx responses, explicit rate limits. Guard blocks, validation errors,
//! balance shortfalls and open circuits surface immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::PaymentError;

/// Exponential backoff policy: waits `base * multiplier^(attempt-1)` between
/// attempts. Defaults: 5 attempts, base 1s, multiplier 2 (waits 1, 2, 4, 8,
/// 16s — at most ~31s of sleeping).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// First wait.
    pub base: Duration,
    /// Wait growth factor.
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_secs(1),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base: Duration::from_secs(0),
            multiplier: 1,
        }
    }

    /// The wait before the given retry (1-based).
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        self.base * self.multiplier.saturating_pow(retry.saturating_sub(1))
    }

    /// Runs `operation`, retrying transient failures until the attempt
    /// budget is exhausted.
    ///
    /// # Errors
    ///
    /// Returns the last error: the first non-transient one, or the final
    /// transient one once attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: F) -> Result<T, PaymentError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, PaymentError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let wait = self.backoff(attempt);
                    warn!(attempt, wait_ms = wait.as_millis() as u64, %err, "transient failure, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

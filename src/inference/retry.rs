//! Bounded retry with exponential backoff for transient provider failures.
//!
//! Waits `base * 2^(attempt - 1)` between attempts, so a 500 ms base with three retries sleeps
//! 500 ms, 1 s, then 2 s. Only errors reported as transient are retried; everything else is
//! returned on the first failure.

use super::InferenceError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry budget for one provider call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    base_backoff: Duration,
}

impl RetryPolicy {
    /// Build a policy with the given retry count and base backoff.
    pub const fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
        }
    }

    /// Policy that never retries.
    pub const fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Run `operation` until it succeeds, fails permanently, or the budget is spent.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, InferenceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, InferenceError>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = self.backoff(attempt);
                    tracing::warn!(
                        call = label,
                        attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "Transient inference failure; retrying"
                    );
                    sleep(backoff).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

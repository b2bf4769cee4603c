//! Bounded retry with exponential backoff.
//!
//! The first attempt runs immediately; retry `n` waits
//! `min(initial_delay * 2^(n-1), max_delay)` first. Waits are interrupted by a
//! [`CancellationToken`]. The executor knows nothing about the operation and
//! retries every error it returns.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Returned when the cancellation token fires during a backoff wait.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("retry cancelled")]
pub struct Cancelled;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt; `max_retries + 1` attempts in total
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Default delays with `max_retries` retries.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Delay before attempt number `attempt` (0-based). Attempt 0 has none.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Retry executor
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create an executor with the given delays
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation` until it succeeds or the retries are used up.
    ///
    /// Returns the last error after `max_retries + 1` failed attempts, or
    /// [`Cancelled`] (converted into `E`) if `cancel` fires while waiting.
    #[instrument(skip(self, cancel, operation), fields(max_attempts = self.config.max_retries + 1))]
    pub async fn execute<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<Cancelled> + std::fmt::Display,
    {
        let max_attempts = self.config.max_retries + 1;
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                let delay = self.config.delay_for_attempt(attempt);
                info!(
                    attempt = attempt + 1,
                    max_attempts,
                    delay = ?delay,
                    "Retrying operation"
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Cancelled.into()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(attempts = attempt + 1, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    warn!(attempt = attempt + 1, error = %error, "Operation failed");
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(error);
                    }
                }
            }
        }
    }
}

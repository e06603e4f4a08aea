//! Retry with exponential backoff for outbound collaborator calls
//!
//! Store calls have their own policy in [`crate::store::retry`]; this helper
//! is for HTTP requests to the system of record and collaborator services,
//! where the caller decides which errors are worth another attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Exponential backoff settings
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff (default: 2.0)
    pub backoff_multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn with_delays(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            backoff_multiplier: 2.0,
        }
    }

    /// Delay before retry number `attempt` (0 = first attempt, no delay)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponential =
            self.base_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);
        Duration::from_millis((exponential as u64).min(self.max_delay_ms))
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// runs out of retries; the last error is returned
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &BackoffConfig,
    op: &str,
    operation: F,
    should_retry: P,
) -> Result<T, E>
where
    E: Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(op, attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if should_retry(&e) && attempt < config.max_retries => {
                attempt += 1;
                let delay = config.delay_for(attempt);
                warn!(
                    op,
                    attempt,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, will retry"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if attempt > 0 {
                    warn!(op, attempt, error = %e, "Giving up after retries");
                }
                return Err(e);
            }
        }
    }
}

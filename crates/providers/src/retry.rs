//! Retry envelope — bounded retries with exponential backoff.
//!
//! The delay before attempt k+1 is `base_delay * 1.5^(k-1)`, capped at
//! [`MAX_RETRY_DELAY`]; there is no delay after the final failure, and the
//! last error is returned exactly as the operation produced it.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

const BACKOFF_FACTOR: f64 = 1.5;

/// Upper bound on a single backoff sleep.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// How many times to try, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    pub fn from_config(config: &kindred_config::RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
        )
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * BACKOFF_FACTOR.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }

    /// A zero policy still makes one call.
    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Run `operation` until it succeeds or the policy's attempts run out.
///
/// The operation must be safe to repeat.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(label, attempt, max_attempts, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                error!(label, attempts = attempt, error = %e, "All attempts failed");
                return Err(e);
            }
        }
    }
}

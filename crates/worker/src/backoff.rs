//! Exponential backoff for store calls.
//!
//! Used by the dispatcher to pause after a failed claim cycle and by
//! Worker Executions to retry writing an outcome while the database is
//! briefly unreachable. Unrelated to the per-job retry policy.

use std::future::Future;
use std::time::Duration;

use easel_db::StoreError;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct StoreBackoff {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Total attempts for a single store call, including the first.
    pub max_attempts: u32,
}

impl Default for StoreBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`StoreBackoff::max_delay`].
pub fn next_delay(current: Duration, config: &StoreBackoff) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Run a store call, retrying transient failures with backoff.
///
/// Non-transient errors (state conflicts, missing rows) are returned
/// immediately.
pub async fn retry_store_call<T, F, Fut>(
    operation: &'static str,
    config: &StoreBackoff,
    mut call: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut delay = config.initial_delay;
    let mut attempt = 1u32;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < config.max_attempts => {
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Store call failed, retrying",
                );
                tokio::time::sleep(delay).await;
                delay = next_delay(delay, config);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

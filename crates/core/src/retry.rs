//! Retry policy for failed job attempts.
//!
//! A policy maps the number of attempts already made to the delay before
//! the job becomes claimable again. Policies are stateless so callers can
//! evaluate a backoff curve without waiting real time.

use std::time::Duration;

use crate::error::CoreError;

/// Decides how long a failed job waits before its next attempt.
pub trait RetryPolicy: Send + Sync {
    /// Delay before the next attempt, given the attempts made so far.
    fn next_delay(&self, attempt_count: u32) -> Duration;

    /// Whether a job with `attempt_count` attempts must fail terminally.
    fn should_give_up(&self, attempt_count: u32, max_attempts: u32) -> bool {
        attempt_count >= max_attempts
    }
}

/// `unit * base^attempt_count`, clamped to `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    /// Growth factor per attempt. Must be at least 1.0.
    pub base: f64,
    /// Length of one time unit.
    pub unit: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: f64, unit: Duration, max_delay: Duration) -> Result<Self, CoreError> {
        if !base.is_finite() || base < 1.0 {
            return Err(CoreError::Validation(format!(
                "Retry base must be a finite number >= 1.0, got {base}"
            )));
        }
        if unit.is_zero() {
            return Err(CoreError::Validation(
                "Retry unit must be greater than zero".to_string(),
            ));
        }
        if max_delay < unit {
            return Err(CoreError::Validation(format!(
                "Retry max delay ({max_delay:?}) must not be shorter than the unit ({unit:?})"
            )));
        }
        Ok(Self {
            base,
            unit,
            max_delay,
        })
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: 2.0,
            unit: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt_count: u32) -> Duration {
        let exponent = i32::try_from(attempt_count).unwrap_or(i32::MAX);
        let secs = self.unit.as_secs_f64() * self.base.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .map(|d| d.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base: f64, unit_ms: u64, max_ms: u64) -> ExponentialBackoff {
        ExponentialBackoff::new(
            base,
            Duration::from_millis(unit_ms),
            Duration::from_millis(max_ms),
        )
        .unwrap()
    }

    #[test]
    fn delay_grows_by_base_per_attempt() {
        let p = policy(2.0, 1000, 300_000);
        let secs: Vec<u64> = (0..6).map(|n| p.next_delay(n).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 32]);
    }

    #[test]
    fn delay_clamps_at_max() {
        let p = policy(2.0, 1000, 10_000);
        assert_eq!(p.next_delay(3), Duration::from_secs(8));
        assert_eq!(p.next_delay(4), Duration::from_secs(10));
        assert_eq!(p.next_delay(50), Duration::from_secs(10));
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let p = policy(10.0, 1000, 60_000);
        assert_eq!(p.next_delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn base_one_is_a_constant_delay() {
        let p = policy(1.0, 250, 10_000);
        for n in 0..5 {
            assert_eq!(p.next_delay(n), Duration::from_millis(250));
        }
    }

    #[test]
    fn curve_is_monotonic() {
        let p = policy(3.0, 10, 5_000);
        let delays: Vec<Duration> = (0..12).map(|n| p.next_delay(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn gives_up_at_max_attempts() {
        let p = ExponentialBackoff::default();
        assert!(!p.should_give_up(0, 3));
        assert!(!p.should_give_up(2, 3));
        assert!(p.should_give_up(3, 3));
        assert!(p.should_give_up(4, 3));
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert!(ExponentialBackoff::new(0.5, Duration::from_secs(1), Duration::from_secs(5)).is_err());
        assert!(ExponentialBackoff::new(f64::NAN, Duration::from_secs(1), Duration::from_secs(5)).is_err());
        assert!(ExponentialBackoff::new(2.0, Duration::ZERO, Duration::from_secs(5)).is_err());
        assert!(ExponentialBackoff::new(2.0, Duration::from_secs(10), Duration::from_secs(5)).is_err());
    }
}

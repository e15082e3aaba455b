//! Retry Strategies
//!
//! `TigerStyle`: Bounded attempts, explicit delays, no hidden loops.
//!
//! Attempts are numbered from 1. After attempt `n` loses a race the write
//! cycle asks `can_retry(n)`; if allowed it sleeps `delay(n)` and runs
//! attempt `n + 1`.

use std::fmt::Debug;
use std::time::Duration;

use vellum_core::constants::{RETRY_ATTEMPTS_COUNT_MAX, RETRY_DELAY_MS_CEILING};

/// Backoff policy with a maximum attempt count.
pub trait RetryStrategy: Send + Sync + Debug {
    /// Total number of attempts allowed (including the first).
    fn max_attempts(&self) -> u32;

    /// Whether another attempt may follow attempt number `attempt`.
    fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }

    /// How long to wait after attempt number `attempt` lost a race.
    fn delay(&self, attempt: u32) -> Duration;
}

fn assert_attempts(max_attempts: u32) {
    assert!(max_attempts >= 1, "max_attempts must be at least 1");
    assert!(
        max_attempts <= RETRY_ATTEMPTS_COUNT_MAX,
        "max_attempts ({max_attempts}) exceeds max ({RETRY_ATTEMPTS_COUNT_MAX})"
    );
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scaled(interval: Duration, factor: f64, cap: Option<Duration>) -> Duration {
    let ms = (interval.as_millis() as f64 * factor)
        .min(RETRY_DELAY_MS_CEILING as f64)
        .max(0.0);
    let delay = Duration::from_millis(ms as u64);
    cap.map_or(delay, |cap| delay.min(cap))
}

// =============================================================================
// Constant
// =============================================================================

/// Fixed interval between attempts.
#[derive(Debug, Clone)]
pub struct ConstantRetry {
    max_attempts: u32,
    interval: Duration,
}

impl ConstantRetry {
    /// # Panics
    /// Panics if `max_attempts` is zero or above `RETRY_ATTEMPTS_COUNT_MAX`.
    #[must_use]
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        assert_attempts(max_attempts);
        Self {
            max_attempts,
            interval,
        }
    }
}

impl RetryStrategy for ConstantRetry {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay(&self, _attempt: u32) -> Duration {
        scaled(self.interval, 1.0, None)
    }
}

// =============================================================================
// Linear
// =============================================================================

/// `interval * rate * attempt`, optionally capped.
#[derive(Debug, Clone)]
pub struct LinearRetry {
    max_attempts: u32,
    interval: Duration,
    rate: f64,
    max_delay: Option<Duration>,
}

impl LinearRetry {
    /// # Panics
    /// Panics if `max_attempts` is out of range or `rate` is not positive.
    #[must_use]
    pub fn new(max_attempts: u32, interval: Duration, rate: f64) -> Self {
        assert_attempts(max_attempts);
        assert!(rate.is_finite() && rate > 0.0, "rate must be positive, got {rate}");
        Self {
            max_attempts,
            interval,
            rate,
            max_delay: None,
        }
    }

    /// Cap every delay at `max_delay`.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }
}

impl RetryStrategy for LinearRetry {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay(&self, attempt: u32) -> Duration {
        scaled(self.interval, self.rate * f64::from(attempt), self.max_delay)
    }
}

// =============================================================================
// Exponential
// =============================================================================

/// `interval * rate^attempt`, optionally capped.
#[derive(Debug, Clone)]
pub struct ExponentialRetry {
    max_attempts: u32,
    interval: Duration,
    rate: f64,
    max_delay: Option<Duration>,
}

impl ExponentialRetry {
    /// # Panics
    /// Panics if `max_attempts` is out of range or `rate` is below 1.
    #[must_use]
    pub fn new(max_attempts: u32, interval: Duration, rate: f64) -> Self {
        assert_attempts(max_attempts);
        assert!(rate.is_finite() && rate >= 1.0, "rate must be >= 1, got {rate}");
        Self {
            max_attempts,
            interval,
            rate,
            max_delay: None,
        }
    }

    /// Cap every delay at `max_delay`.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }
}

impl RetryStrategy for ExponentialRetry {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        scaled(self.interval, self.rate.powi(exponent), self.max_delay)
    }
}

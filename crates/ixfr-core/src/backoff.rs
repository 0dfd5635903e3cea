//! Retry delay after failed checks, and jitter for poll intervals

use std::time::Duration;

use rand::Rng;

/// Exponential backoff for one zone
///
/// The first failure waits the normal poll interval, each further failure
/// doubles the wait, capped at `max`. A success resets it.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: 0,
        }
    }

    /// Delay before the next check
    pub fn delay(&self) -> Duration {
        if self.failures == 0 {
            return self.base;
        }
        let factor = 1u32.checked_shl(self.failures - 1).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).unwrap_or(self.max).min(self.max)
    }

    /// Count a failure and return the delay to wait before retrying
    pub fn fail(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.delay()
    }

    /// Back to the plain interval
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

/// `delay` shifted by a uniformly random amount of up to ±`fraction` of it
pub fn with_jitter(delay: Duration, fraction: f64) -> Duration {
    if !(fraction > 0.0) || delay.is_zero() {
        return delay;
    }
    let fraction = fraction.min(1.0);
    let factor = rand::rng().random_range(1.0 - fraction..=1.0 + fraction);
    delay.mul_f64(factor)
}

/// Random delay within the first `fraction` of `interval`
///
/// Spreads the first checks of zones that were added together.
pub fn initial_delay(interval: Duration, fraction: f64) -> Duration {
    if !(fraction > 0.0) || interval.is_zero() {
        return Duration::ZERO;
    }
    let fraction = fraction.min(1.0);
    interval.mul_f64(rand::rng().random_range(0.0..=fraction))
}

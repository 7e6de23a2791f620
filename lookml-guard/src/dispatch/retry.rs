//! Retry policy for transient failures.

use std::time::Duration;

use rand::Rng;

/// Exponent cap for the backoff multiplier (2^16).
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Fraction of the delay that jitter may add.
const JITTER_FRACTION: f64 = 0.1;

/// Exponential backoff for transient failures.
///
/// Retry `n` (1-based) waits `backoff_base * 2^(n-1)`, plus up to 10% jitter
/// when enabled. A `Retry-After` from the service is honoured when it asks for
/// more than that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub backoff_base: Duration,
    /// Whether to add random jitter
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_base: Duration::ZERO,
            jitter: false,
        }
    }

    /// Total attempts per batch, first attempt included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Returns true if another attempt may follow attempt number `attempt`.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = retry.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let backoff = self.backoff_base.saturating_mul(1 << exponent);
        let delay = match retry_after {
            Some(requested) if requested > backoff => requested,
            _ => backoff,
        };
        if self.jitter && !delay.is_zero() {
            let fraction = rand::rng().random_range(0.0..=JITTER_FRACTION);
            delay + delay.mul_f64(fraction)
        } else {
            delay
        }
    }
}

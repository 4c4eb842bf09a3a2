//! Retry policy for settlement calls (ack/requeue) that fail.

use std::time::Duration;

use rand::Rng;

use crate::config::SettleRetryConfig;

/// Backoff policy for failed `acknowledge`/`requeue` calls.
///
/// Only transient source errors are retried. After `max_attempts` tries the
/// consumer gives up and stops.
#[derive(Debug, Clone, PartialEq)]
pub struct SettleRetryPolicy {
    /// Total tries, including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier.
    pub multiplier: f64,

    /// Random spread applied to each delay, as a fraction (0.1 = ±10%).
    pub jitter: f64,

    /// Upper bound for any single delay, jitter included.
    pub max_delay: Duration,
}

impl Default for SettleRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.1,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl SettleRetryPolicy {
    /// Fail on the first error.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the next try, given how many tries already failed
    /// (1-indexed): `base_delay * multiplier^(attempts - 1)`.
    ///
    /// With base_delay=100ms, multiplier=2.0: 100ms, 200ms, 400ms, ...
    /// Never exceeds `max_delay`.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        self.clamp(delay_secs)
    }

    /// Out-of-range values (overflow, NaN, negative) become `max_delay`.
    fn clamp(&self, secs: f64) -> Duration {
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// [`next_delay`](Self::next_delay) with jitter applied.
    pub fn jittered_delay(&self, attempts: u32) -> Duration {
        let delay = self.next_delay(attempts);
        if self.jitter.is_nan() || self.jitter <= 0.0 {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        self.clamp(delay.as_secs_f64() * factor.max(0.0))
    }

    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl From<&SettleRetryConfig> for SettleRetryPolicy {
    fn from(cfg: &SettleRetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            multiplier: cfg.multiplier,
            jitter: cfg.jitter,
            max_delay: Duration::from_millis(cfg.max_delay_ms),
        }
    }
}

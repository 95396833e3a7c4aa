//! Reconnect delay schedule

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnect backoff settings as they appear in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First delay
    pub min_ms: u64,
    /// Cap for any delay
    pub max_ms: u64,
    /// Random extra delay as a fraction of the base delay, `0.0..=1.0`
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { min_ms: 100, max_ms: 5_000, jitter: 0.2 }
    }
}

/// Exponential backoff with jitter.
///
/// Delays double from `min` up to `max`. Jitter only ever lengthens a delay, and a
/// delay is never shorter than the one before it, so the schedule is non-decreasing
/// until it reaches the cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    jitter: f64,
    attempt: u32,
    last: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            min,
            max: max.max(min),
            jitter: jitter.clamp(0.0, 1.0),
            attempt: 0,
            last: Duration::ZERO,
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            Duration::from_millis(config.min_ms),
            Duration::from_millis(config.max_ms),
            config.jitter,
        )
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        let base = self.min.saturating_mul(factor).min(self.max);

        let extra = if self.jitter > 0.0 {
            base.mul_f64(rand::thread_rng().gen_range(0.0..=self.jitter))
        } else {
            Duration::ZERO
        };

        let delay = (base + extra).min(self.max).max(self.last);
        self.last = delay;
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Start over from `min`. Called after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last = Duration::ZERO;
    }

    /// Delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

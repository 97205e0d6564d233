//! Randomized exponential backoff for retrying failed attempts.
//!
//! `delay = min(base * multiplier^(attempt - 1) + jitter, max)` where the
//! jitter is drawn uniformly from `[0, 10%)` of the exponential term.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default delay before the first retry (milliseconds).
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default ceiling on any single retry delay (milliseconds).
pub const DEFAULT_MAX_DELAY_MS: u64 = 30000;
/// Jitter is at most this fraction of the exponential delay.
pub const JITTER_FRACTION: f64 = 0.1;

/// Backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl BackoffConfig {
    /// Create config with custom values.
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }
}

/// Computes retry delays.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackoffPolicy {
    config: BackoffConfig,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Exponential term without jitter. Attempt 0 counts as attempt 1.
    pub fn base_delay(&self, attempt: u32, multiplier: f64) -> Duration {
        let exponent = attempt.max(1) - 1;
        let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);
        let millis = self.config.base_delay_ms as f64 * multiplier.powi(exponent);
        Duration::from_secs_f64(self.clamp_ms(millis) / 1000.0)
    }

    /// Delay to wait before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32, multiplier: f64) -> Duration {
        let exponential = self.base_delay(attempt, multiplier).as_secs_f64() * 1000.0;
        let jitter = if exponential > 0.0 {
            rand::rng().random_range(0.0..exponential * JITTER_FRACTION)
        } else {
            0.0
        };
        Duration::from_secs_f64(self.clamp_ms(exponential + jitter) / 1000.0)
    }

    fn clamp_ms(&self, millis: f64) -> f64 {
        let max = self.config.max_delay_ms as f64;
        if millis.is_finite() { millis.clamp(0.0, max) } else { max }
    }
}

//! Per-call and per-instance configuration for the admission queue.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffConfig;
use crate::error::{Result, ThrottleError};
use crate::scheduler::health::HealthThresholds;

/// Effective concurrency when nothing constrains it.
pub const DEFAULT_FALLBACK_MAX_CONCURRENT: usize = 10;
/// Per-request execution estimate used before any request has completed (ms).
pub const DEFAULT_EXECUTION_ESTIMATE_MS: u64 = 2000;

/// Names of the built-in profiles.
pub const PROFILE_NAMES: [&str; 4] = ["ai_inference", "file_upload", "api_call", "search"];

/// Throttling settings supplied with each submitted operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Upper bound on concurrently executing requests this caller accepts.
    pub max_concurrent: usize,
    /// Submissions are rejected while this many requests are queued.
    pub max_queue_size: usize,
    /// Timeout for each individual attempt.
    pub timeout_ms: u64,
    /// Lower runs first.
    pub priority: i32,
    /// Retries after the first attempt.
    pub retry_attempts: u32,
    pub backoff_multiplier: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_queue_size: 50,
            timeout_ms: 30000,
            priority: 5,
            retry_attempts: 3,
            backoff_multiplier: 2.0,
        }
    }
}

impl ThrottleConfig {
    /// Long-running model calls: few at a time, generous timeout.
    pub fn ai_inference() -> Self {
        Self {
            max_concurrent: 2,
            max_queue_size: 20,
            timeout_ms: 60000,
            priority: 1,
            retry_attempts: 2,
            backoff_multiplier: 2.0,
        }
    }

    /// Large transfers: very long timeout, a single retry.
    pub fn file_upload() -> Self {
        Self {
            max_concurrent: 3,
            max_queue_size: 10,
            timeout_ms: 120000,
            priority: 2,
            retry_attempts: 1,
            backoff_multiplier: 1.5,
        }
    }

    /// Generic backend calls.
    pub fn api_call() -> Self {
        Self {
            max_concurrent: 5,
            max_queue_size: 50,
            timeout_ms: 30000,
            priority: 3,
            retry_attempts: 3,
            backoff_multiplier: 2.0,
        }
    }

    /// Interactive search: short timeout, jumps ahead of background work.
    pub fn search() -> Self {
        Self {
            max_concurrent: 3,
            max_queue_size: 30,
            timeout_ms: 15000,
            priority: 2,
            retry_attempts: 2,
            backoff_multiplier: 1.5,
        }
    }

    /// Look up a built-in profile by name.
    pub fn profile(name: &str) -> Option<Self> {
        match name {
            "ai_inference" => Some(Self::ai_inference()),
            "file_upload" => Some(Self::file_upload()),
            "api_call" => Some(Self::api_call()),
            "search" => Some(Self::search()),
            _ => None,
        }
    }

    /// All built-in profiles keyed by name.
    pub fn builtin_profiles() -> BTreeMap<String, Self> {
        PROFILE_NAMES
            .iter()
            .filter_map(|name| Self::profile(name).map(|config| (name.to_string(), config)))
            .collect()
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_retry_attempts(mut self, retry_attempts: u32) -> Self {
        self.retry_attempts = retry_attempts;
        self
    }

    pub fn with_backoff_multiplier(mut self, backoff_multiplier: f64) -> Self {
        self.backoff_multiplier = backoff_multiplier;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check the config can be scheduled.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(ThrottleError::InvalidConfig("max_concurrent must be at least 1".to_string()));
        }
        if self.max_queue_size == 0 {
            return Err(ThrottleError::InvalidConfig("max_queue_size must be at least 1".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(ThrottleError::InvalidConfig("timeout_ms must be at least 1".to_string()));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ThrottleError::InvalidConfig(format!(
                "backoff_multiplier must be a finite number >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

/// Which requests contribute to the effective concurrency cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyScope {
    /// Only queued requests; an empty queue falls back to the default cap.
    Queued,
    /// Queued and currently executing requests.
    #[default]
    QueuedAndActive,
}

/// Settings for one throttler instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottlerConfig {
    pub fallback_max_concurrent: usize,
    pub concurrency_scope: ConcurrencyScope,
    pub backoff: BackoffConfig,
    pub default_execution_estimate_ms: u64,
    pub health: HealthThresholds,
}

impl Default for ThrottlerConfig {
    fn default() -> Self {
        Self {
            fallback_max_concurrent: DEFAULT_FALLBACK_MAX_CONCURRENT,
            concurrency_scope: ConcurrencyScope::default(),
            backoff: BackoffConfig::default(),
            default_execution_estimate_ms: DEFAULT_EXECUTION_ESTIMATE_MS,
            health: HealthThresholds::default(),
        }
    }
}

impl ThrottlerConfig {
    pub fn with_concurrency_scope(mut self, scope: ConcurrencyScope) -> Self {
        self.concurrency_scope = scope;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_fallback_max_concurrent(mut self, fallback: usize) -> Self {
        self.fallback_max_concurrent = fallback;
        self
    }

    pub fn default_execution_estimate(&self) -> Duration {
        Duration::from_millis(self.default_execution_estimate_ms)
    }
}

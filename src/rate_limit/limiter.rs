//! Per-key sliding-window limiter.
//!
//! Checking and recording are separate so a caller can ask before attempting
//! and only commit once the call actually went out.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::rate_limit::record::RateLimitRecord;

/// Sliding window configuration for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed inside one window. Zero denies everything.
    pub max_requests: u32,
    /// Length of the trailing window in milliseconds.
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_ms: 60000,
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests still available in the current window.
    pub remaining: u32,
    /// When the oldest counted request leaves the window.
    pub reset_at: Instant,
    /// Whole seconds to wait before retrying; only set when denied.
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    /// Time left until `reset_at`, zero if already passed.
    pub fn reset_in(&self) -> Duration {
        self.reset_at.saturating_duration_since(Instant::now())
    }
}

/// In-memory rate limiter keyed by arbitrary strings.
#[derive(Debug, Default)]
pub struct RateLimiter {
    records: Mutex<HashMap<String, RateLimitRecord>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether one more request for `key` fits in the window.
    ///
    /// Does not consume quota; call [`record_request`](Self::record_request)
    /// once the request has been made.
    pub fn check_rate_limit(&self, key: &str, config: &RateLimitConfig) -> RateLimitDecision {
        self.check_at(key, config, Instant::now())
    }

    /// Commit a request for `key`. Failed requests don't count against the quota.
    ///
    /// Recording trims the key against the window of its last check. A key
    /// that is recorded but never checked is only trimmed by
    /// [`purge_idle`](Self::purge_idle).
    pub fn record_request(&self, key: &str, success: bool) {
        self.record_at(key, success, Instant::now());
    }

    /// Forget everything recorded for `key`.
    pub fn reset(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Drop keys with no request newer than `idle_for`. Returns how many were dropped.
    pub fn purge_idle(&self, idle_for: Duration) -> usize {
        self.purge_idle_at(idle_for, Instant::now())
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.lock().len()
    }

    fn check_at(&self, key: &str, config: &RateLimitConfig, now: Instant) -> RateLimitDecision {
        let window = config.window();
        let mut records = self.lock();

        let (count, oldest) = match records.get_mut(key) {
            Some(record) => {
                record.prune(now, window);
                (record.len(), record.oldest())
            }
            None => (0, None),
        };

        let count = u32::try_from(count).unwrap_or(u32::MAX);
        let allowed = count < config.max_requests;
        let remaining = config.max_requests.saturating_sub(count);
        let reset_at = oldest.unwrap_or(now) + window;

        let retry_after = if allowed {
            None
        } else {
            let wait = reset_at.saturating_duration_since(now);
            let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            Some(Duration::from_secs(secs.max(1)))
        };

        if !allowed {
            tracing::debug!(
                key = key,
                count = count,
                max_requests = config.max_requests,
                retry_after_secs = retry_after.map(|d| d.as_secs()),
                "Rate limit exceeded"
            );
        }

        RateLimitDecision {
            allowed,
            remaining,
            reset_at,
            retry_after,
        }
    }

    fn record_at(&self, key: &str, success: bool, now: Instant) {
        if !success {
            tracing::trace!(key = key, "Failed request not counted");
            return;
        }
        self.lock().entry(key.to_string()).or_default().push(now);
    }

    fn purge_idle_at(&self, idle_for: Duration, now: Instant) -> usize {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, record| {
            record
                .newest()
                .is_some_and(|newest| now.saturating_duration_since(newest) < idle_for)
        });
        before - records.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RateLimitRecord>> {
        // A panic while holding the lock cannot leave a record half-written
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

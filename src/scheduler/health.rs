//! Health classification from a stats snapshot.
//!
//! Load is judged against fixed reference capacities rather than whatever
//! limits individual callers configured.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::stats::{Stats, as_millis};

/// Overall health of the admission queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// Thresholds for [`classify`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    /// Failure rate above which the queue is unhealthy.
    pub unhealthy_failure_rate: f64,
    /// Queue depth above which the queue is unhealthy.
    pub unhealthy_queue_depth: usize,
    /// Failure rate above which the queue is degraded.
    pub degraded_failure_rate: f64,
    pub queue_capacity_reference: usize,
    pub concurrency_capacity_reference: usize,
    /// Queue fill ratio above which load counts as heavy.
    pub heavy_queue_ratio: f64,
    /// Active fill ratio above which load counts as heavy.
    pub heavy_active_ratio: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            unhealthy_failure_rate: 0.5,
            unhealthy_queue_depth: 40,
            degraded_failure_rate: 0.2,
            queue_capacity_reference: 50,
            concurrency_capacity_reference: 10,
            heavy_queue_ratio: 0.8,
            heavy_active_ratio: 0.9,
        }
    }
}

/// Details accompanying a [`HealthStatus`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthDetails {
    pub active: usize,
    pub queued: usize,
    pub retrying: usize,
    pub completed: u64,
    pub failed: u64,
    pub failure_rate: f64,
    pub under_heavy_load: bool,
    #[serde(rename = "average_wait_time_ms", serialize_with = "as_millis")]
    pub average_wait_time: Duration,
    #[serde(rename = "average_execution_time_ms", serialize_with = "as_millis")]
    pub average_execution_time: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub details: HealthDetails,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn from_stats(stats: &Stats, thresholds: &HealthThresholds) -> Self {
        Self {
            status: classify(stats, thresholds),
            details: HealthDetails {
                active: stats.active,
                queued: stats.queued,
                retrying: stats.retrying,
                completed: stats.completed,
                failed: stats.failed,
                failure_rate: stats.failure_rate(),
                under_heavy_load: is_under_heavy_load(stats, thresholds),
                average_wait_time: stats.average_wait_time,
                average_execution_time: stats.average_execution_time,
            },
            checked_at: Utc::now(),
        }
    }
}

fn ratio(value: usize, reference: usize) -> f64 {
    if reference == 0 {
        return if value == 0 { 0.0 } else { f64::INFINITY };
    }
    value as f64 / reference as f64
}

/// Queue or active set is close to its reference capacity.
pub fn is_under_heavy_load(stats: &Stats, thresholds: &HealthThresholds) -> bool {
    ratio(stats.queued, thresholds.queue_capacity_reference) > thresholds.heavy_queue_ratio
        || ratio(stats.active, thresholds.concurrency_capacity_reference) > thresholds.heavy_active_ratio
}

pub fn classify(stats: &Stats, thresholds: &HealthThresholds) -> HealthStatus {
    let failure_rate = stats.failure_rate();

    if failure_rate > thresholds.unhealthy_failure_rate || stats.queued > thresholds.unhealthy_queue_depth {
        HealthStatus::Unhealthy
    } else if is_under_heavy_load(stats, thresholds) || failure_rate > thresholds.degraded_failure_rate {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

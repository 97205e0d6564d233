//! Lifecycle counters for the admission queue.
//!
//! Only the coordinator owns a [`StatsCollector`]; callers get [`Stats`]
//! snapshots.

use std::time::Duration;

use serde::{Serialize, Serializer};

/// Accumulates counts and timings as requests settle.
#[derive(Debug, Clone, Default)]
pub struct StatsCollector {
    completed: u64,
    failed: u64,
    cancelled: u64,
    rejected: u64,
    retried: u64,
    total_wait: Duration,
    total_execution: Duration,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A request finished successfully.
    pub fn record_success(&mut self, wait: Duration, execution: Duration) {
        self.completed += 1;
        self.total_wait += wait;
        self.total_execution += execution;
    }

    /// A request exhausted its retries. Execution time isn't sampled for failures.
    pub fn record_failure(&mut self, wait: Duration) {
        self.failed += 1;
        self.total_wait += wait;
    }

    pub fn record_cancelled(&mut self) {
        self.cancelled += 1;
    }

    pub fn record_rejected(&mut self) {
        self.rejected += 1;
    }

    pub fn record_retry(&mut self) {
        self.retried += 1;
    }

    /// `total_wait / (completed + failed)`.
    pub fn average_wait_time(&self) -> Duration {
        average(self.total_wait, self.completed + self.failed).unwrap_or(Duration::ZERO)
    }

    /// `total_execution / completed`, `None` before the first completion.
    pub fn average_execution_time(&self) -> Option<Duration> {
        average(self.total_execution, self.completed)
    }

    /// Snapshot combined with the coordinator's live counts.
    pub fn snapshot(&self, live: LiveCounts) -> Stats {
        Stats {
            active: live.active,
            queued: live.queued,
            retrying: live.retrying,
            effective_max_concurrent: live.effective_max_concurrent,
            completed: self.completed,
            failed: self.failed,
            cancelled: self.cancelled,
            rejected: self.rejected,
            retried: self.retried,
            total_wait_time: self.total_wait,
            total_execution_time: self.total_execution,
            average_wait_time: self.average_wait_time(),
            average_execution_time: self.average_execution_time().unwrap_or(Duration::ZERO),
        }
    }
}

fn average(total: Duration, count: u64) -> Option<Duration> {
    if count == 0 {
        return None;
    }
    let nanos = total.as_nanos() / u128::from(count);
    Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
}

/// Point-in-time sizes the coordinator knows about.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveCounts {
    pub active: usize,
    pub queued: usize,
    pub retrying: usize,
    pub effective_max_concurrent: usize,
}

/// Snapshot of the admission queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stats {
    pub active: usize,
    pub queued: usize,
    /// Waiting out a backoff delay.
    pub retrying: usize,
    pub effective_max_concurrent: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Turned away because the queue was full.
    pub rejected: u64,
    /// Attempts that were scheduled for another try.
    pub retried: u64,
    #[serde(rename = "total_wait_time_ms", serialize_with = "as_millis")]
    pub total_wait_time: Duration,
    #[serde(rename = "total_execution_time_ms", serialize_with = "as_millis")]
    pub total_execution_time: Duration,
    #[serde(rename = "average_wait_time_ms", serialize_with = "as_millis")]
    pub average_wait_time: Duration,
    /// Zero until the first completion.
    #[serde(rename = "average_execution_time_ms", serialize_with = "as_millis")]
    pub average_execution_time: Duration,
}

impl Stats {
    /// `failed / (completed + failed)`, zero when nothing has settled.
    pub fn failure_rate(&self) -> f64 {
        let settled = self.completed + self.failed;
        if settled == 0 {
            return 0.0;
        }
        self.failed as f64 / settled as f64
    }
}

pub(crate) fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_new() {
        let collector = StatsCollector::new();
        let stats = collector.snapshot(LiveCounts::default());
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.average_wait_time, Duration::ZERO);
        assert!(collector.average_execution_time().is_none());
    }

    #[test]
    fn test_record_success() {
        let mut collector = StatsCollector::new();
        collector.record_success(Duration::from_millis(100), Duration::from_millis(300));
        collector.record_success(Duration::from_millis(300), Duration::from_millis(500));

        let stats = collector.snapshot(LiveCounts::default());
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.average_wait_time, Duration::from_millis(200));
        assert_eq!(stats.average_execution_time, Duration::from_millis(400));
    }

    #[test]
    fn test_asymmetric_denominators() {
        let mut collector = StatsCollector::new();
        collector.record_success(Duration::from_millis(100), Duration::from_millis(600));
        collector.record_failure(Duration::from_millis(500));

        let stats = collector.snapshot(LiveCounts::default());
        // Wait averages over completed + failed
        assert_eq!(stats.average_wait_time, Duration::from_millis(300));
        // Execution averages over completed only
        assert_eq!(stats.average_execution_time, Duration::from_millis(600));
    }

    #[test]
    fn test_cancel_reject_retry_do_not_touch_settled_counts() {
        let mut collector = StatsCollector::new();
        collector.record_cancelled();
        collector.record_rejected();
        collector.record_retry();

        let stats = collector.snapshot(LiveCounts::default());
        assert_eq!(stats.completed + stats.failed, 0);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.retried, 1);
    }

    #[test]
    fn test_failure_rate() {
        let mut collector = StatsCollector::new();
        assert_eq!(collector.snapshot(LiveCounts::default()).failure_rate(), 0.0);

        collector.record_success(Duration::ZERO, Duration::ZERO);
        collector.record_failure(Duration::ZERO);
        collector.record_failure(Duration::ZERO);
        collector.record_failure(Duration::ZERO);

        let rate = collector.snapshot(LiveCounts::default()).failure_rate();
        assert!((rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot_carries_live_counts() {
        let collector = StatsCollector::new();
        let stats = collector.snapshot(LiveCounts {
            active: 2,
            queued: 5,
            retrying: 1,
            effective_max_concurrent: 3,
        });
        assert_eq!(stats.active, 2);
        assert_eq!(stats.queued, 5);
        assert_eq!(stats.retrying, 1);
        assert_eq!(stats.effective_max_concurrent, 3);
    }

    #[test]
    fn test_stats_json_uses_millis() {
        let mut collector = StatsCollector::new();
        collector.record_success(Duration::from_millis(40), Duration::from_millis(1200));
        let json = serde_json::to_value(collector.snapshot(LiveCounts::default())).unwrap();

        assert_eq!(json["average_execution_time_ms"], 1200);
        assert_eq!(json["total_wait_time_ms"], 40);
        assert_eq!(json["completed"], 1);
    }
}

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Timestamps of granted requests for one key, oldest first.
///
/// Entries older than the window are dropped lazily by [`prune`](Self::prune)
/// rather than on a timer. The last window pruned against is remembered so
/// that pushes can trim the record too.
#[derive(Debug, Clone, Default)]
pub struct RateLimitRecord {
    timestamps: VecDeque<Instant>,
    window: Option<Duration>,
}

impl RateLimitRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a granted request at `at`.
    ///
    /// Timestamps are expected to arrive in order; an out-of-order one is
    /// clamped to the newest so the deque stays sorted.
    pub fn push(&mut self, at: Instant) {
        if let Some(window) = self.window {
            self.prune(at, window);
        }
        let at = match self.timestamps.back() {
            Some(&newest) if newest > at => newest,
            _ => at,
        };
        self.timestamps.push_back(at);
    }

    /// Drop every timestamp that falls outside the trailing `window` ending at `now`.
    pub fn prune(&mut self, now: Instant, window: Duration) {
        self.window = Some(window);
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    #[must_use]
    pub fn oldest(&self) -> Option<Instant> {
        self.timestamps.front().copied()
    }

    /// Window of the most recent [`prune`](Self::prune), if any.
    #[must_use]
    pub fn window(&self) -> Option<Duration> {
        self.window
    }

    #[must_use]
    pub fn newest(&self) -> Option<Instant> {
        self.timestamps.back().copied()
    }
}

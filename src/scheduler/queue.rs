//! Priority ordering for requests waiting to run.
//!
//! Requests are ordered by:
//! - Priority (lower number runs first)
//! - Enqueue time (earlier runs first)
//! - Sequence number (stable FIFO when timestamps tie)

use std::cmp::Ordering;
use std::time::Instant;

use crate::id::RequestId;
use crate::scheduler::config::ThrottleConfig;
use crate::scheduler::job::Job;

/// A request waiting in the queue, or travelling back to it after a backoff.
pub(crate) struct QueuedRequest {
    pub id: RequestId,
    pub job: Box<dyn Job>,
    pub config: ThrottleConfig,
    /// When this entry entered the queue; reset on every retry.
    pub enqueued_at: Instant,
    /// When the caller first submitted.
    pub submitted_at: Instant,
    /// Tie-break assigned by the queue on push.
    pub sequence: u64,
    /// Attempts started so far.
    pub attempts: u32,
}

impl QueuedRequest {
    pub fn new(id: RequestId, job: Box<dyn Job>, config: ThrottleConfig) -> Self {
        let now = Instant::now();
        Self {
            id,
            job,
            config,
            enqueued_at: now,
            submitted_at: now,
            sequence: 0,
            attempts: 0,
        }
    }

    pub fn priority(&self) -> i32 {
        self.config.priority
    }

    fn order(&self, other: &Self) -> Ordering {
        self.priority()
            .cmp(&other.priority())
            .then(self.enqueued_at.cmp(&other.enqueued_at))
            .then(self.sequence.cmp(&other.sequence))
    }
}

impl std::fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("id", &self.id)
            .field("priority", &self.priority())
            .field("sequence", &self.sequence)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

/// Requests kept sorted in dequeue order.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    items: Vec<QueuedRequest>,
    next_sequence: u64,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert in order, after every entry that sorts equal or earlier.
    pub fn push(&mut self, mut request: QueuedRequest) {
        request.sequence = self.next_sequence;
        self.next_sequence += 1;
        let index = self
            .items
            .partition_point(|queued| queued.order(&request) != Ordering::Greater);
        self.items.insert(index, request);
    }

    /// Remove the request that should run next.
    pub fn pop(&mut self) -> Option<QueuedRequest> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.items.remove(0))
        }
    }

    /// Remove a specific request, wherever it sits.
    pub fn remove(&mut self, id: &RequestId) -> Option<QueuedRequest> {
        let index = self.items.iter().position(|queued| &queued.id == id)?;
        Some(self.items.remove(index))
    }

    /// Drop requests whose caller went away. Returns how many were dropped.
    pub fn remove_abandoned(&mut self) -> usize {
        let before = self.items.len();
        self.items.retain(|queued| !queued.job.is_abandoned());
        before - self.items.len()
    }

    /// Smallest `max_concurrent` any queued request asked for.
    pub fn min_max_concurrent(&self) -> Option<usize> {
        self.items.iter().map(|queued| queued.config.max_concurrent).min()
    }

    /// Iterate in dequeue order.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedRequest> {
        self.items.iter()
    }
}

//! The coordinator task that owns the queue.
//!
//! Every mutation of the queue, the active set, and the stats happens here,
//! one message at a time. Two inputs feed it:
//! 1. Commands from [`Throttler`](crate::scheduler::Throttler) handles
//!    (submit, cancel, queries)
//! 2. Events from tasks it spawned (an attempt settled, a backoff elapsed)
//!
//! After each message it runs a dispatch pass that starts queued requests
//! while the active set is below the effective concurrency cap.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};

use crate::backoff::BackoffPolicy;
use crate::error::{Result, ThrottleError};
use crate::id::RequestId;
use crate::scheduler::config::{ConcurrencyScope, ThrottlerConfig};
use crate::scheduler::health::HealthReport;
use crate::scheduler::queue::{PendingQueue, QueuedRequest};
use crate::scheduler::stats::{LiveCounts, Stats, StatsCollector};

/// Position of a queued request as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct QueuePosition {
    pub id: RequestId,
    /// Zero-based; the head of the queue is 0.
    pub position: usize,
    pub priority: i32,
    #[serde(rename = "estimated_wait_ms", serialize_with = "crate::scheduler::stats::as_millis")]
    pub estimated_wait: Duration,
}

/// Messages from throttler handles.
pub(crate) enum Command {
    Submit {
        request: QueuedRequest,
        reply: oneshot::Sender<Result<()>>,
    },
    Cancel {
        id: RequestId,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<Stats>,
    },
    QueueStatus {
        reply: oneshot::Sender<Vec<QueuePosition>>,
    },
    Health {
        reply: oneshot::Sender<HealthReport>,
    },
}

/// Messages from tasks spawned by the coordinator.
enum Event {
    Settled { id: RequestId, result: Result<()> },
    RetryReady(QueuedRequest),
}

struct ActiveRequest {
    request: QueuedRequest,
    started_at: Instant,
}

pub(crate) struct Coordinator {
    config: ThrottlerConfig,
    backoff: BackoffPolicy,
    queue: PendingQueue,
    active: HashMap<RequestId, ActiveRequest>,
    retrying: usize,
    stats: StatsCollector,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
}

impl Coordinator {
    pub fn new(config: ThrottlerConfig, commands: mpsc::UnboundedReceiver<Command>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            backoff: BackoffPolicy::new(config.backoff),
            config,
            queue: PendingQueue::new(),
            active: HashMap::new(),
            retrying: 0,
            stats: StatsCollector::new(),
            commands,
            events_tx,
            events_rx,
        }
    }

    /// Run until every handle is dropped and no work remains.
    pub async fn run(mut self) {
        let mut accepting = true;

        loop {
            tokio::select! {
                command = self.commands.recv(), if accepting => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        tracing::debug!(
                            queued = self.queue.len(),
                            active = self.active.len(),
                            retrying = self.retrying,
                            "All throttler handles dropped, draining"
                        );
                        accepting = false;
                    }
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event),
            }

            if !accepting && self.is_idle() {
                break;
            }
        }

        tracing::debug!("Coordinator stopped");
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.active.is_empty() && self.retrying == 0
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { request, reply } => {
                let admitted = self.admit(request);
                let _ = reply.send(admitted);
            }
            Command::Cancel { id, reply } => {
                let _ = reply.send(self.cancel(&id));
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::QueueStatus { reply } => {
                let _ = reply.send(self.queue_status());
            }
            Command::Health { reply } => {
                let _ = reply.send(HealthReport::from_stats(&self.stats(), &self.config.health));
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Settled { id, result } => self.settle(id, result),
            Event::RetryReady(mut request) => {
                self.retrying -= 1;
                request.enqueued_at = Instant::now();
                tracing::debug!(
                    request_id = %request.id,
                    attempt = request.attempts + 1,
                    "Re-enqueueing after backoff"
                );
                self.queue.push(request);
                self.dispatch();
            }
        }
    }

    /// Enqueue a new request unless the queue is full, then dispatch.
    fn admit(&mut self, request: QueuedRequest) -> Result<()> {
        let max_queue_size = request.config.max_queue_size;
        if self.queue.len() >= max_queue_size {
            let withdrawn = self.queue.remove_abandoned();
            if withdrawn > 0 {
                tracing::debug!(withdrawn = withdrawn, "Dropped queued requests whose callers went away");
                for _ in 0..withdrawn {
                    self.stats.record_cancelled();
                }
            }
        }

        let queued = self.queue.len();

        if queued >= max_queue_size {
            self.stats.record_rejected();
            tracing::warn!(
                request_id = %request.id,
                queued = queued,
                max_queue_size = max_queue_size,
                "Queue full, rejecting request"
            );
            return Err(ThrottleError::QueueFull { queued, max_queue_size });
        }

        tracing::debug!(
            request_id = %request.id,
            priority = request.priority(),
            queued = queued + 1,
            "Request queued"
        );
        self.queue.push(request);
        self.dispatch();
        Ok(())
    }

    /// Smallest `max_concurrent` among the requests in scope.
    pub(crate) fn effective_max_concurrent(&self) -> usize {
        let queued = self.queue.min_max_concurrent();
        let active = match self.config.concurrency_scope {
            ConcurrencyScope::Queued => None,
            ConcurrencyScope::QueuedAndActive => self
                .active
                .values()
                .map(|active| active.request.config.max_concurrent)
                .min(),
        };

        match (queued, active) {
            (Some(q), Some(a)) => q.min(a),
            (Some(limit), None) | (None, Some(limit)) => limit,
            (None, None) => self.config.fallback_max_concurrent,
        }
    }

    /// Start queued requests while capacity allows.
    fn dispatch(&mut self) {
        while !self.queue.is_empty() && self.active.len() < self.effective_max_concurrent() {
            let Some(request) = self.queue.pop() else {
                break;
            };

            if request.job.is_abandoned() {
                tracing::debug!(request_id = %request.id, "Caller went away, dropping request");
                self.stats.record_cancelled();
                continue;
            }

            self.start(request);
        }
    }

    fn start(&mut self, mut request: QueuedRequest) {
        let id = request.id.clone();
        let timeout = request.config.timeout();
        let started_at = Instant::now();
        request.attempts += 1;

        tracing::debug!(
            request_id = %id,
            attempt = request.attempts,
            active = self.active.len() + 1,
            waited_ms = started_at.duration_since(request.enqueued_at).as_millis() as u64,
            "Starting request"
        );

        let attempt = AssertUnwindSafe(request.job.attempt()).catch_unwind();
        let events = self.events_tx.clone();
        let task_id = id.clone();

        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, attempt).await {
                Ok(Ok(Ok(()))) => Ok(()),
                Ok(Ok(Err(e))) => Err(ThrottleError::Operation(e)),
                Ok(Err(_)) => Err(ThrottleError::Operation("operation panicked".into())),
                Err(_) => Err(ThrottleError::Timeout { timeout }),
            };
            let _ = events.send(Event::Settled { id: task_id, result });
        });

        self.active.insert(id, ActiveRequest { request, started_at });
    }

    fn settle(&mut self, id: RequestId, result: Result<()>) {
        let Some(ActiveRequest { request, started_at }) = self.active.remove(&id) else {
            tracing::warn!(request_id = %id, "Settle event for unknown request");
            return;
        };

        let wait = started_at.duration_since(request.enqueued_at);
        let execution = started_at.elapsed();

        match result {
            Ok(()) => {
                self.stats.record_success(wait, execution);
                tracing::debug!(
                    request_id = %id,
                    attempts = request.attempts,
                    execution_ms = execution.as_millis() as u64,
                    total_ms = request.submitted_at.elapsed().as_millis() as u64,
                    "Request completed"
                );
                request.job.resolve();
            }
            Err(error) if request.attempts <= request.config.retry_attempts && !request.job.is_abandoned() => {
                self.schedule_retry(request, error);
            }
            Err(error) => {
                if request.job.is_abandoned() {
                    self.stats.record_cancelled();
                } else {
                    self.stats.record_failure(wait);
                }
                tracing::warn!(
                    request_id = %id,
                    attempts = request.attempts,
                    total_ms = request.submitted_at.elapsed().as_millis() as u64,
                    error = %error,
                    "Request failed, retries exhausted"
                );
                let attempts = request.attempts;
                request.job.reject(ThrottleError::MaxRetriesExceeded {
                    attempts,
                    source: Box::new(error),
                });
            }
        }

        self.dispatch();
    }

    fn schedule_retry(&mut self, request: QueuedRequest, error: ThrottleError) {
        let delay = self
            .backoff
            .delay(request.attempts, request.config.backoff_multiplier);

        tracing::warn!(
            request_id = %request.id,
            attempt = request.attempts,
            retry_attempts = request.config.retry_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Attempt failed, retrying after backoff"
        );

        self.stats.record_retry();
        self.retrying += 1;

        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::RetryReady(request));
        });
    }

    /// Remove a queued request. Active and retrying requests are left alone.
    fn cancel(&mut self, id: &RequestId) -> bool {
        match self.queue.remove(id) {
            Some(request) => {
                self.stats.record_cancelled();
                tracing::info!(request_id = %id, "Request cancelled");
                request.job.reject(ThrottleError::Cancelled(id.clone()));
                true
            }
            None => {
                tracing::debug!(
                    request_id = %id,
                    active = self.active.contains_key(id),
                    "Cancel ignored, request not queued"
                );
                false
            }
        }
    }

    fn stats(&self) -> Stats {
        self.stats.snapshot(LiveCounts {
            active: self.active.len(),
            queued: self.queue.len(),
            retrying: self.retrying,
            effective_max_concurrent: self.effective_max_concurrent(),
        })
    }

    /// `floor(position / effective_max_concurrent) * average_execution_time`.
    fn queue_status(&self) -> Vec<QueuePosition> {
        let per_request = self
            .stats
            .average_execution_time()
            .unwrap_or_else(|| self.config.default_execution_estimate());
        let concurrency = self.effective_max_concurrent().max(1);

        self.queue
            .iter()
            .enumerate()
            .map(|(position, request)| {
                let rounds = u32::try_from(position / concurrency).unwrap_or(u32::MAX);
                QueuePosition {
                    id: request.id.clone(),
                    position,
                    priority: request.priority(),
                    estimated_wait: per_request.saturating_mul(rounds),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::scheduler::config::ThrottleConfig;
    use crate::scheduler::job::TypedJob;
    use crate::scheduler::job::tests::noop_job;

    fn coordinator(scope: ConcurrencyScope) -> Coordinator {
        let (_tx, rx) = mpsc::unbounded_channel();
        Coordinator::new(ThrottlerConfig::default().with_concurrency_scope(scope), rx)
    }

    fn pending(id: &str, max_concurrent: usize) -> (QueuedRequest, oneshot::Receiver<Result<()>>) {
        let (tx, rx) = oneshot::channel();
        let job = TypedJob::new(
            || async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok::<(), BoxError>(())
            },
            tx,
        );
        let config = ThrottleConfig::default().with_max_concurrent(max_concurrent);
        (QueuedRequest::new(RequestId::from(id), Box::new(job), config), rx)
    }

    #[tokio::test]
    async fn test_effective_concurrency_fallback() {
        let c = coordinator(ConcurrencyScope::QueuedAndActive);
        assert_eq!(c.effective_max_concurrent(), 10);
    }

    #[tokio::test]
    async fn test_admit_starts_up_to_cap() {
        let mut c = coordinator(ConcurrencyScope::QueuedAndActive);
        let mut receivers = Vec::new();
        for i in 0..4 {
            let (request, rx) = pending(&format!("r{}", i), 2);
            c.admit(request).unwrap();
            receivers.push(rx);
        }

        assert_eq!(c.active.len(), 2);
        assert_eq!(c.queue.len(), 2);
    }

    #[tokio::test]
    async fn test_queued_scope_ignores_active_limits() {
        let mut c = coordinator(ConcurrencyScope::Queued);
        let (narrow, _rx1) = pending("narrow", 1);
        c.admit(narrow).unwrap();
        assert_eq!(c.active.len(), 1);

        // Queue is empty again, so a wider request may join
        let (wide, _rx2) = pending("wide", 5);
        c.admit(wide).unwrap();
        assert_eq!(c.active.len(), 2);
    }

    #[tokio::test]
    async fn test_active_scope_honours_running_limits() {
        let mut c = coordinator(ConcurrencyScope::QueuedAndActive);
        let (narrow, _rx1) = pending("narrow", 1);
        c.admit(narrow).unwrap();

        let (wide, _rx2) = pending("wide", 5);
        c.admit(wide).unwrap();
        assert_eq!(c.active.len(), 1);
        assert_eq!(c.queue.len(), 1);
        assert_eq!(c.effective_max_concurrent(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_requests_are_skipped() {
        let mut c = coordinator(ConcurrencyScope::QueuedAndActive);
        let request = QueuedRequest::new(RequestId::from("gone"), noop_job(), ThrottleConfig::default());
        c.admit(request).unwrap();

        assert!(c.active.is_empty());
        assert!(c.queue.is_empty());
        assert_eq!(c.stats().cancelled, 1);
    }

    #[tokio::test]
    async fn test_cancel_only_queued() {
        let mut c = coordinator(ConcurrencyScope::QueuedAndActive);
        let (first, _rx1) = pending("first", 1);
        let (second, rx2) = pending("second", 1);
        c.admit(first).unwrap();
        c.admit(second).unwrap();

        assert!(!c.cancel(&RequestId::from("first")));
        assert!(c.cancel(&RequestId::from("second")));
        assert!(!c.cancel(&RequestId::from("second")));
        assert!(matches!(rx2.await.unwrap(), Err(ThrottleError::Cancelled(_))));

        let stats = c.stats();
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.completed + stats.failed, 0);
    }

    #[tokio::test]
    async fn test_queue_status_estimates() {
        let mut c = coordinator(ConcurrencyScope::QueuedAndActive);
        let mut receivers = Vec::new();
        for i in 0..6 {
            let (request, rx) = pending(&format!("r{}", i), 2);
            c.admit(request).unwrap();
            receivers.push(rx);
        }

        let status = c.queue_status();
        assert_eq!(status.len(), 4);
        let waits: Vec<u64> = status.iter().map(|p| p.estimated_wait.as_millis() as u64).collect();
        // Default estimate of 2000ms per round of 2
        assert_eq!(waits, vec![0, 0, 2000, 2000]);
        assert_eq!(status[0].id.as_str(), "r2");
        assert_eq!(status[3].position, 3);
    }

    #[tokio::test]
    async fn test_abandoned_entries_free_queue_space() {
        let mut c = coordinator(ConcurrencyScope::QueuedAndActive);
        let (running, _rx1) = pending("running", 1);
        c.admit(running).unwrap();

        let config = ThrottleConfig::default().with_max_concurrent(1).with_max_queue_size(1);
        c.admit(QueuedRequest::new(RequestId::from("gone"), noop_job(), config.clone()))
            .unwrap();
        assert_eq!(c.queue.len(), 1);

        let (mut next, _rx2) = pending("next", 1);
        next.config = config;
        c.admit(next).unwrap();

        let stats = c.stats();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.rejected, 0);
        assert_eq!(c.queue_status()[0].id.as_str(), "next");
    }

    #[tokio::test]
    async fn test_queue_full_rejected() {
        let mut c = coordinator(ConcurrencyScope::QueuedAndActive);
        let (a, _rx1) = pending("a", 1);
        c.admit(a).unwrap();
        let (mut b, _rx2) = pending("b", 1);
        b.config.max_queue_size = 1;
        c.admit(b).unwrap();

        let (mut overflow, _rx3) = pending("c", 1);
        overflow.config.max_queue_size = 1;
        let err = c.admit(overflow).unwrap_err();
        assert!(matches!(err, ThrottleError::QueueFull { queued: 1, max_queue_size: 1 }));
        assert_eq!(c.stats().rejected, 1);
    }
}

//! Caller-facing handle to the admission queue.

use std::future::Future;

use tokio::sync::{mpsc, oneshot};

use crate::error::{BoxError, Result, ThrottleError};
use crate::id::RequestId;
use crate::scheduler::config::{ThrottleConfig, ThrottlerConfig};
use crate::scheduler::coordinator::{Command, Coordinator, QueuePosition};
use crate::scheduler::health::HealthReport;
use crate::scheduler::job::TypedJob;
use crate::scheduler::queue::QueuedRequest;
use crate::scheduler::stats::Stats;

/// Handle to a throttler. Cheap to clone; all clones share one coordinator.
///
/// The coordinator keeps running until every clone is dropped and all
/// admitted work has settled.
#[derive(Debug, Clone)]
pub struct Throttler {
    commands: mpsc::UnboundedSender<Command>,
}

impl Throttler {
    /// Create a throttler and spawn its coordinator.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ThrottlerConfig) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(Coordinator::new(config, rx).run());
        Self { commands }
    }

    /// Run `operation` under `config` and wait for its result.
    ///
    /// `operation` is called once per attempt, so retries get a fresh future.
    pub async fn submit<T, F, Fut, E>(&self, operation: F, config: ThrottleConfig) -> Result<T>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.schedule(operation, config).await?.result().await
    }

    /// Enqueue `operation` and return once it has been admitted.
    ///
    /// Fails with [`ThrottleError::QueueFull`] or
    /// [`ThrottleError::InvalidConfig`] without ever calling `operation`.
    /// Dropping the returned handle before the request starts withdraws it.
    pub async fn schedule<T, F, Fut, E>(&self, operation: F, config: ThrottleConfig) -> Result<RequestHandle<T>>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        config.validate()?;

        let id = RequestId::generate();
        let (result_tx, result_rx) = oneshot::channel();
        let job = TypedJob::new(operation, result_tx);
        let request = QueuedRequest::new(id.clone(), Box::new(job), config);

        let (reply, admitted) = oneshot::channel();
        self.send(Command::Submit { request, reply })?;
        admitted.await.map_err(|_| ThrottleError::Closed)??;

        Ok(RequestHandle { id, result: result_rx })
    }

    /// Withdraw a request that hasn't started yet.
    ///
    /// Returns false if the request is already running, waiting out a
    /// backoff, finished, or unknown. Running operations are never interrupted.
    pub async fn cancel_request(&self, id: &RequestId) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Cancel { id: id.clone(), reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn stats(&self) -> Result<Stats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply })?;
        rx.await.map_err(|_| ThrottleError::Closed)
    }

    /// Queued requests in the order they will start.
    pub async fn queue_status(&self) -> Result<Vec<QueuePosition>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::QueueStatus { reply })?;
        rx.await.map_err(|_| ThrottleError::Closed)
    }

    pub async fn health_status(&self) -> Result<HealthReport> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Health { reply })?;
        rx.await.map_err(|_| ThrottleError::Closed)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| ThrottleError::Closed)
    }
}

impl Default for Throttler {
    fn default() -> Self {
        Self::new(ThrottlerConfig::default())
    }
}

/// An admitted request.
#[derive(Debug)]
pub struct RequestHandle<T> {
    id: RequestId,
    result: oneshot::Receiver<Result<T>>,
}

impl<T> RequestHandle<T> {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the request to complete, fail, or be cancelled.
    pub async fn result(self) -> Result<T> {
        self.result.await.unwrap_or(Err(ThrottleError::Closed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn throttler() -> Throttler {
        Throttler::default()
    }

    #[tokio::test]
    async fn test_submit_returns_value() {
        let t = throttler();
        let value = t
            .submit(|| async { Ok::<_, BoxError>("done") }, ThrottleConfig::default())
            .await
            .unwrap();
        assert_eq!(value, "done");

        let stats = t.stats().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn test_invalid_config_never_runs_operation() {
        let t = throttler();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let err = t
            .submit(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, BoxError>(()) }
                },
                ThrottleConfig::default().with_max_concurrent(0),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ThrottleError::InvalidConfig(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_succeed() {
        let t = throttler();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let value = t
            .submit(
                move || {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err::<u32, _>("transient")
                        } else {
                            Ok(7)
                        }
                    }
                },
                ThrottleConfig::default().with_retry_attempts(1),
            )
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let stats = t.stats().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.retried, 1);
    }

    #[tokio::test]
    async fn test_no_retries_wraps_single_failure() {
        let t = throttler();
        let err = t
            .submit(
                || async { Err::<(), _>("nope") },
                ThrottleConfig::default().with_retry_attempts(0),
            )
            .await
            .unwrap_err();

        match err {
            ThrottleError::MaxRetriesExceeded { attempts, source } => {
                assert_eq!(attempts, 1);
                assert!(matches!(*source, ThrottleError::Operation(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(t.stats().await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_panicking_operation_is_a_failure() {
        let t = throttler();
        let err = t
            .submit(
                || async {
                    if true {
                        panic!("boom");
                    }
                    Ok::<(), BoxError>(())
                },
                ThrottleConfig::default().with_retry_attempts(0),
            )
            .await
            .unwrap_err();

        assert!(matches!(err.last_error(), ThrottleError::Operation(_)));
        let stats = t.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn test_panicking_operation_call_leaves_throttler_running() {
        let t = throttler();
        let err = t
            .submit(
                || -> futures::future::Ready<std::result::Result<(), BoxError>> { panic!("factory boom") },
                ThrottleConfig::default().with_retry_attempts(0),
            )
            .await
            .unwrap_err();

        assert!(matches!(err.last_error(), ThrottleError::Operation(_)));

        let value = t
            .submit(|| async { Ok::<_, BoxError>(1) }, ThrottleConfig::default())
            .await
            .unwrap();
        assert_eq!(value, 1);

        let stats = t.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_order_after_capacity_frees() {
        let t = throttler();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let config = ThrottleConfig::default().with_max_concurrent(1);

        // Occupy the only slot
        let blocker = t
            .schedule(
                || async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, BoxError>(())
                },
                config.clone(),
            )
            .await
            .unwrap();

        let mut handles = Vec::new();
        for (name, priority) in [("low", 9), ("high", 1), ("mid", 5), ("high2", 1)] {
            let order = Arc::clone(&order);
            let handle = t
                .schedule(
                    move || {
                        order.lock().unwrap().push(name);
                        async { Ok::<_, BoxError>(()) }
                    },
                    config.clone().with_priority(priority),
                )
                .await
                .unwrap();
            handles.push(handle);
        }

        blocker.result().await.unwrap();
        for handle in handles {
            handle.result().await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec!["high", "high2", "mid", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_withdraws_request() {
        let t = throttler();
        let calls = Arc::new(AtomicUsize::new(0));
        let config = ThrottleConfig::default().with_max_concurrent(1);

        let blocker = t
            .schedule(
                || async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, BoxError>(())
                },
                config.clone(),
            )
            .await
            .unwrap();

        let counter = Arc::clone(&calls);
        let dropped = t
            .schedule(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, BoxError>(()) }
                },
                config,
            )
            .await
            .unwrap();
        drop(dropped);

        blocker.result().await.unwrap();
        let stats = t.stats().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.queued, 0);
    }

    #[tokio::test]
    async fn test_health_status_starts_healthy() {
        let t = throttler();
        let report = t.health_status().await.unwrap();
        assert_eq!(report.status, crate::scheduler::health::HealthStatus::Healthy);
    }
}

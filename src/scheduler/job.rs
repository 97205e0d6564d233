//! Type-erased operations held by the queue.
//!
//! The coordinator never sees the caller's output type. Each attempt stores
//! its value in a slot owned by the job, and the coordinator hands it to the
//! caller once the request has been accounted for.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::sync::oneshot;

use crate::error::{BoxError, Result, ThrottleError};

/// One in-flight attempt. Resolves once the operation has settled.
pub(crate) type AttemptFuture = BoxFuture<'static, std::result::Result<(), BoxError>>;

pub(crate) trait Job: Send {
    /// Start a fresh attempt of the operation.
    fn attempt(&mut self) -> AttemptFuture;

    /// Deliver the value produced by the last successful attempt.
    fn resolve(self: Box<Self>);

    /// Fail the caller.
    fn reject(self: Box<Self>, error: ThrottleError);

    /// The caller dropped its handle and no longer wants the result.
    fn is_abandoned(&self) -> bool;
}

pub(crate) struct TypedJob<T, F> {
    operation: F,
    output: Arc<Mutex<Option<T>>>,
    reply: oneshot::Sender<Result<T>>,
}

impl<T, F> TypedJob<T, F> {
    pub fn new(operation: F, reply: oneshot::Sender<Result<T>>) -> Self {
        Self {
            operation,
            output: Arc::new(Mutex::new(None)),
            reply,
        }
    }
}

impl<T, F, Fut, E> Job for TypedJob<T, F>
where
    T: Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    fn attempt(&mut self) -> AttemptFuture {
        // Called on the coordinator task, so a panic is caught here
        let operation = match std::panic::catch_unwind(AssertUnwindSafe(|| (self.operation)())) {
            Ok(operation) => operation,
            Err(_) => return Box::pin(futures::future::ready(Err::<(), BoxError>("operation panicked".into()))),
        };
        let output = Arc::clone(&self.output);
        Box::pin(async move {
            let value = operation.await.map_err(Into::<BoxError>::into)?;
            *output.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(value);
            Ok::<(), BoxError>(())
        })
    }

    fn resolve(self: Box<Self>) {
        let TypedJob { output, reply, .. } = *self;
        let value = output.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        // Slot is always filled before an attempt reports success
        let result = value.ok_or(ThrottleError::Closed);
        let _ = reply.send(result);
    }

    fn reject(self: Box<Self>, error: ThrottleError) {
        let _ = self.reply.send(Err(error));
    }

    fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A job whose caller has already gone away.
    pub(crate) fn noop_job() -> Box<dyn Job> {
        let (tx, _rx) = oneshot::channel::<Result<()>>();
        Box::new(TypedJob::new(|| async { Ok::<(), BoxError>(()) }, tx))
    }

    #[tokio::test]
    async fn test_attempt_then_resolve_delivers_value() {
        let (tx, rx) = oneshot::channel();
        let mut job: Box<dyn Job> = Box::new(TypedJob::new(|| async { Ok::<_, BoxError>(42) }, tx));

        job.attempt().await.unwrap();
        job.resolve();

        assert_eq!(rx.await.unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_attempt_error_is_boxed() {
        let (tx, _rx) = oneshot::channel::<Result<()>>();
        let mut job = TypedJob::new(|| async { Err::<(), _>("bad gateway") }, tx);

        let err = job.attempt().await.unwrap_err();
        assert_eq!(err.to_string(), "bad gateway");
    }

    #[tokio::test]
    async fn test_each_attempt_calls_operation_again() {
        let (tx, _rx) = oneshot::channel::<Result<u32>>();
        let mut calls = 0u32;
        let mut job = TypedJob::new(
            move || {
                calls += 1;
                let n = calls;
                async move { Ok::<_, BoxError>(n) }
            },
            tx,
        );

        job.attempt().await.unwrap();
        job.attempt().await.unwrap();
        let stored = *job.output.lock().unwrap();
        assert_eq!(stored, Some(2));
    }

    #[tokio::test]
    async fn test_panicking_operation_call_fails_attempt() {
        let (tx, _rx) = oneshot::channel::<Result<()>>();
        let mut job = TypedJob::new(
            || -> futures::future::Ready<std::result::Result<(), BoxError>> { panic!("factory boom") },
            tx,
        );

        let err = job.attempt().await.unwrap_err();
        assert_eq!(err.to_string(), "operation panicked");
    }

    #[tokio::test]
    async fn test_reject_delivers_error() {
        let (tx, rx) = oneshot::channel::<Result<()>>();
        let job: Box<dyn Job> = Box::new(TypedJob::new(|| async { Ok::<(), BoxError>(()) }, tx));

        job.reject(ThrottleError::Closed);
        assert!(matches!(rx.await.unwrap(), Err(ThrottleError::Closed)));
    }

    #[test]
    fn test_abandoned_when_receiver_dropped() {
        let (tx, rx) = oneshot::channel::<Result<()>>();
        let job = TypedJob::new(|| async { Ok::<(), BoxError>(()) }, tx);
        assert!(!job.is_abandoned());
        drop(rx);
        assert!(job.is_abandoned());
    }

    #[test]
    fn test_noop_job_is_abandoned() {
        assert!(noop_job().is_abandoned());
    }
}

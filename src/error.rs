//! Error types for throttlr
//!
//! Centralized error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

use crate::id::RequestId;

/// Boxed error produced by a wrapped operation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// All error types that can surface from the admission queue
#[derive(Debug, Error)]
pub enum ThrottleError {
    /// Queue was at capacity when the request was submitted
    #[error("Queue full: {queued} requests queued (max {max_queue_size})")]
    QueueFull { queued: usize, max_queue_size: usize },

    /// A single attempt exceeded its timeout
    #[error("Timed out after {}ms", .timeout.as_millis())]
    Timeout { timeout: Duration },

    /// The wrapped operation itself failed
    #[error("Operation failed: {0}")]
    Operation(#[source] BoxError),

    /// Request was cancelled while still queued
    #[error("Request cancelled: {0}")]
    Cancelled(RequestId),

    /// Every allowed attempt failed
    #[error("Max retries exceeded after {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        source: Box<ThrottleError>,
    },

    /// Per-call configuration failed validation
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// The coordinator is no longer running
    #[error("Throttler is closed")]
    Closed,
}

impl ThrottleError {
    /// Whether a retry may be attempted after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ThrottleError::Timeout { .. } | ThrottleError::Operation(_))
    }

    /// The error of the last attempt, unwrapping `MaxRetriesExceeded`.
    pub fn last_error(&self) -> &ThrottleError {
        match self {
            ThrottleError::MaxRetriesExceeded { source, .. } => source.last_error(),
            other => other,
        }
    }
}

/// Result type alias for throttlr operations
pub type Result<T> = std::result::Result<T, ThrottleError>;

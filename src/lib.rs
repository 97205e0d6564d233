//! throttlr - in-process admission control for async work
//!
//! Bounds how many operations run at once, queues the rest by priority,
//! retries transient failures with jittered exponential backoff, and offers
//! a per-key sliding-window rate limiter for callers to consult on their own.

pub mod backoff;
pub mod error;
pub mod id;
pub mod rate_limit;
pub mod scheduler;

pub use backoff::{BackoffConfig, BackoffPolicy};
pub use error::{BoxError, Result, ThrottleError};
pub use id::RequestId;
pub use rate_limit::{RateLimitConfig, RateLimitDecision, RateLimiter};
pub use scheduler::{HealthReport, HealthStatus, Stats, ThrottleConfig, Throttler, ThrottlerConfig};

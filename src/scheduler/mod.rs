//! Scheduler module: priority queue plus bounded-concurrency coordinator.
//!
//! This module provides:
//! - **Throttler**: the caller-facing handle for submitting operations.
//! - **Coordinator**: a single task that owns the queue, the active set, and
//!   the stats, and decides what starts next.
//! - **Stats and health**: counters updated as requests settle, and a
//!   healthy/degraded/unhealthy classification on top of them.
//!
//! # Architecture
//!
//! The coordinator is event driven:
//! 1. `submit` sends the request to the coordinator, which queues it or
//!    rejects it when the queue is full
//! 2. A dispatch pass starts requests in (priority, enqueue time) order while
//!    the active set is below the effective concurrency cap
//! 3. Each attempt runs on its own task, racing the per-attempt timeout
//! 4. Settled attempts report back; failures wait out a backoff and are
//!    queued again until retries run out
//!
//! # Example
//!
//! ```ignore
//! use throttlr::scheduler::{ThrottleConfig, Throttler, ThrottlerConfig};
//!
//! let throttler = Throttler::new(ThrottlerConfig::default());
//! let body = throttler
//!     .submit(|| fetch_page("https://example.com"), ThrottleConfig::api_call())
//!     .await?;
//! ```

mod config;
mod coordinator;
mod health;
mod job;
mod queue;
mod stats;
mod throttler;

pub use config::{
    ConcurrencyScope, DEFAULT_EXECUTION_ESTIMATE_MS, DEFAULT_FALLBACK_MAX_CONCURRENT, PROFILE_NAMES, ThrottleConfig,
    ThrottlerConfig,
};
pub use coordinator::QueuePosition;
pub use health::{HealthDetails, HealthReport, HealthStatus, HealthThresholds, classify, is_under_heavy_load};
pub use stats::{LiveCounts, Stats, StatsCollector};
pub use throttler::{RequestHandle, Throttler};

//! Sliding-window rate limiting.
//!
//! Each key keeps the timestamps of the requests it was granted. A check
//! counts the timestamps still inside the trailing window; recording is a
//! separate step so callers decide when a request actually counts.
//!
//! ```ignore
//! let limiter = RateLimiter::new();
//! let config = RateLimitConfig::new(3, 1000);
//!
//! if limiter.check_rate_limit("search", &config).allowed {
//!     let ok = do_search().await.is_ok();
//!     limiter.record_request("search", ok);
//! }
//! ```

mod limiter;
mod record;

pub use limiter::{RateLimitConfig, RateLimitDecision, RateLimiter};
pub use record::RateLimitRecord;

//! ID generation utilities for throttlr
//!
//! Provides the request identifier type handed back to callers so they can
//! cancel or look up queued work.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Identifier of a submitted request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a unique request ID
    ///
    /// Format: `req-{timestamp_ms}-{random_hex}`
    /// Example: `req-1738300800123-a1b2c3d4`
    pub fn generate() -> Self {
        let timestamp = now_ms();
        let random: u32 = rand::rng().random();
        Self(format!("req-{}-{:08x}", timestamp, random))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

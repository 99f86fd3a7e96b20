//! Distributed admission control for pollers
//!
//! A [`RateLimiter`] hands out at most `limit` [`AdmissionToken`]s per queue
//! identity per window. Pollers take a token before each long poll and give
//! it back when the poll comes back empty or fails.
//!
//! - [`RedisRateLimiter`] - counters in Redis, shared across processes
//! - [`InMemoryRateLimiter`] - same semantics inside one process
//!
//! # Windows
//!
//! ```text
//! identity "arn:...:activity:orders", WindowGranularity::Second
//!
//!   key = "<prefix>arn:...:activity:orders 2024-05-01 12:00:07"
//!   INCR key ── count <= limit ──► token(key)
//!            └─ count >  limit ──► DECR key, no token
//! ```

mod memory;
mod redis_limiter;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::duration_millis;

pub use self::memory::InMemoryRateLimiter;
pub use self::redis_limiter::RedisRateLimiter;

/// Rate limiter errors
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// No limit configured for the identity and no default limit set
    #[error("no rate limit configured for {0}")]
    UnknownIdentity(String),

    /// Redis error
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Counter store unavailable
    #[error("rate limiter store unavailable: {0}")]
    Unavailable(String),
}

/// Opaque handle for one admitted claim slot
///
/// Holds the bucket key it was drawn from; it must be returned to the same
/// limiter that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdmissionToken(String);

impl AdmissionToken {
    /// Wrap a bucket key
    pub fn new(bucket_key: impl Into<String>) -> Self {
        Self(bucket_key.into())
    }

    /// The bucket key this token was drawn from
    pub fn bucket_key(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AdmissionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How counters are bucketed in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowGranularity {
    /// One bucket per wall-clock second (UTC)
    #[default]
    Second,

    /// A single bucket per identity
    ///
    /// Capacity only comes back through returned tokens or when the key
    /// expires `key_ttl` after its last admission. Rejections do not extend it.
    Fixed,
}

/// Rate limiter configuration
///
/// # Example
///
/// ```
/// use sfn_poller::limiter::RateLimitConfig;
///
/// let config = RateLimitConfig::new()
///     .with_limit("arn:activity:orders", 5)
///     .with_default_limit(1);
/// assert_eq!(config.limit_for("arn:activity:orders").unwrap(), 5);
/// assert_eq!(config.limit_for("arn:activity:other").unwrap(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum outstanding tokens per identity per window
    pub limits: HashMap<String, u32>,

    /// Limit for identities missing from `limits`
    pub default_limit: Option<u32>,

    /// Expiry applied to bucket keys on admission and return
    #[serde(with = "duration_millis")]
    pub key_ttl: Duration,

    /// Bucketing strategy
    pub window: WindowGranularity,

    /// Prefix prepended to every bucket key
    pub key_prefix: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limits: HashMap::new(),
            default_limit: None,
            key_ttl: Duration::from_secs(10),
            window: WindowGranularity::Second,
            key_prefix: String::new(),
        }
    }
}

impl RateLimitConfig {
    /// Create a new rate limit configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the limit for one identity
    pub fn with_limit(mut self, identity: impl Into<String>, limit: u32) -> Self {
        self.limits.insert(identity.into(), limit);
        self
    }

    /// Set the limit used for identities without their own entry
    pub fn with_default_limit(mut self, limit: u32) -> Self {
        self.default_limit = Some(limit);
        self
    }

    /// Set the bucket key expiry
    pub fn with_key_ttl(mut self, ttl: Duration) -> Self {
        self.key_ttl = ttl.max(Duration::from_millis(1));
        self
    }

    /// Set the window granularity
    pub fn with_window(mut self, window: WindowGranularity) -> Self {
        self.window = window;
        self
    }

    /// Set the key prefix
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Configured limit for `identity`
    pub fn limit_for(&self, identity: &str) -> Result<u32, RateLimitError> {
        self.limits
            .get(identity)
            .copied()
            .or(self.default_limit)
            .ok_or_else(|| RateLimitError::UnknownIdentity(identity.to_string()))
    }

    /// Bucket key for `identity` at `now`
    pub fn bucket_key(&self, identity: &str, now: DateTime<Utc>) -> String {
        match self.window {
            WindowGranularity::Second => format!(
                "{}{} {}",
                self.key_prefix,
                identity,
                now.format("%Y-%m-%d %H:%M:%S")
            ),
            WindowGranularity::Fixed => format!("{}{}", self.key_prefix, identity),
        }
    }
}

/// Admission controller shared by pollers
#[async_trait]
pub trait RateLimiter: Send + Sync + 'static {
    /// Try to take one slot for `identity`
    ///
    /// `Ok(None)` means the window is at capacity; try again later.
    async fn get_token(&self, identity: &str) -> Result<Option<AdmissionToken>, RateLimitError>;

    /// Give a slot back to the bucket it was drawn from
    async fn return_token(&self, token: &AdmissionToken) -> Result<(), RateLimitError>;
}

//! In-process rate limiter

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{AdmissionToken, RateLimitConfig, RateLimitError, RateLimiter};

struct Bucket {
    count: u32,
    expires_at: Instant,
}

/// Rate limiter keeping its buckets in process memory
///
/// Same admission rules as [`RedisRateLimiter`](super::RedisRateLimiter),
/// with a mutex standing in for the Redis script. Useful for tests and
/// single-process deployments.
///
/// # Example
///
/// ```ignore
/// use sfn_poller::limiter::{InMemoryRateLimiter, RateLimitConfig, RateLimiter};
///
/// let limiter = InMemoryRateLimiter::new(RateLimitConfig::new().with_limit("arn:x", 1));
/// assert!(limiter.get_token("arn:x").await?.is_some());
/// ```
pub struct InMemoryRateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl InMemoryRateLimiter {
    /// Create a new in-memory limiter
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Outstanding tokens in the bucket `bucket_key` (0 if absent or expired)
    pub fn outstanding(&self, bucket_key: &str) -> u32 {
        let now = Instant::now();
        self.buckets
            .lock()
            .get(bucket_key)
            .filter(|b| b.expires_at > now)
            .map_or(0, |b| b.count)
    }

    /// The limiter configuration
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn get_token(&self, identity: &str) -> Result<Option<AdmissionToken>, RateLimitError> {
        let limit = self.config.limit_for(identity)?;
        let key = self.config.bucket_key(identity, Utc::now());
        let now = Instant::now();

        let mut buckets = self.buckets.lock();
        buckets.retain(|_, b| b.expires_at > now);

        let ttl = self.config.key_ttl;
        let bucket = buckets.entry(key.clone()).or_insert(Bucket {
            count: 0,
            expires_at: now + ttl,
        });

        // Rejections leave the expiry alone so a full bucket still drains.
        if bucket.count >= limit {
            return Ok(None);
        }
        bucket.count += 1;
        bucket.expires_at = now + ttl;
        Ok(Some(AdmissionToken::new(key)))
    }

    async fn return_token(&self, token: &AdmissionToken) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry(token.bucket_key().to_string())
            .or_insert(Bucket {
                count: 0,
                expires_at: now,
            });
        if bucket.expires_at <= now {
            bucket.count = 0;
        }
        bucket.count = bucket.count.saturating_sub(1);
        bucket.expires_at = now + self.config.key_ttl;
        Ok(())
    }
}

//! Redis-backed rate limiter
//!
//! Both operations run as Lua scripts so the read-modify-write on a bucket
//! is atomic across every process sharing the Redis instance.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, instrument, trace};

use super::{AdmissionToken, RateLimitConfig, RateLimitError, RateLimiter};

/// KEYS[1] bucket key, ARGV[1] limit, ARGV[2] ttl in ms.
/// Returns the bucket key when admitted, "" when the bucket is full.
/// Only admissions refresh the TTL, so a full bucket still expires.
const GET_TOKEN_SCRIPT: &str = r#"
local key = KEYS[1]
local max = tonumber(ARGV[1])
local count = redis.call("INCR", key)
if count > max then
    redis.call("DECR", key)
    if count == 1 then
        redis.call("PEXPIRE", key, tonumber(ARGV[2]))
    end
    return ""
end
redis.call("PEXPIRE", key, tonumber(ARGV[2]))
return key
"#;

/// KEYS[1] bucket key, ARGV[1] ttl in ms. Returns the count after release.
const RETURN_TOKEN_SCRIPT: &str = r#"
local key = KEYS[1]
local count = tonumber(redis.call("GET", key) or "0")
if count > 0 then
    count = redis.call("DECR", key)
else
    redis.call("SET", key, 0)
    count = 0
end
redis.call("PEXPIRE", key, tonumber(ARGV[1]))
return count
"#;

/// Rate limiter sharing its counters through Redis
///
/// # Example
///
/// ```ignore
/// use sfn_poller::limiter::{RateLimitConfig, RedisRateLimiter};
///
/// let config = RateLimitConfig::new().with_limit(activity_arn, 5);
/// let limiter = RedisRateLimiter::connect("redis://127.0.0.1:6379", config).await?;
/// ```
pub struct RedisRateLimiter {
    conn: ConnectionManager,
    config: RateLimitConfig,
    get_script: Script,
    return_script: Script,
}

impl RedisRateLimiter {
    /// Create a limiter over an existing managed connection
    pub fn new(conn: ConnectionManager, config: RateLimitConfig) -> Self {
        Self {
            conn,
            config,
            get_script: Script::new(GET_TOKEN_SCRIPT),
            return_script: Script::new(RETURN_TOKEN_SCRIPT),
        }
    }

    /// Connect to Redis at `url`
    pub async fn connect(url: &str, config: RateLimitConfig) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        debug!("Connected rate limiter to redis");
        Ok(Self::new(conn, config))
    }

    /// The limiter configuration
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn ttl_millis(&self) -> u64 {
        // PEXPIRE rejects 0
        self.config
            .key_ttl
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX)
            .max(1)
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    #[instrument(skip(self))]
    async fn get_token(&self, identity: &str) -> Result<Option<AdmissionToken>, RateLimitError> {
        let limit = self.config.limit_for(identity)?;
        let key = self.config.bucket_key(identity, Utc::now());
        let mut conn = self.conn.clone();

        let admitted: String = self
            .get_script
            .key(&key)
            .arg(limit)
            .arg(self.ttl_millis())
            .invoke_async(&mut conn)
            .await?;

        if admitted.is_empty() {
            trace!(%key, limit, "Bucket full");
            Ok(None)
        } else {
            Ok(Some(AdmissionToken::new(admitted)))
        }
    }

    #[instrument(skip(self, token), fields(key = %token))]
    async fn return_token(&self, token: &AdmissionToken) -> Result<(), RateLimitError> {
        let mut conn = self.conn.clone();
        let remaining: i64 = self
            .return_script
            .key(token.bucket_key())
            .arg(self.ttl_millis())
            .invoke_async(&mut conn)
            .await?;
        trace!(remaining, "Returned token");
        Ok(())
    }
}

//! Process-level poller configuration

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PollerError;
use crate::limiter::{RateLimitConfig, RateLimiter, RedisRateLimiter};
use crate::task::TaskConfig;

/// Configuration for a poller process, usually loaded from the environment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    /// Worker name reported with every long poll
    pub worker_name: String,

    /// Activities to poll, one task per ARN
    pub activity_arns: Vec<String>,

    /// Per-task settings shared by every registered task
    pub task: TaskConfig,

    /// Redis URL; enables the shared rate limiter when set
    pub redis_url: Option<String>,

    /// Rate limiter settings, used only with `redis_url`
    pub rate_limit: RateLimitConfig,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            worker_name: format!("worker-{}", Uuid::now_v7()),
            activity_arns: vec![],
            task: TaskConfig::default(),
            redis_url: None,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl PollerConfig {
    /// Create configuration from environment variables
    ///
    /// - `POLLER_WORKER_NAME`
    /// - `POLLER_ACTIVITY_ARNS` (comma separated)
    /// - `POLLER_HEARTBEAT_INTERVAL_MS`
    /// - `POLLER_RATE_LIMIT_BACKOFF_MS`
    /// - `POLLER_REDIS_URL`
    /// - `POLLER_RATE_LIMITS` (`arn=limit,arn=limit`)
    /// - `POLLER_RATE_LIMIT_DEFAULT`
    /// - `POLLER_RATE_LIMIT_TTL_SECS`
    ///
    /// Unparsable numbers fall back to their defaults, as do zero durations.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse_u64 = |name: &str| lookup(name).and_then(|s| s.trim().parse::<u64>().ok());
        let parse_nonzero = |name: &str| parse_u64(name).filter(|n| *n > 0);
        let defaults = Self::default();

        let worker_name = lookup("POLLER_WORKER_NAME")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.worker_name);

        let activity_arns = lookup("POLLER_ACTIVITY_ARNS")
            .map(|s| split_list(&s))
            .unwrap_or_default();

        let mut task = defaults.task;
        if let Some(ms) = parse_nonzero("POLLER_HEARTBEAT_INTERVAL_MS") {
            task = task.with_heartbeat_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_u64("POLLER_RATE_LIMIT_BACKOFF_MS") {
            task = task.with_rate_limit_backoff(Duration::from_millis(ms));
        }

        let mut rate_limit = defaults.rate_limit;
        if let Some(limits) = lookup("POLLER_RATE_LIMITS") {
            for entry in split_list(&limits) {
                if let Some((arn, limit)) = entry.rsplit_once('=') {
                    if let Ok(limit) = limit.trim().parse() {
                        rate_limit = rate_limit.with_limit(arn.trim(), limit);
                    }
                }
            }
        }
        if let Some(limit) = parse_u64("POLLER_RATE_LIMIT_DEFAULT") {
            rate_limit = rate_limit.with_default_limit(limit.try_into().unwrap_or(u32::MAX));
        }
        if let Some(secs) = parse_nonzero("POLLER_RATE_LIMIT_TTL_SECS") {
            rate_limit = rate_limit.with_key_ttl(Duration::from_secs(secs));
        }

        Self {
            worker_name,
            activity_arns,
            task,
            redis_url: lookup("POLLER_REDIS_URL").filter(|s| !s.trim().is_empty()),
            rate_limit,
        }
    }

    /// Check that the configuration can drive a poller
    pub fn validate(&self) -> Result<(), PollerError> {
        if self.worker_name.trim().is_empty() {
            return Err(PollerError::InvalidConfig("worker name is empty".into()));
        }
        if self.activity_arns.is_empty() {
            return Err(PollerError::InvalidConfig(
                "no activity ARNs configured (POLLER_ACTIVITY_ARNS)".into(),
            ));
        }
        if self.task.heartbeat_interval.is_zero() {
            return Err(PollerError::InvalidConfig(
                "heartbeat interval must be greater than zero".into(),
            ));
        }
        if self.redis_url.is_some() {
            if self.rate_limit.key_ttl.is_zero() {
                return Err(PollerError::InvalidConfig(
                    "rate limit key TTL must be greater than zero".into(),
                ));
            }
            if let Some(arn) = self
                .activity_arns
                .iter()
                .find(|arn| self.rate_limit.limit_for(arn).is_err())
            {
                return Err(PollerError::InvalidConfig(format!(
                    "no rate limit for {} and no default limit set",
                    arn
                )));
            }
        }
        Ok(())
    }

    /// Connect the shared rate limiter, if `redis_url` is set
    pub async fn rate_limiter(&self) -> Result<Option<Arc<dyn RateLimiter>>, PollerError> {
        let Some(url) = &self.redis_url else {
            return Ok(None);
        };
        let limiter = RedisRateLimiter::connect(url, self.rate_limit.clone()).await?;
        Ok(Some(Arc::new(limiter)))
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

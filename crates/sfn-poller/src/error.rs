//! Crate-level error type

use crate::limiter::RateLimitError;

/// Errors raised while assembling a poller
///
/// Nothing inside a running task loop surfaces as an error; these only come
/// from configuration and wiring.
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    /// Configuration rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Rate limiter could not be set up
    #[error("rate limiter error: {0}")]
    RateLimit(#[from] RateLimitError),
}

/// Result type for poller setup
pub type Result<T> = std::result::Result<T, PollerError>;

//! Poll/execute/report loop for one activity
//!
//! This module provides:
//! - [`Task`] - the per-activity state machine
//! - [`ActivityHandler`] and [`handler_fn`] - typed user logic
//! - [`keep_alive`] - heartbeat race around a running handler
//!
//! # Loop
//!
//! ```text
//!   ┌──────────────► stopped / cancelled? ── yes ──► Done
//!   │                       │ no
//!   │               rate limiter token ── none ──► sleep(backoff) ─┐
//!   │                       │ granted / limiter error (fail open)  │
//!   │               get_activity_task ── error / no token ──► return token
//!   │                       │ claimed
//!   │               decode input ── error ──► log, abandon claim
//!   │                       │
//!   │               keep_alive(handler) ── heartbeat error ──► abandon claim
//!   │                       │
//!   └──── send_task_success / send_task_failure ◄────────────────────┘
//! ```

mod handler;
mod keepalive;
mod runner;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_millis;

pub use handler::{handler_fn, ActivityHandler, HandlerError, HandlerFn, TaskContext};
pub use keepalive::{keep_alive, KeepAliveError};
pub use runner::Task;

/// Maximum length of the error and cause strings in a failure report
pub const MAX_ERROR_LENGTH: usize = 256;

const ELLIPSIS: &str = "...";

/// Per-task configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskConfig {
    /// Interval between heartbeats while a handler runs
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,

    /// Pause before retrying when the rate limiter has no capacity
    #[serde(with = "duration_millis")]
    pub rate_limit_backoff: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            rate_limit_backoff: Duration::from_millis(100),
        }
    }
}

impl TaskConfig {
    /// Create a new task configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the heartbeat interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the backoff used when no admission token is available
    pub fn with_rate_limit_backoff(mut self, backoff: Duration) -> Self {
        self.rate_limit_backoff = backoff;
        self
    }
}

/// Where a task's loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Constructed, not started
    Idle,
    /// Waiting on the rate limiter or the long poll
    Polling,
    /// Backing off because the rate limiter had no capacity
    RateLimited,
    /// Handler running, heartbeats in flight
    Executing,
    /// Sending the success or failure report
    Reporting,
    /// Stop requested; the loop exits at the next iteration boundary
    Draining,
    /// Loop exited
    Done,
}

/// Something that knows the ARN and name of an activity
pub trait ResourceInfo {
    /// Activity ARN to poll
    fn arn(&self) -> &str;

    /// Activity name, used as the worker name
    fn activity_name(&self) -> &str;
}

/// Truncate an error string for a failure report
///
/// Strings longer than [`MAX_ERROR_LENGTH`] characters keep their first 253
/// characters followed by `"..."`, giving exactly 256.
pub fn truncate_error(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_LENGTH {
        return message.to_string();
    }
    let keep = MAX_ERROR_LENGTH - ELLIPSIS.len();
    let mut truncated: String = message.chars().take(keep).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

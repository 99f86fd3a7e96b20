//! # Activity Poller
//!
//! Long-poll workers for Step Functions style activity task queues.
//!
//! ## Features
//!
//! - **Typed handlers**: task input and output are decoded and encoded as JSON
//! - **Heartbeats**: liveness reports are sent while a handler is running
//! - **Lifecycle barrier**: start, stop and wait on many activities at once
//! - **Shared admission control**: Redis-backed token buckets across processes, failing open
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ActivityPoller                          │
//! │  (registers tasks, begin_polling barrier, stop, done)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ one loop per activity
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Task<H>                              │
//! │  (rate limit -> long poll -> keep_alive(handler) -> report) │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                              │
//!                 ▼                              ▼
//! ┌──────────────────────────────┐ ┌────────────────────────────┐
//! │        ActivityService       │ │        RateLimiter         │
//! │ (claim, heartbeat, success,  │ │ (per-window token buckets, │
//! │  failure)                    │ │  Redis or in-memory)       │
//! └──────────────────────────────┘ └────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use sfn_poller::prelude::*;
//!
//! #[derive(Deserialize)]
//! struct Order { id: u64 }
//!
//! let service: Arc<dyn ActivityService> = Arc::new(my_client);
//! let task = Task::new(
//!     handler_fn(|_ctx: TaskContext, order: Order| async move {
//!         Ok::<_, HandlerError>(json!({ "shipped": order.id }))
//!     }),
//!     "arn:aws:states:eu-west-1:123456789012:activity:ship-order",
//!     "shipping-worker",
//!     TaskConfig::default(),
//!     service,
//! );
//!
//! let shutdown = CancellationToken::new();
//! let mut poller = ActivityPoller::new();
//! poller.register_task(task).begin_polling(&shutdown).await;
//!
//! tokio::signal::ctrl_c().await?;
//! poller.stop();
//! poller.done().wait().await;
//! ```

pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod limiter;
pub mod poller;
pub mod service;
pub mod signal;
pub mod task;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::PollerConfig;
    pub use crate::context::CancellableContext;
    pub use crate::error::PollerError;
    pub use crate::limiter::{
        AdmissionToken, InMemoryRateLimiter, RateLimitConfig, RateLimitError, RateLimiter,
        RedisRateLimiter, WindowGranularity,
    };
    pub use crate::poller::{ActivityPoller, PollableTask};
    pub use crate::service::{ActivityService, ActivityTask, InMemoryActivityService, ServiceError};
    pub use crate::signal::Signal;
    pub use crate::task::{
        handler_fn, ActivityHandler, HandlerError, ResourceInfo, Task, TaskConfig, TaskContext,
        TaskState,
    };
    pub use tokio_util::sync::CancellationToken;
}

// Re-export key types at crate root
pub use config::PollerConfig;
pub use context::CancellableContext;
pub use error::PollerError;
pub use limiter::{RateLimitConfig, RateLimiter};
pub use poller::{ActivityPoller, PollableTask};
pub use service::{ActivityService, ActivityTask, ServiceError};
pub use signal::Signal;
pub use task::{
    handler_fn, truncate_error, ActivityHandler, HandlerError, ResourceInfo, Task, TaskConfig,
    TaskContext, TaskState,
};

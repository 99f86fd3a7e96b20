//! Lifecycle barrier across registered tasks
//!
//! [`ActivityPoller`] starts every registered task against one shared
//! [`CancellableContext`], waits until each loop has begun, and exposes a
//! single [`Signal`] that fires once every loop has exited.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::CancellableContext;
use crate::signal::Signal;

/// Something the poller can start, stop and wait on
pub trait PollableTask: Send + Sync {
    /// Spawn the task's loop under `ctx`
    fn start(&self, ctx: &CancellableContext);

    /// Ask the loop to exit at its next iteration boundary
    fn stop(&self);

    /// Fires once the loop has begun
    fn started(&self) -> Signal;

    /// Fires once the loop has exited
    fn done(&self) -> Signal;
}

impl<T: PollableTask + ?Sized> PollableTask for Arc<T> {
    fn start(&self, ctx: &CancellableContext) {
        (**self).start(ctx)
    }

    fn stop(&self) {
        (**self).stop()
    }

    fn started(&self) -> Signal {
        (**self).started()
    }

    fn done(&self) -> Signal {
        (**self).done()
    }
}

/// Orchestrates a set of polling tasks
///
/// # Example
///
/// ```ignore
/// let mut poller = ActivityPoller::new();
/// poller
///     .register_task(orders_task)
///     .register_task(refunds_task)
///     .begin_polling(&shutdown)
///     .await;
///
/// tokio::signal::ctrl_c().await?;
/// poller.stop();
/// poller.done().wait().await;
/// ```
#[derive(Default)]
pub struct ActivityPoller {
    tasks: Vec<Box<dyn PollableTask>>,
    ctx: Option<CancellableContext>,
}

impl ActivityPoller {
    /// Create a poller with no tasks
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task
    ///
    /// Ignored with a warning once polling has begun.
    pub fn register_task<T: PollableTask + 'static>(&mut self, task: T) -> &mut Self {
        if self.ctx.is_some() {
            warn!("Polling already started, task not registered");
            return self;
        }
        self.tasks.push(Box::new(task));
        self
    }

    /// Start every task and wait until each has begun its loop
    ///
    /// Tasks are started in registration order and run under a context
    /// derived from `parent`. A second call does nothing.
    pub async fn begin_polling(&mut self, parent: &CancellationToken) -> &mut Self {
        if self.ctx.is_some() {
            warn!("Polling already started");
            return self;
        }

        info!(tasks = self.tasks.len(), "Starting tasks");
        // Set before the barrier, which callers may abandon.
        let ctx = CancellableContext::new(parent);
        self.ctx = Some(ctx.clone());
        for task in &self.tasks {
            task.start(&ctx);
        }

        for (index, task) in self.tasks.iter().enumerate() {
            debug!(index, "Waiting for task to report that it has started");
            task.started().wait().await;
        }
        info!("All tasks have started");
        self
    }

    /// Ask every task to exit after its current iteration
    ///
    /// Does not wait; use [`done`](Self::done) for that.
    pub fn stop(&self) {
        info!("Stopping tasks");
        for task in &self.tasks {
            task.stop();
        }
    }

    /// Cancel the shared context
    ///
    /// Has no effect before [`begin_polling`](Self::begin_polling).
    pub fn cancel(&self) {
        if let Some(ctx) = &self.ctx {
            ctx.cancel();
        }
    }

    /// A signal that fires once every task's loop has exited
    ///
    /// Waiting happens on a spawned task, so this must be called inside a
    /// Tokio runtime.
    pub fn done(&self) -> Signal {
        let all_done = Signal::new();
        let signals: Vec<Signal> = self.tasks.iter().map(|task| task.done()).collect();

        let fire = all_done.clone();
        tokio::spawn(async move {
            for signal in signals {
                signal.wait().await;
            }
            info!("All tasks are done");
            fire.fire();
        });

        all_done
    }

    /// Number of registered tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task is registered
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl std::fmt::Debug for ActivityPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityPoller")
            .field("tasks", &self.tasks.len())
            .field("polling", &self.ctx.is_some())
            .finish()
    }
}

//! Task state machine

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, info_span, trace, warn, Instrument, Span};

use super::handler::{ActivityHandler, TaskContext};
use super::keepalive::{keep_alive, KeepAliveError};
use super::{truncate_error, ResourceInfo, TaskConfig, TaskState};
use crate::codec;
use crate::context::CancellableContext;
use crate::limiter::{AdmissionToken, RateLimiter};
use crate::poller::PollableTask;
use crate::service::{ActivityService, ActivityTask};
use crate::signal::Signal;

/// Error code reported when a handler panics
const HANDLER_PANIC: &str = "HandlerPanic";

/// Floor for heartbeat intervals that bypassed the builder
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

/// Lifecycle state shared between a [`Task`] and its loop
struct Shared {
    stopped: AtomicBool,
    launched: AtomicBool,
    started: Signal,
    done: Signal,
    state: Mutex<TaskState>,
}

impl Shared {
    fn set_state(&self, state: TaskState) {
        *self.state.lock() = state;
    }
}

/// Result of asking the rate limiter for a slot
enum Admission {
    Granted(AdmissionToken),
    Exhausted,
    Unthrottled,
}

/// A poll/execute/report loop bound to one activity
///
/// Each task claims at most one unit of work at a time. The loop checks for
/// stop and cancellation once per iteration; calls in flight are never
/// interrupted.
///
/// # Example
///
/// ```ignore
/// let task = Task::new(
///     handler_fn(|_ctx, order: Order| async move { Ok::<_, HandlerError>(order.id) }),
///     "arn:aws:states:eu-west-1:123456789012:activity:orders",
///     "orders-worker",
///     TaskConfig::default(),
///     service.clone(),
/// )
/// .with_rate_limiter(limiter);
/// ```
pub struct Task<H> {
    handler: Arc<H>,
    activity_arn: String,
    worker_name: String,
    config: TaskConfig,
    service: Arc<dyn ActivityService>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    span: Span,
    shared: Arc<Shared>,
}

impl<H: ActivityHandler> Task<H> {
    /// Create a task polling `activity_arn` as `worker_name`
    pub fn new(
        handler: H,
        activity_arn: impl Into<String>,
        worker_name: impl Into<String>,
        config: TaskConfig,
        service: Arc<dyn ActivityService>,
    ) -> Self {
        let activity_arn = activity_arn.into();
        let worker_name = worker_name.into();
        let span = info_span!(
            "activity_task",
            activity_arn = %activity_arn,
            worker_name = %worker_name
        );

        Self {
            handler: Arc::new(handler),
            activity_arn,
            worker_name,
            config,
            service,
            rate_limiter: None,
            span,
            shared: Arc::new(Shared {
                stopped: AtomicBool::new(false),
                launched: AtomicBool::new(false),
                started: Signal::new(),
                done: Signal::new(),
                state: Mutex::new(TaskState::Idle),
            }),
        }
    }

    /// Create a task from a resource; the activity name doubles as the worker name
    pub fn from_resource(
        handler: H,
        resource: &impl ResourceInfo,
        config: TaskConfig,
        service: Arc<dyn ActivityService>,
    ) -> Self {
        Self::new(
            handler,
            resource.arn(),
            resource.activity_name(),
            config,
            service,
        )
    }

    /// Gate every long poll on a token from `limiter`
    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Replace the span the loop runs in
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Activity this task polls
    pub fn activity_arn(&self) -> &str {
        &self.activity_arn
    }

    /// Worker name sent with every long poll
    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    /// Spawn the polling loop
    ///
    /// Only the first call has an effect.
    pub fn start(&self, ctx: &CancellableContext) {
        if self.shared.launched.swap(true, Ordering::SeqCst) {
            self.span.in_scope(|| warn!("Task already started, ignoring start"));
            return;
        }

        let runner = Runner {
            handler: self.handler.clone(),
            activity_arn: self.activity_arn.clone(),
            worker_name: self.worker_name.clone(),
            config: self.config.clone(),
            service: self.service.clone(),
            rate_limiter: self.rate_limiter.clone(),
            shared: self.shared.clone(),
        };
        tokio::spawn(runner.run(ctx.clone()).instrument(self.span.clone()));
    }

    /// Ask the loop to exit at the next iteration boundary
    ///
    /// Work already claimed is finished and reported first.
    pub fn stop(&self) {
        self.span.in_scope(|| info!("Stop called"));
        self.shared.stopped.store(true, Ordering::SeqCst);
    }

    /// Fires once the loop has begun
    pub fn started(&self) -> Signal {
        self.shared.started.clone()
    }

    /// Fires once the loop has exited
    pub fn done(&self) -> Signal {
        self.shared.done.clone()
    }

    /// Current loop state
    pub fn state(&self) -> TaskState {
        let state = *self.shared.state.lock();
        match state {
            TaskState::Idle | TaskState::Done => state,
            _ if self.shared.stopped.load(Ordering::SeqCst) => TaskState::Draining,
            _ => state,
        }
    }
}

impl<H: ActivityHandler> PollableTask for Task<H> {
    fn start(&self, ctx: &CancellableContext) {
        Task::start(self, ctx)
    }

    fn stop(&self) {
        Task::stop(self)
    }

    fn started(&self) -> Signal {
        Task::started(self)
    }

    fn done(&self) -> Signal {
        Task::done(self)
    }
}

impl<H> std::fmt::Debug for Task<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("activity_arn", &self.activity_arn)
            .field("worker_name", &self.worker_name)
            .field("config", &self.config)
            .field("rate_limited", &self.rate_limiter.is_some())
            .finish()
    }
}

/// The owned half of a task, moved into the spawned loop
struct Runner<H> {
    handler: Arc<H>,
    activity_arn: String,
    worker_name: String,
    config: TaskConfig,
    service: Arc<dyn ActivityService>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    shared: Arc<Shared>,
}

impl<H: ActivityHandler> Runner<H> {
    async fn run(self, ctx: CancellableContext) {
        self.shared.set_state(TaskState::Polling);
        self.shared.started.fire();
        info!("Task started");

        loop {
            // Let sibling tasks run when polls return immediately.
            tokio::task::yield_now().await;

            if ctx.is_cancelled() || self.shared.stopped.load(Ordering::SeqCst) {
                break;
            }
            self.shared.set_state(TaskState::Polling);

            let admission = match self.admit().await {
                Admission::Exhausted => {
                    self.shared.set_state(TaskState::RateLimited);
                    debug!("No admission token available, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.rate_limit_backoff) => {}
                        _ = ctx.cancelled() => {}
                    }
                    continue;
                }
                Admission::Granted(token) => Some(token),
                Admission::Unthrottled => None,
            };

            let claimed = match self
                .service
                .get_activity_task(&self.activity_arn, &self.worker_name)
                .await
            {
                Ok(claimed) => claimed,
                Err(e) => {
                    warn!(error = %e, "Error getting activity task");
                    self.release(admission).await;
                    continue;
                }
            };

            let ActivityTask {
                task_token: Some(task_token),
                input,
            } = claimed
            else {
                trace!("No work available");
                self.release(admission).await;
                continue;
            };

            self.process(&ctx, task_token, input).await;
        }

        self.shared.set_state(TaskState::Done);
        self.shared.done.fire();
        info!("Task execution done");
    }

    async fn admit(&self) -> Admission {
        let Some(limiter) = &self.rate_limiter else {
            return Admission::Unthrottled;
        };

        match limiter.get_token(&self.activity_arn).await {
            Ok(Some(token)) => Admission::Granted(token),
            Ok(None) => Admission::Exhausted,
            Err(e) => {
                warn!(error = %e, "Rate limiter unavailable, polling unthrottled");
                Admission::Unthrottled
            }
        }
    }

    /// Best-effort return of an unused admission token
    async fn release(&self, token: Option<AdmissionToken>) {
        let (Some(limiter), Some(token)) = (&self.rate_limiter, token) else {
            return;
        };
        if let Err(e) = limiter.return_token(&token).await {
            warn!(error = %e, bucket = %token, "Error returning admission token");
        }
    }

    async fn process(&self, ctx: &CancellableContext, task_token: String, input: Option<String>) {
        let claim_ctx = ctx.child();
        let task_ctx = TaskContext::new(
            task_token.clone(),
            self.activity_arn.clone(),
            self.worker_name.clone(),
            claim_ctx.clone(),
        );
        let span = info_span!(
            "claim",
            task_token = %task_token,
            execution_id = %task_ctx.execution_id()
        );

        async move {
            info!("Starting work on task token");

            let payload = input.as_deref().unwrap_or("null");
            let input: H::Input = match codec::unmarshal(payload) {
                Ok(input) => input,
                Err(e) => {
                    error!(error = %e, "Failed to decode task input, abandoning task");
                    return;
                }
            };

            self.shared.set_state(TaskState::Executing);
            let handler = self.handler.clone();
            let work = async move { handler.handle(task_ctx, input).await }.in_current_span();
            let outcome = keep_alive(
                self.service.as_ref(),
                &task_token,
                self.config.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL),
                work,
            )
            .await;

            match outcome {
                Ok(Ok(output)) => {
                    self.shared.set_state(TaskState::Reporting);
                    // Encode before awaiting; the output itself need not be Sync.
                    let encoded = codec::marshal(&output);
                    drop(output);
                    match encoded {
                        Ok(payload) => self.report_success(&task_token, &payload).await,
                        Err(e) => error!(error = %e, "Failed to encode handler output"),
                    }
                }
                Ok(Err(e)) => {
                    self.shared.set_state(TaskState::Reporting);
                    self.report_failure(&task_token, e.error(), e.cause()).await;
                }
                Err(KeepAliveError::HandlerPanicked(message)) => {
                    error!(error = %message, "Handler panicked");
                    self.shared.set_state(TaskState::Reporting);
                    self.report_failure(&task_token, HANDLER_PANIC, &message).await;
                }
                Err(e @ KeepAliveError::Heartbeat(_)) => {
                    claim_ctx.cancel();
                    error!(error = %e, "Error sending heartbeat, abandoning task");
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn report_success(&self, task_token: &str, payload: &str) {
        info!("Sending success notification");
        if let Err(e) = self.service.send_task_success(task_token, payload).await {
            error!(error = %e, "Error reporting success");
        }
    }

    async fn report_failure(&self, task_token: &str, error: &str, cause: &str) {
        info!(error = %error, "Sending failure notification");
        let error = truncate_error(error);
        let cause = truncate_error(cause);
        if let Err(e) = self
            .service
            .send_task_failure(task_token, &error, &cause)
            .await
        {
            error!(error = %e, "Error reporting failure");
        }
    }
}

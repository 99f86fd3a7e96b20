//! In-memory implementation of ActivityService for testing

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Notify;
use uuid::Uuid;

use super::client::{ActivityService, ActivityTask, ServiceError};

/// Service call kinds, used for fault injection and the call log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetActivityTask,
    SendTaskHeartbeat,
    SendTaskSuccess,
    SendTaskFailure,
}

/// A failure report as received by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedFailure {
    pub error: String,
    pub cause: String,
}

struct PendingTask {
    task_token: String,
    input: String,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, VecDeque<PendingTask>>,
    open_tokens: HashSet<String>,
    claimed_by: HashMap<String, String>,
    heartbeats: HashMap<String, usize>,
    successes: HashMap<String, String>,
    failures: HashMap<String, ReportedFailure>,
    faults: HashMap<Operation, ServiceError>,
    calls: VecDeque<(Operation, Option<String>)>,
}

/// In-memory activity task queue
///
/// Keeps one FIFO queue per activity ARN. `get_activity_task` blocks for up
/// to `long_poll_timeout` waiting for work, then returns an empty response,
/// mirroring the long poll of the real service. Calls are recorded so tests
/// can assert on the exact sequence of reports; the log keeps the most recent
/// `call_log_limit` entries (10 000 by default).
///
/// Meant for tests and short local runs: claimed tokens and reports are
/// kept for inspection and never evicted.
///
/// # Example
///
/// ```
/// use sfn_poller::service::InMemoryActivityService;
///
/// let service = InMemoryActivityService::new();
/// let token = service.enqueue("arn:activity:orders", r#"{"id": 1}"#);
/// assert_eq!(service.pending_count("arn:activity:orders"), 1);
/// assert!(!token.is_empty());
/// ```
pub struct InMemoryActivityService {
    state: RwLock<State>,
    work_available: Notify,
    long_poll_timeout: Duration,
    call_log_limit: usize,
    poll_count: AtomicUsize,
}

const DEFAULT_CALL_LOG_LIMIT: usize = 10_000;

impl InMemoryActivityService {
    /// Create a new in-memory service with a 1s long poll
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            work_available: Notify::new(),
            long_poll_timeout: Duration::from_secs(1),
            call_log_limit: DEFAULT_CALL_LOG_LIMIT,
            poll_count: AtomicUsize::new(0),
        }
    }

    /// Set how long `get_activity_task` waits before returning "no work"
    pub fn with_long_poll_timeout(mut self, timeout: Duration) -> Self {
        self.long_poll_timeout = timeout;
        self
    }

    /// Keep at most `limit` entries in the call log, dropping the oldest
    ///
    /// A limit of 0 disables the log.
    pub fn with_call_log_limit(mut self, limit: usize) -> Self {
        self.call_log_limit = limit;
        self
    }

    /// Add a task to the queue for `activity_arn`, returning its task token
    pub fn enqueue(&self, activity_arn: &str, input: impl Into<String>) -> String {
        let task_token = format!("token-{}", Uuid::now_v7());
        self.state
            .write()
            .queues
            .entry(activity_arn.to_string())
            .or_default()
            .push_back(PendingTask {
                task_token: task_token.clone(),
                input: input.into(),
            });
        self.work_available.notify_waiters();
        task_token
    }

    /// Make every future call of `operation` fail with `error`
    pub fn fail_operation(&self, operation: Operation, error: ServiceError) {
        self.state.write().faults.insert(operation, error);
    }

    /// Remove an injected fault
    pub fn clear_fault(&self, operation: Operation) {
        self.state.write().faults.remove(&operation);
    }

    /// Number of tasks waiting to be claimed on `activity_arn`
    pub fn pending_count(&self, activity_arn: &str) -> usize {
        self.state
            .read()
            .queues
            .get(activity_arn)
            .map_or(0, VecDeque::len)
    }

    /// Number of `get_activity_task` calls made so far
    pub fn poll_count(&self) -> usize {
        self.poll_count.load(Ordering::SeqCst)
    }

    /// Heartbeats received for `task_token`
    pub fn heartbeat_count(&self, task_token: &str) -> usize {
        self.state
            .read()
            .heartbeats
            .get(task_token)
            .copied()
            .unwrap_or(0)
    }

    /// Output reported through `send_task_success`, if any
    pub fn success_output(&self, task_token: &str) -> Option<String> {
        self.state.read().successes.get(task_token).cloned()
    }

    /// Failure reported through `send_task_failure`, if any
    pub fn failure(&self, task_token: &str) -> Option<ReportedFailure> {
        self.state.read().failures.get(task_token).cloned()
    }

    /// Worker name that claimed `task_token`
    pub fn claimed_by(&self, task_token: &str) -> Option<String> {
        self.state.read().claimed_by.get(task_token).cloned()
    }

    /// Whether `task_token` has been claimed but not closed
    pub fn is_open(&self, task_token: &str) -> bool {
        self.state.read().open_tokens.contains(task_token)
    }

    /// Calls that reference `task_token`, in the order they were made
    pub fn calls_for(&self, task_token: &str) -> Vec<Operation> {
        self.state
            .read()
            .calls
            .iter()
            .filter(|(_, token)| token.as_deref() == Some(task_token))
            .map(|(op, _)| *op)
            .collect()
    }

    /// Total number of success and failure reports received
    pub fn report_count(&self) -> usize {
        let state = self.state.read();
        state.successes.len() + state.failures.len()
    }

    /// Record the call and return the injected fault for it, if any
    fn record(&self, operation: Operation, task_token: Option<&str>) -> Result<(), ServiceError> {
        let mut state = self.state.write();
        if self.call_log_limit > 0 {
            while state.calls.len() >= self.call_log_limit {
                state.calls.pop_front();
            }
            state
                .calls
                .push_back((operation, task_token.map(str::to_string)));
        }
        match state.faults.get(&operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn try_claim(&self, activity_arn: &str, worker_name: &str) -> Option<ActivityTask> {
        let mut state = self.state.write();
        let pending = state.queues.get_mut(activity_arn)?.pop_front()?;
        state.open_tokens.insert(pending.task_token.clone());
        state
            .claimed_by
            .insert(pending.task_token.clone(), worker_name.to_string());
        Some(ActivityTask::new(pending.task_token, pending.input))
    }

    fn close(&self, task_token: &str) -> Result<(), ServiceError> {
        if self.state.write().open_tokens.remove(task_token) {
            Ok(())
        } else {
            Err(ServiceError::InvalidToken(task_token.to_string()))
        }
    }
}

impl Default for InMemoryActivityService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActivityService for InMemoryActivityService {
    async fn get_activity_task(
        &self,
        activity_arn: &str,
        worker_name: &str,
    ) -> Result<ActivityTask, ServiceError> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        self.record(Operation::GetActivityTask, None)?;

        let deadline = tokio::time::Instant::now() + self.long_poll_timeout;
        loop {
            // Register interest before checking the queue so an enqueue in
            // between is not missed.
            let notified = self.work_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(task) = self.try_claim(activity_arn, worker_name) {
                return Ok(task);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(ActivityTask::empty());
            }
        }
    }

    async fn send_task_heartbeat(&self, task_token: &str) -> Result<(), ServiceError> {
        self.record(Operation::SendTaskHeartbeat, Some(task_token))?;

        let mut state = self.state.write();
        if !state.open_tokens.contains(task_token) {
            return Err(ServiceError::InvalidToken(task_token.to_string()));
        }
        *state.heartbeats.entry(task_token.to_string()).or_default() += 1;
        Ok(())
    }

    async fn send_task_success(&self, task_token: &str, output: &str) -> Result<(), ServiceError> {
        self.record(Operation::SendTaskSuccess, Some(task_token))?;
        self.close(task_token)?;
        self.state
            .write()
            .successes
            .insert(task_token.to_string(), output.to_string());
        Ok(())
    }

    async fn send_task_failure(
        &self,
        task_token: &str,
        error: &str,
        cause: &str,
    ) -> Result<(), ServiceError> {
        self.record(Operation::SendTaskFailure, Some(task_token))?;
        self.close(task_token)?;
        self.state.write().failures.insert(
            task_token.to_string(),
            ReportedFailure {
                error: error.to_string(),
                cause: cause.to_string(),
            },
        );
        Ok(())
    }
}

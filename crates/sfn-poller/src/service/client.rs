//! ActivityService trait definition

use async_trait::async_trait;

/// Error type for activity service calls
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    /// Transport or network failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The service rejected the task token (unknown, expired or already closed)
    #[error("invalid task token: {0}")]
    InvalidToken(String),

    /// The service is throttling this caller
    #[error("throttled: {0}")]
    Throttled(String),

    /// Any other service-side error
    #[error("service error: {0}")]
    Service(String),
}

/// Response from a long poll
///
/// A response with no `task_token` is the legitimate "no work available" reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityTask {
    /// Token identifying the claimed unit of work
    pub task_token: Option<String>,

    /// Opaque (JSON) input payload
    pub input: Option<String>,
}

impl ActivityTask {
    /// A claimed task
    pub fn new(task_token: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            task_token: Some(task_token.into()),
            input: Some(input.into()),
        }
    }

    /// The "no work available" response
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Client for a pull-based activity task queue
///
/// Modeled on the Step Functions activity API: long-poll for a task, send
/// heartbeats while working on it, then close it with success or failure.
/// Retries and backoff inside a call are the implementation's concern.
#[async_trait]
pub trait ActivityService: Send + Sync + 'static {
    /// Long-poll for the next task on `activity_arn`
    async fn get_activity_task(
        &self,
        activity_arn: &str,
        worker_name: &str,
    ) -> Result<ActivityTask, ServiceError>;

    /// Report that work on `task_token` is still in progress
    async fn send_task_heartbeat(&self, task_token: &str) -> Result<(), ServiceError>;

    /// Close `task_token` successfully with an encoded output payload
    async fn send_task_success(&self, task_token: &str, output: &str) -> Result<(), ServiceError>;

    /// Close `task_token` as failed
    async fn send_task_failure(
        &self,
        task_token: &str,
        error: &str,
        cause: &str,
    ) -> Result<(), ServiceError>;
}

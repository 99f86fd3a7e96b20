//! Typed activity handlers

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::context::CancellableContext;

/// Error returned by a handler
///
/// Becomes a failure report: `error` carries the code (or the message when no
/// code is set) and `cause` carries the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    /// Human readable message
    pub message: String,

    /// Machine readable error code
    pub error_code: Option<String>,
}

impl HandlerError {
    /// Create an error with a message and no code
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_code: None,
        }
    }

    /// Set the error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    /// Value for the `error` field of a failure report
    pub fn error(&self) -> &str {
        self.error_code.as_deref().unwrap_or(&self.message)
    }

    /// Value for the `cause` field of a failure report
    pub fn cause(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_code {
            Some(code) => write!(f, "{}: {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{:#}", err))
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Context handed to a handler for one claimed task
#[derive(Debug, Clone)]
pub struct TaskContext {
    execution_id: Uuid,
    task_token: String,
    activity_arn: String,
    worker_name: String,
    cancellation: CancellableContext,
}

impl TaskContext {
    /// Create a context for a claimed task
    pub fn new(
        task_token: impl Into<String>,
        activity_arn: impl Into<String>,
        worker_name: impl Into<String>,
        cancellation: CancellableContext,
    ) -> Self {
        Self {
            execution_id: Uuid::now_v7(),
            task_token: task_token.into(),
            activity_arn: activity_arn.into(),
            worker_name: worker_name.into(),
            cancellation,
        }
    }

    /// Unique id for this execution, also recorded on its tracing span
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Task token of the claim being processed
    pub fn task_token(&self) -> &str {
        &self.task_token
    }

    /// Activity the task was claimed from
    pub fn activity_arn(&self) -> &str {
        &self.activity_arn
    }

    /// Worker name used for the claim
    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    /// Whether the poller was cancelled or heartbeating for this claim failed
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves when [`is_cancelled`](Self::is_cancelled) becomes true
    ///
    /// ```ignore
    /// tokio::select! {
    ///     result = do_work() => result,
    ///     _ = ctx.cancelled() => Err(HandlerError::new("cancelled")),
    /// }
    /// ```
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }
}

/// User logic for one activity
///
/// Input is decoded from the task payload and output is encoded into the
/// success report, both as JSON.
///
/// # Example
///
/// ```ignore
/// struct ChargeCard;
///
/// #[async_trait]
/// impl ActivityHandler for ChargeCard {
///     type Input = ChargeRequest;
///     type Output = ChargeReceipt;
///
///     async fn handle(
///         &self,
///         ctx: TaskContext,
///         input: Self::Input,
///     ) -> Result<Self::Output, HandlerError> {
///         let receipt = gateway.charge(&input).await?;
///         Ok(receipt)
///     }
/// }
/// ```
#[async_trait]
pub trait ActivityHandler: Send + Sync + 'static {
    /// Decoded task input
    type Input: DeserializeOwned + Send + 'static;

    /// Result encoded into the success report
    type Output: Serialize + Send + 'static;

    /// Process one claimed task
    async fn handle(
        &self,
        ctx: TaskContext,
        input: Self::Input,
    ) -> Result<Self::Output, HandlerError>;
}

/// [`ActivityHandler`] backed by an async closure, see [`handler_fn`]
pub struct HandlerFn<F, I, O, Fut> {
    f: F,
    _marker: PhantomData<fn(I) -> (O, Fut)>,
}

/// Build a handler from an async closure
///
/// ```ignore
/// let handler = handler_fn(|_ctx: TaskContext, order: Order| async move {
///     Ok::<_, HandlerError>(json!({ "shipped": order.id }))
/// });
/// ```
pub fn handler_fn<F, I, O, Fut>(f: F) -> HandlerFn<F, I, O, Fut>
where
    F: Fn(TaskContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, HandlerError>> + Send + 'static,
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
{
    HandlerFn {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, I, O, Fut> ActivityHandler for HandlerFn<F, I, O, Fut>
where
    F: Fn(TaskContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, HandlerError>> + Send + 'static,
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
{
    type Input = I;
    type Output = O;

    async fn handle(&self, ctx: TaskContext, input: I) -> Result<O, HandlerError> {
        (self.f)(ctx, input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    fn context() -> TaskContext {
        TaskContext::new("token-1", "arn:x", "worker", CancellableContext::background())
    }

    #[test]
    fn test_error_without_code_uses_message_twice() {
        let err = HandlerError::new("card declined");
        assert_eq!(err.error(), "card declined");
        assert_eq!(err.cause(), "card declined");
        assert_eq!(err.to_string(), "card declined");
    }

    #[test]
    fn test_error_with_code() {
        let err = HandlerError::new("card declined").with_code("PaymentDeclined");
        assert_eq!(err.error(), "PaymentDeclined");
        assert_eq!(err.cause(), "card declined");
        assert_eq!(err.to_string(), "PaymentDeclined: card declined");
    }

    #[test]
    fn test_from_anyhow_keeps_context_chain() {
        let err: anyhow::Result<()> = Err(anyhow::anyhow!("connection reset"));
        let err = err.context("calling gateway").unwrap_err();
        let handler_err = HandlerError::from(err);
        assert_eq!(handler_err.message, "calling gateway: connection reset");
    }

    #[tokio::test]
    async fn test_handler_fn() {
        let handler = handler_fn(|ctx: TaskContext, n: u32| async move {
            if n == 0 {
                return Err(HandlerError::new("zero"));
            }
            Ok(format!("{}:{}", ctx.task_token(), n * 2))
        });

        assert_eq!(handler.handle(context(), 21).await.unwrap(), "token-1:42");
        assert_eq!(
            handler.handle(context(), 0).await.unwrap_err(),
            HandlerError::new("zero")
        );
    }

    #[test]
    fn test_context_accessors() {
        let cancellation = CancellableContext::background();
        let ctx = TaskContext::new("token-1", "arn:x", "worker", cancellation.clone());
        assert_eq!(ctx.task_token(), "token-1");
        assert_eq!(ctx.activity_arn(), "arn:x");
        assert_eq!(ctx.worker_name(), "worker");
        assert_ne!(ctx.execution_id(), context().execution_id());

        assert!(!ctx.is_cancelled());
        cancellation.cancel();
        assert!(ctx.is_cancelled());
    }
}

//! Echo activity used by the local worker

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sfn_poller::prelude::*;

/// Returns its input along with who processed it
///
/// An input object with a numeric `sleep_ms` field holds the task for that
/// long first, which is enough to see heartbeats in the log. An input with
/// an `error` string fails with that message.
pub struct EchoHandler;

#[async_trait]
impl ActivityHandler for EchoHandler {
    type Input = Value;
    type Output = Value;

    async fn handle(&self, ctx: TaskContext, input: Value) -> Result<Value, HandlerError> {
        if let Some(ms) = input.get("sleep_ms").and_then(Value::as_u64) {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                _ = ctx.cancelled() => {
                    return Err(HandlerError::new("cancelled while sleeping").with_code("Cancelled"));
                }
            }
        }

        if let Some(message) = input.get("error").and_then(Value::as_str) {
            return Err(HandlerError::new(message).with_code("EchoError"));
        }

        Ok(json!({
            "echo": input,
            "execution_id": ctx.execution_id().to_string(),
            "worker_name": ctx.worker_name(),
        }))
    }
}

/// Enqueue `POLLER_SEED_TASKS` demo tasks on every activity
pub fn seed_from_env(service: &InMemoryActivityService, activity_arns: &[String]) -> usize {
    let count = std::env::var("POLLER_SEED_TASKS")
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .unwrap_or(0);

    for arn in activity_arns {
        for seq in 0..count {
            service.enqueue(arn, json!({ "seq": seq, "sleep_ms": 250 }).to_string());
        }
    }
    count * activity_arns.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> TaskContext {
        TaskContext::new("token-1", "arn:x", "local", CancellableContext::background())
    }

    #[tokio::test]
    async fn test_echoes_input() {
        let output = EchoHandler
            .handle(context(), json!({"seq": 3}))
            .await
            .unwrap();
        assert_eq!(output["echo"], json!({"seq": 3}));
        assert_eq!(output["worker_name"], "local");
    }

    #[tokio::test]
    async fn test_error_field_fails() {
        let err = EchoHandler
            .handle(context(), json!({"error": "boom"}))
            .await
            .unwrap_err();
        assert_eq!(err.error(), "EchoError");
        assert_eq!(err.cause(), "boom");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_observes_cancellation() {
        let cancellation = CancellableContext::background();
        let ctx = TaskContext::new("token-1", "arn:x", "local", cancellation.clone());
        cancellation.cancel();

        let err = EchoHandler
            .handle(ctx, json!({"sleep_ms": 60_000}))
            .await
            .unwrap_err();
        assert_eq!(err.error(), "Cancelled");
    }
}

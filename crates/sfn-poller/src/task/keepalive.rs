//! Heartbeats around a running handler

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::service::{ActivityService, ServiceError};

/// Errors from [`keep_alive`]
#[derive(Debug, thiserror::Error)]
pub enum KeepAliveError {
    /// A heartbeat was rejected; the work keeps running detached and its result is dropped
    #[error("heartbeat failed: {0}")]
    Heartbeat(#[source] ServiceError),

    /// The work panicked or was aborted
    #[error("handler panicked: {0}")]
    HandlerPanicked(String),
}

/// Run `work` while sending a heartbeat for `task_token` every `interval`
///
/// The work is spawned onto the runtime and raced against a fresh timer on
/// every iteration. Completion wins ties. The first heartbeat error ends the
/// race; the work is not aborted, it is left to observe cancellation on its
/// own context.
///
/// A handler that takes `k * interval + r` (with `0 < r < interval`) sees
/// exactly `k` heartbeats.
pub async fn keep_alive<S, F>(
    service: &S,
    task_token: &str,
    interval: Duration,
    work: F,
) -> Result<F::Output, KeepAliveError>
where
    S: ActivityService + ?Sized,
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let mut handle = tokio::spawn(work);

    loop {
        tokio::select! {
            biased;

            joined = &mut handle => {
                return joined.map_err(|e| KeepAliveError::HandlerPanicked(e.to_string()));
            }
            _ = tokio::time::sleep(interval) => {
                service
                    .send_task_heartbeat(task_token)
                    .await
                    .map_err(KeepAliveError::Heartbeat)?;
                debug!("Heartbeat sent");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{InMemoryActivityService, Operation};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const ARN: &str = "arn:aws:states:us-east-1:000000000000:activity:keepalive";

    async fn claimed(service: &InMemoryActivityService) -> String {
        service.enqueue(ARN, "{}");
        service
            .get_activity_task(ARN, "w")
            .await
            .unwrap()
            .task_token
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_while_work_runs() {
        let service = InMemoryActivityService::new();
        let token = claimed(&service).await;

        let result = keep_alive(&service, &token, Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_millis(170)).await;
            42
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(service.heartbeat_count(&token), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_work_sends_no_heartbeat() {
        let service = InMemoryActivityService::new();
        let token = claimed(&service).await;

        let result = keep_alive(&service, &token, Duration::from_secs(10), async { "done" })
            .await
            .unwrap();

        assert_eq!(result, "done");
        assert_eq!(service.heartbeat_count(&token), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_failure_detaches_work() {
        let service = InMemoryActivityService::new();
        let token = claimed(&service).await;
        service.fail_operation(
            Operation::SendTaskHeartbeat,
            ServiceError::Transport("connection reset".into()),
        );

        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let err = keep_alive(&service, &token, Duration::from_millis(50), async move {
            tokio::time::sleep(Duration::from_millis(170)).await;
            flag.store(true, Ordering::SeqCst);
        })
        .await
        .unwrap_err();

        assert!(matches!(err, KeepAliveError::Heartbeat(ServiceError::Transport(_))));
        assert!(!finished.load(Ordering::SeqCst));

        // The work was not aborted.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_work() {
        let service = InMemoryActivityService::new();
        let token = claimed(&service).await;

        let err = keep_alive(&service, &token, Duration::from_millis(50), async {
            panic!("boom");
        })
        .await
        .unwrap_err();

        assert!(matches!(err, KeepAliveError::HandlerPanicked(_)));
    }
}

//! Integration tests for ActivityPoller driving real tasks
//!
//! Run with: cargo test -p sfn-poller --test poller_test

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use sfn_poller::limiter::{InMemoryRateLimiter, RateLimitConfig, WindowGranularity};
use sfn_poller::prelude::*;
use sfn_poller::service::Operation;

const ORDERS: &str = "arn:aws:states:us-east-1:000000000000:activity:orders";
const REFUNDS: &str = "arn:aws:states:us-east-1:000000000000:activity:refunds";

fn service() -> Arc<InMemoryActivityService> {
    Arc::new(InMemoryActivityService::new().with_long_poll_timeout(Duration::from_millis(20)))
}

fn config() -> TaskConfig {
    TaskConfig::new().with_heartbeat_interval(Duration::from_millis(50))
}

async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Fails odd numbers, succeeds on even ones
fn parity() -> impl ActivityHandler<Input = u64, Output = u64> {
    handler_fn(|_ctx: TaskContext, n: u64| async move {
        tokio::time::sleep(Duration::from_millis(n % 7 * 20)).await;
        if n % 2 == 1 {
            return Err(HandlerError::new(format!("{} is odd", n)).with_code("Odd"));
        }
        Ok(n / 2)
    })
}

struct Resource {
    arn: &'static str,
    name: &'static str,
}

impl ResourceInfo for Resource {
    fn arn(&self) -> &str {
        self.arn
    }

    fn activity_name(&self) -> &str {
        self.name
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_begin_polling_starts_every_task() {
    let service = service();
    let tasks: Vec<_> = (0..4)
        .map(|i| {
            Arc::new(Task::new(
                parity(),
                ORDERS,
                format!("worker-{}", i),
                config(),
                service.clone(),
            ))
        })
        .collect();

    let mut poller = ActivityPoller::new();
    for task in &tasks {
        poller.register_task(task.clone());
    }
    poller.begin_polling(&CancellationToken::new()).await;

    let started = tasks.iter().filter(|t| t.started().is_fired()).count();
    assert_eq!(started, 4);

    poller.stop();
    tokio::time::timeout(Duration::from_secs(5), poller.done().wait())
        .await
        .unwrap();
    assert!(tasks.iter().all(|t| t.state() == TaskState::Done));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_each_claim_gets_exactly_one_report() {
    let service = service();
    let tokens: Vec<String> = (0..20)
        .map(|n| service.enqueue(ORDERS, n.to_string()))
        .collect();

    let mut poller = ActivityPoller::new();
    for i in 0..3 {
        poller.register_task(Task::new(
            parity(),
            ORDERS,
            format!("worker-{}", i),
            config(),
            service.clone(),
        ));
    }
    poller.begin_polling(&CancellationToken::new()).await;

    eventually(|| service.report_count() == tokens.len()).await;
    poller.stop();
    tokio::time::timeout(Duration::from_secs(5), poller.done().wait())
        .await
        .unwrap();

    for (n, token) in tokens.iter().enumerate() {
        let reports: Vec<_> = service
            .calls_for(token)
            .into_iter()
            .filter(|op| matches!(op, Operation::SendTaskSuccess | Operation::SendTaskFailure))
            .collect();
        assert_eq!(reports.len(), 1, "token {} got {:?}", n, reports);

        if n % 2 == 1 {
            let failure = service.failure(token).unwrap();
            assert_eq!(failure.error, "Odd");
            assert_eq!(failure.cause, format!("{} is odd", n));
        } else {
            assert_eq!(service.success_output(token), Some((n / 2).to_string()));
        }
    }

    let workers: HashSet<_> = tokens.iter().filter_map(|t| service.claimed_by(t)).collect();
    assert!(workers.len() > 1, "work was not spread: {:?}", workers);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_done_waits_for_stragglers() {
    let service = service();
    let slow = handler_fn(|_ctx: TaskContext, input: Value| async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok::<_, HandlerError>(input)
    });
    let refunds = Arc::new(Task::new(slow, REFUNDS, "refunds", config(), service.clone()));
    let orders = Arc::new(Task::from_resource(
        parity(),
        &Resource {
            arn: ORDERS,
            name: "orders",
        },
        config(),
        service.clone(),
    ));

    let mut poller = ActivityPoller::new();
    poller
        .register_task(orders.clone())
        .register_task(refunds.clone())
        .begin_polling(&CancellationToken::new())
        .await;

    let token = service.enqueue(REFUNDS, "{}");
    eventually(|| service.heartbeat_count(&token) > 0).await;

    let done = poller.done();
    orders.stop();
    orders.done().wait().await;
    assert!(!done.is_fired());

    refunds.stop();
    tokio::time::timeout(Duration::from_secs(5), done.wait())
        .await
        .unwrap();
    assert_eq!(service.success_output(&token).as_deref(), Some("{}"));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_parent_cancellation_stops_polling() {
    let service = service();
    let parent = CancellationToken::new();

    let mut poller = ActivityPoller::new();
    poller
        .register_task(Task::new(parity(), ORDERS, "a", config(), service.clone()))
        .register_task(Task::new(parity(), REFUNDS, "b", config(), service.clone()))
        .begin_polling(&parent)
        .await;

    parent.cancel();
    tokio::time::timeout(Duration::from_secs(5), poller.done().wait())
        .await
        .unwrap();

    let polls = service.poll_count();
    service.enqueue(ORDERS, "2");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(service.poll_count(), polls);
    assert_eq!(service.pending_count(ORDERS), 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_shared_limiter_caps_claims_across_tasks() {
    let service = service();
    let limiter: Arc<dyn RateLimiter> = Arc::new(InMemoryRateLimiter::new(
        RateLimitConfig::new()
            .with_limit(ORDERS, 2)
            .with_window(WindowGranularity::Fixed)
            .with_key_ttl(Duration::from_secs(2)),
    ));
    for n in 0..5u64 {
        service.enqueue(ORDERS, (n * 2).to_string());
    }

    let mut poller = ActivityPoller::new();
    for i in 0..3 {
        poller.register_task(
            Task::new(parity(), ORDERS, format!("w{}", i), config(), service.clone())
                .with_rate_limiter(limiter.clone()),
        );
    }
    poller.begin_polling(&CancellationToken::new()).await;

    eventually(|| service.report_count() == 2).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(service.report_count(), 2);
    assert_eq!(service.pending_count(ORDERS), 3);

    // Backed-off tasks keep knocking, yet the full bucket still expires.
    tokio::time::timeout(Duration::from_secs(30), async {
        while service.report_count() < 5 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("capacity never came back after the key TTL");
    assert_eq!(service.pending_count(ORDERS), 0);

    poller.cancel();
    tokio::time::timeout(Duration::from_secs(5), poller.done().wait())
        .await
        .unwrap();
}

mod echo;

use std::sync::Arc;

use anyhow::{Context, Result};
use sfn_poller::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "sfn_poller=info,sfn_poller_worker=info";

fn init_tracing() {
    // RUST_LOG wins; otherwise LOG_LEVEL applies to both crates
    let filter = std::env::var("RUST_LOG")
        .ok()
        .or_else(|| {
            std::env::var("LOG_LEVEL")
                .ok()
                .map(|level| format!("sfn_poller={0},sfn_poller_worker={0}", level))
        })
        .and_then(|f| EnvFilter::try_new(f).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(filter),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("sfn-poller-worker starting...");

    let config = PollerConfig::from_env();
    config.validate().context("Invalid poller configuration")?;

    tracing::info!(
        worker_name = %config.worker_name,
        activities = config.activity_arns.len(),
        heartbeat_ms = config.task.heartbeat_interval.as_millis() as u64,
        rate_limited = config.redis_url.is_some(),
        "Starting activity poller"
    );

    let service = Arc::new(InMemoryActivityService::new());
    let rate_limiter = config
        .rate_limiter()
        .await
        .context("Failed to connect rate limiter")?;

    let seeded = echo::seed_from_env(&service, &config.activity_arns);
    if seeded > 0 {
        tracing::info!(tasks = seeded, "Seeded local queue");
    }

    let mut poller = ActivityPoller::new();
    for arn in &config.activity_arns {
        let mut task = Task::new(
            echo::EchoHandler,
            arn.as_str(),
            config.worker_name.as_str(),
            config.task.clone(),
            service.clone(),
        );
        if let Some(limiter) = &rate_limiter {
            task = task.with_rate_limiter(limiter.clone());
        }
        poller.register_task(task);
    }

    let shutdown = CancellationToken::new();
    poller.begin_polling(&shutdown).await;

    let done = poller.done();
    tokio::select! {
        _ = done.wait() => {
            tracing::info!("All tasks exited");
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            tracing::info!("Received shutdown signal, finishing in-flight work");
            poller.stop();
            done.wait().await;
        }
    }

    tracing::info!(reports = service.report_count(), "Worker shutdown complete");
    Ok(())
}

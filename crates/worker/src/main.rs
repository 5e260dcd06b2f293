//! Low-stock detection worker.
//!
//! Tails the inventory stream, hands each event to the processor and alerts
//! when a deduction leaves a warehouse below the threshold. Ctrl-C stops the
//! consumer and drains in-flight work.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use omnistock_infra::event_log::RedisStreamLog;
use omnistock_infra::{
    AppConfig, EventProcessor, LowStockHandler, Notifier, PgCheckpointStore, PgStockLedger,
    SlackNotifier, StreamConsumer, TracingNotifier, db,
};

const DB_MAX_CONNECTIONS: u32 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    omnistock_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    let pool = db::connect(&config.database_url, DB_MAX_CONNECTIONS)
        .await
        .context("failed to connect to postgres")?;
    db::migrate(&pool).await.context("failed to apply schema")?;

    let ledger = PgStockLedger::new(pool.clone());
    let checkpoints = PgCheckpointStore::new(pool);
    let log = Arc::new(
        RedisStreamLog::connect(&config.redis_url, config.stream_key.clone())
            .await
            .context("failed to connect to redis")?,
    );

    let notifier: Arc<dyn Notifier> = match &config.slack_webhook_url {
        Some(url) => Arc::new(SlackNotifier::new(url.clone())),
        None => {
            tracing::warn!("SLACK_WEBHOOK_URL not set; low stock alerts go to the log only");
            Arc::new(TracingNotifier)
        }
    };

    let handler = LowStockHandler::with_threshold(ledger, notifier, config.low_stock_threshold);
    let processor = EventProcessor::spawn(handler, config.processor());

    let consumer = StreamConsumer::new(log, checkpoints, config.consumer());
    let (stop_tx, stop_rx) = watch::channel(false);
    let consumer_task = tokio::spawn(consumer.run(processor.submitter(), stop_rx));

    tracing::info!(
        stream = %config.stream_key,
        consumer = %config.consumer_name,
        threshold = config.low_stock_threshold,
        "worker running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");

    let _ = stop_tx.send(true);
    match consumer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "stream consumer failed"),
        Err(e) => tracing::error!(error = %e, "stream consumer task panicked"),
    }

    let report = processor
        .shutdown(config.drain_timeout)
        .await
        .context("event processor failed to drain")?;
    if report.is_clean() {
        tracing::info!(completed = report.completed, "worker stopped");
    } else {
        tracing::warn!(
            completed = report.completed,
            panicked = report.panicked,
            aborted = report.aborted,
            undispatched = report.undispatched,
            "worker stopped with unfinished events"
        );
    }
    Ok(())
}

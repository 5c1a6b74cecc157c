use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;

use stock_ratings_core::config::Settings;
use stock_ratings_core::ingest::{BatchProcessor, HttpFeedClient, IngestReport, PipelineConfig};
use stock_ratings_core::storage::{lock, InMemoryStockRepository, PgStockRepository, StockRepository};

#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub batch_size: usize,
    pub page_delay: Duration,
}

/// One ingestion pass into Postgres, guarded by the advisory lock.
pub async fn run_locked(
    settings: &Settings,
    pool: &sqlx::PgPool,
    opts: IngestOptions,
    cancel: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let Some(held) = lock::try_acquire_ingest_lock(pool).await? else {
        tracing::warn!("ingest lock not acquired; another run in progress");
        return Ok(());
    };

    let repo = Arc::new(PgStockRepository::new(pool.clone()));
    let result = run(settings, repo, opts, cancel).await;

    if let Err(err) = held.release().await {
        tracing::warn!(error = %err, "failed to release ingest lock");
    }

    let report = result?;
    tracing::info!(
        persisted = report.persisted,
        skipped = report.skipped,
        last_cursor = %report.last_cursor,
        "ingestion run finished"
    );
    Ok(())
}

/// Same pass with an in-memory store; nothing touches the database.
pub async fn run_dry(
    settings: &Settings,
    opts: IngestOptions,
    cancel: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let repo = Arc::new(InMemoryStockRepository::new());
    let report = run(settings, repo.clone(), opts, cancel).await?;
    tracing::info!(
        dry_run = true,
        pages = report.pages,
        fetched = report.fetched,
        skipped = report.skipped,
        held = repo.len(),
        "ingestion run finished"
    );
    Ok(())
}

async fn run(
    settings: &Settings,
    repo: Arc<dyn StockRepository>,
    opts: IngestOptions,
    cancel: watch::Receiver<bool>,
) -> anyhow::Result<IngestReport> {
    let feed = Arc::new(HttpFeedClient::from_settings(settings)?);
    let config = PipelineConfig {
        batch_size: opts.batch_size,
        page_delay: opts.page_delay,
        token: settings.require_feed_token()?.to_string(),
    };

    tracing::info!(
        batch_size = config.batch_size,
        page_delay_ms = config.page_delay.as_millis() as u64,
        "starting ingestion"
    );

    BatchProcessor::new(feed, repo, config)
        .run(cancel)
        .await
        .context("ingestion run failed")
}

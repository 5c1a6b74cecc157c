//! Paged fetch, classify, batch persist.
//!
//! Pages are fetched strictly in cursor order on a single task. Fetched items
//! accumulate in a buffer which is classified and written as one batch once it
//! reaches `batch_size`; the remainder is flushed after the last page. Any
//! fetch or write failure ends the run, and whatever is still buffered is
//! dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;

use crate::classify::classify_batch;
use crate::domain::stock::StockRating;
use crate::ingest::provider::FeedClient;
use crate::storage::StockRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Fetching,
    Classifying,
    Persisting,
    Done,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("fetching page {page} failed: {source:#}")]
    Fetch {
        page: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("persisting batch of {batch_len} failed: {source:#}")]
    Persist {
        batch_len: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("ingestion cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub page_delay: Duration,
    pub token: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            page_delay: Duration::from_millis(500),
            token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub pages: usize,
    pub fetched: usize,
    /// Items rejected by validation.
    pub skipped: usize,
    pub persisted: u64,
    pub batches: usize,
    pub last_cursor: String,
}

pub struct BatchProcessor {
    feed: Arc<dyn FeedClient>,
    repo: Arc<dyn StockRepository>,
    config: PipelineConfig,
}

impl BatchProcessor {
    pub fn new(
        feed: Arc<dyn FeedClient>,
        repo: Arc<dyn StockRepository>,
        mut config: PipelineConfig,
    ) -> Self {
        config.batch_size = config.batch_size.max(1);
        Self { feed, repo, config }
    }

    /// Runs until the feed is exhausted, a step fails, or `cancel` flips to
    /// `true`. A dropped sender never cancels.
    pub async fn run(
        &self,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<IngestReport, PipelineError> {
        let started = Instant::now();
        let mut report = IngestReport::default();
        let mut batch: Vec<StockRating> = Vec::with_capacity(self.config.batch_size);
        let mut cursor = String::new();

        let result = loop {
            let stop = *cancel.borrow();
            if stop {
                break Err(PipelineError::Cancelled);
            }

            trace_state(PipelineState::Fetching, &report);
            let page = tokio::select! {
                page = self.feed.fetch_page(&self.config.token, &cursor) => page,
                _ = wait_cancelled(&mut cancel) => break Err(PipelineError::Cancelled),
            };
            let page = match page {
                Ok(page) => page,
                Err(source) => {
                    break Err(PipelineError::Fetch {
                        page: report.pages + 1,
                        source,
                    })
                }
            };

            if page.items.is_empty() {
                break Ok(());
            }

            report.pages += 1;
            report.fetched += page.items.len();
            let now = Utc::now();
            for mut item in page.items {
                item.ticker = item.ticker.trim().to_string();
                match item.validate(now) {
                    Ok(()) => batch.push(item),
                    Err(err) => {
                        report.skipped += 1;
                        tracing::warn!(ticker = %item.ticker, error = %err, "skipping invalid feed item");
                    }
                }
            }
            cursor = page.next_page;
            report.last_cursor = cursor.clone();

            if batch.len() >= self.config.batch_size {
                if let Err(err) = self.flush(&mut batch, &mut report).await {
                    break Err(err);
                }
            }

            tracing::info!(
                pages = report.pages,
                fetched = report.fetched,
                skipped = report.skipped,
                cursor = %cursor,
                "feed page processed"
            );

            if cursor.trim().is_empty() {
                break Ok(());
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.page_delay) => {}
                _ = wait_cancelled(&mut cancel) => break Err(PipelineError::Cancelled),
            }
        };

        let result = match result {
            Ok(()) if !batch.is_empty() => self.flush(&mut batch, &mut report).await,
            other => other,
        };

        match result {
            Ok(()) => {
                trace_state(PipelineState::Done, &report);
                tracing::info!(
                    pages = report.pages,
                    fetched = report.fetched,
                    persisted = report.persisted,
                    batches = report.batches,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    provider = self.feed.provider_name(),
                    "ingestion completed"
                );
                Ok(report)
            }
            Err(err) => {
                trace_state(PipelineState::Failed, &report);
                tracing::error!(
                    error = %err,
                    pages = report.pages,
                    persisted = report.persisted,
                    dropped = batch.len(),
                    "ingestion aborted"
                );
                Err(err)
            }
        }
    }

    async fn flush(
        &self,
        batch: &mut Vec<StockRating>,
        report: &mut IngestReport,
    ) -> Result<(), PipelineError> {
        trace_state(PipelineState::Classifying, report);
        classify_batch(batch);

        trace_state(PipelineState::Persisting, report);
        let written = self
            .repo
            .save_batch(batch)
            .await
            .map_err(|source| PipelineError::Persist {
                batch_len: batch.len(),
                source,
            })?;

        report.persisted += written;
        report.batches += 1;
        tracing::info!(batch_len = batch.len(), written, "batch persisted");
        batch.clear();
        Ok(())
    }
}

fn trace_state(state: PipelineState, report: &IngestReport) {
    tracing::debug!(?state, pages = report.pages, "pipeline state");
}

async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    let closed = cancel.wait_for(|c| *c).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

use anyhow::Context;
use clap::Parser;
use std::time::Duration;
use stock_ratings_core::config::Settings;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod ingest;

#[derive(Debug, Parser)]
#[command(name = "stock_ratings_worker")]
struct Args {
    /// Fetch and classify, but keep the results in memory instead of Postgres.
    #[arg(long)]
    dry_run: bool,

    /// Apply database migrations and exit.
    #[arg(long)]
    migrate_only: bool,

    /// Items buffered before a batch write. Overrides INGEST_BATCH_SIZE.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Pause between feed pages in milliseconds. Overrides INGEST_PAGE_DELAY_MS.
    #[arg(long)]
    delay_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    if args.migrate_only {
        let pool = connect(&settings).await?;
        stock_ratings_core::storage::migrate(&pool).await?;
        tracing::info!("migrations applied");
        return Ok(());
    }

    let opts = ingest::IngestOptions {
        batch_size: args.batch_size.unwrap_or(settings.ingest_batch_size),
        page_delay: args
            .delay_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| settings.page_delay()),
    };

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling ingestion");
            let _ = cancel_tx.send(true);
        }
    });

    let result = if args.dry_run {
        ingest::run_dry(&settings, opts, cancel_rx).await
    } else {
        let pool = connect(&settings).await?;
        stock_ratings_core::storage::migrate(&pool).await?;
        ingest::run_locked(&settings, &pool, opts, cancel_rx).await
    };

    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
    }
    result
}

async fn connect(settings: &Settings) -> anyhow::Result<sqlx::PgPool> {
    let db_url = settings.require_database_url()?;
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(settings.db_max_connections)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

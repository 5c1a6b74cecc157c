pub mod cache;
pub mod classify;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod pool;
pub mod query;
pub mod ranking;
pub mod service;
pub mod storage;

pub mod config {
    use anyhow::Context;
    use std::str::FromStr;
    use std::time::Duration;

    const DEFAULT_FEED_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_INGEST_BATCH_SIZE: usize = 100;
    const DEFAULT_INGEST_PAGE_DELAY_MS: u64 = 500;
    const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 5;
    const DEFAULT_PORT: u16 = 8080;
    const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub feed_base_url: Option<String>,
        pub feed_token: Option<String>,
        pub feed_timeout_secs: u64,
        pub ingest_batch_size: usize,
        pub ingest_page_delay_ms: u64,
        pub query_timeout_secs: u64,
        pub query_workers: usize,
        /// Empty means any origin.
        pub allowed_origins: Vec<String>,
        pub port: u16,
        pub db_max_connections: u32,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Self::from_lookup(|key| std::env::var(key).ok())
        }

        pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
        where
            F: Fn(&str) -> Option<String>,
        {
            let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
            let number = |key: &str, default| parse_or(text(key), default);

            Ok(Self {
                database_url: text("DATABASE_URL"),
                sentry_dsn: text("SENTRY_DSN"),
                feed_base_url: text("FEED_BASE_URL"),
                feed_token: text("FEED_TOKEN"),
                feed_timeout_secs: number("FEED_TIMEOUT_SECS", DEFAULT_FEED_TIMEOUT_SECS),
                ingest_batch_size: parse_or(text("INGEST_BATCH_SIZE"), DEFAULT_INGEST_BATCH_SIZE)
                    .max(1),
                ingest_page_delay_ms: number("INGEST_PAGE_DELAY_MS", DEFAULT_INGEST_PAGE_DELAY_MS),
                query_timeout_secs: number("QUERY_TIMEOUT_SECS", DEFAULT_QUERY_TIMEOUT_SECS),
                query_workers: parse_or(
                    text("QUERY_WORKERS"),
                    crate::pool::WorkerPool::default_size(),
                )
                .max(1),
                allowed_origins: text("ALLOWED_ORIGINS")
                    .map(|v| {
                        v.split(',')
                            .map(|o| o.trim().to_string())
                            .filter(|o| !o.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
                port: parse_or(text("PORT"), DEFAULT_PORT),
                db_max_connections: parse_or(text("DB_MAX_CONNECTIONS"), DEFAULT_DB_MAX_CONNECTIONS),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_feed_base_url(&self) -> anyhow::Result<&str> {
            self.feed_base_url
                .as_deref()
                .context("FEED_BASE_URL is required")
        }

        pub fn require_feed_token(&self) -> anyhow::Result<&str> {
            self.feed_token.as_deref().context("FEED_TOKEN is required")
        }

        pub fn feed_timeout(&self) -> Duration {
            Duration::from_secs(self.feed_timeout_secs)
        }

        pub fn page_delay(&self) -> Duration {
            Duration::from_millis(self.ingest_page_delay_ms)
        }

        pub fn query_timeout(&self) -> Duration {
            Duration::from_secs(self.query_timeout_secs)
        }
    }

    fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> T {
        raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
    }

}

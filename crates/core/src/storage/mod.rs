pub mod lock;
pub mod memory;
pub mod postgres;

use anyhow::Context;

use crate::domain::stock::{Stock, StockRating};
use crate::query::predicate::Predicate;
use crate::query::PageQuery;

pub use memory::InMemoryStockRepository;
pub use postgres::PgStockRepository;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Storage collaborator. Query construction happens in [`crate::query`];
/// implementations only execute the predicates they are handed.
///
/// Soft-deleted rows are invisible to every read.
#[async_trait::async_trait]
pub trait StockRepository: Send + Sync {
    async fn create(&self, rating: &StockRating) -> anyhow::Result<Stock>;

    /// Soft delete. Returns `false` when no live row has `id`.
    async fn delete(&self, id: i64) -> anyhow::Result<bool>;

    async fn find(&self, page: &PageQuery, predicates: &[Predicate]) -> anyhow::Result<Vec<Stock>>;

    async fn find_all(&self, page: &PageQuery) -> anyhow::Result<Vec<Stock>> {
        self.find(page, &[]).await
    }

    /// Most recent event for `ticker`.
    async fn find_by_ticker(&self, ticker: &str) -> anyhow::Result<Option<Stock>>;

    async fn find_by_label(&self, label: &str) -> anyhow::Result<Vec<Stock>>;

    /// Writes the whole batch or nothing. Returns the number of rows written.
    async fn save_batch(&self, ratings: &[StockRating]) -> anyhow::Result<u64>;

    async fn count(&self, predicates: &[Predicate]) -> anyhow::Result<i64>;
}

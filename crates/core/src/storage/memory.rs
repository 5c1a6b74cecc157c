use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use parking_lot::RwLock;

use crate::domain::stock::{Stock, StockRating};
use crate::query::predicate::Predicate;
use crate::query::PageQuery;
use crate::storage::StockRepository;

/// Vec-backed store evaluating predicates in process. Used by `--dry-run`
/// ingestion and by tests.
#[derive(Debug, Default)]
pub struct InMemoryStockRepository {
    rows: RwLock<Vec<Row>>,
    count_calls: AtomicUsize,
}

#[derive(Debug, Clone)]
struct Row {
    stock: Stock,
    deleted: bool,
}

impl InMemoryStockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times [`StockRepository::count`] actually ran.
    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.rows.read().iter().filter(|r| !r.deleted).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(rows: &mut Vec<Row>, rating: &StockRating) -> Stock {
        let now = Utc::now();
        let mut rating = rating.clone();
        rating.ticker = rating.ticker.trim().to_string();
        rating.classifications = rating.stored_labels();
        let stock = Stock {
            id: rows.len() as i64 + 1,
            rating,
            created_at: now,
            updated_at: now,
        };
        rows.push(Row {
            stock: stock.clone(),
            deleted: false,
        });
        stock
    }

    fn live_matching(&self, predicates: &[Predicate]) -> Vec<Stock> {
        self.rows
            .read()
            .iter()
            .filter(|r| !r.deleted)
            .filter(|r| predicates.iter().all(|p| p.matches(&r.stock)))
            .map(|r| r.stock.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl StockRepository for InMemoryStockRepository {
    async fn create(&self, rating: &StockRating) -> anyhow::Result<Stock> {
        Ok(Self::insert(&mut self.rows.write(), rating))
    }

    async fn delete(&self, id: i64) -> anyhow::Result<bool> {
        let mut rows = self.rows.write();
        match rows.iter_mut().find(|r| r.stock.id == id && !r.deleted) {
            Some(row) => {
                row.deleted = true;
                row.stock.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find(&self, page: &PageQuery, predicates: &[Predicate]) -> anyhow::Result<Vec<Stock>> {
        let mut rows = self.live_matching(predicates);
        rows.sort_by(|a, b| page.sort.compare(a, b));
        Ok(rows
            .into_iter()
            .skip(page.offset.max(0) as usize)
            .take(page.limit.max(0) as usize)
            .collect())
    }

    async fn find_by_ticker(&self, ticker: &str) -> anyhow::Result<Option<Stock>> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|r| !r.deleted && r.stock.rating.ticker == ticker)
            .max_by(|a, b| {
                a.stock
                    .rating
                    .time
                    .cmp(&b.stock.rating.time)
                    .then_with(|| a.stock.id.cmp(&b.stock.id))
            })
            .map(|r| r.stock.clone()))
    }

    async fn find_by_label(&self, label: &str) -> anyhow::Result<Vec<Stock>> {
        let mut rows: Vec<Stock> = self
            .rows
            .read()
            .iter()
            .filter(|r| !r.deleted && r.stock.rating.has_label(label))
            .map(|r| r.stock.clone())
            .collect();
        rows.sort_by(|a, b| b.rating.time.cmp(&a.rating.time).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn save_batch(&self, ratings: &[StockRating]) -> anyhow::Result<u64> {
        let mut rows = self.rows.write();
        for rating in ratings {
            Self::insert(&mut rows, rating);
        }
        Ok(ratings.len() as u64)
    }

    async fn count(&self, predicates: &[Predicate]) -> anyhow::Result<i64> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.live_matching(predicates).len() as i64)
    }
}

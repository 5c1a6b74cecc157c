//! Query orchestration over a [`StockRepository`].

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::cache::{cache_key, CountCache};
use crate::classify::classify;
use crate::domain::filter::{Filters, PaginationParams};
use crate::domain::label::Label;
use crate::domain::recommendation::Recommendation;
use crate::domain::stock::{Stock, StockRating};
use crate::error::{ServiceError, ServiceResult, ValidationError};
use crate::query::fields::FieldAllowlist;
use crate::query::predicate::{Predicate, SetOp};
use crate::query::{translate_filters, PageQuery, SortOrder, SortSpec};
use crate::ranking::rank;
use crate::storage::StockRepository;

/// Events loaded as ranking candidates per request.
pub const RECOMMENDATION_CANDIDATES: i64 = 5000;

/// One page of a filtered search.
#[derive(Debug, Clone, Serialize)]
pub struct StockPage {
    pub items: Vec<Stock>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub sort_field: String,
    pub sort_order: i32,
}

#[derive(Clone)]
pub struct StockService {
    repo: Arc<dyn StockRepository>,
    counts: CountCache,
    allow: Arc<FieldAllowlist>,
}

impl std::fmt::Debug for StockService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StockService")
            .field("counts", &self.counts)
            .finish_non_exhaustive()
    }
}

impl StockService {
    pub fn new(repo: Arc<dyn StockRepository>) -> Self {
        Self::with_cache(repo, CountCache::new())
    }

    pub fn with_cache(repo: Arc<dyn StockRepository>, counts: CountCache) -> Self {
        Self {
            repo,
            counts,
            allow: Arc::new(FieldAllowlist::for_stocks()),
        }
    }

    pub fn counts(&self) -> &CountCache {
        &self.counts
    }

    /// Validates and stores a single event. Unlabelled events are classified
    /// first.
    pub async fn register(&self, mut rating: StockRating) -> ServiceResult<Stock> {
        rating.ticker = rating.ticker.trim().to_string();
        rating.validate(Utc::now())?;
        if rating.classifications.is_empty() {
            classify(&mut rating);
        }

        let stock = self.repo.create(&rating).await?;
        self.counts.invalidate_all();
        tracing::info!(id = stock.id, ticker = %stock.rating.ticker, "stock registered");
        Ok(stock)
    }

    pub async fn delete(&self, id: i64) -> ServiceResult<()> {
        if !self.repo.delete(id).await? {
            return Err(ServiceError::NotFound(format!("stock id {id}")));
        }
        self.counts.invalidate_all();
        tracing::info!(id, "stock deleted");
        Ok(())
    }

    /// Filtered, sorted, paginated search plus the total number of matches.
    pub async fn find(&self, params: &PaginationParams, filters: &Filters) -> ServiceResult<StockPage> {
        if params.page <= 0 {
            return Err(ValidationError::InvalidPage(params.page).into());
        }
        if params.page_size <= 0 {
            return Err(ValidationError::InvalidPageSize(params.page_size).into());
        }
        let sort_field = if params.sort_field.trim().is_empty() {
            crate::query::fields::Column::DEFAULT_SORT.name()
        } else {
            params.sort_field.trim()
        };
        let order = match params.sort_order {
            0 | -1 => SortOrder::Desc,
            1 => SortOrder::Asc,
            other => return Err(ValidationError::InvalidSortOrder(other).into()),
        };
        let column = self
            .allow
            .resolve(sort_field)
            .ok_or_else(|| ValidationError::InvalidSortField(sort_field.to_string()))?;
        if let Some(bad) = filters.keys().find(|f| !self.allow.is_valid(f)) {
            return Err(ValidationError::InvalidFilterField(bad.clone()).into());
        }

        let (predicates, canonical) = translate_filters(filters, &self.allow)?;
        let sort = SortSpec { column, order };
        let page = PageQuery::new(sort, params.page, params.page_size);

        let repo = Arc::clone(&self.repo);
        let count_predicates = predicates.clone();
        let key = cache_key(&canonical);
        let (items, total) = tokio::try_join!(
            self.repo.find(&page, &predicates),
            self.counts.get_or_compute(&key, move || async move {
                repo.count(&count_predicates).await
            }),
        )?;

        tracing::debug!(
            page = params.page,
            page_size = params.page_size,
            filters = predicates.len(),
            returned = items.len(),
            total,
            "stocks query"
        );

        Ok(StockPage {
            items,
            total,
            page: params.page,
            page_size: params.page_size,
            total_pages: total_pages(total, params.page_size),
            sort_field: column.name().to_string(),
            sort_order: match order {
                SortOrder::Asc => 1,
                SortOrder::Desc => -1,
            },
        })
    }

    /// Unfiltered listing. `order` is `"<field>"` or `"<field> asc|desc"`.
    pub async fn find_all(&self, order: &str, page: i64, limit: i64) -> ServiceResult<Vec<Stock>> {
        if page <= 0 {
            return Err(ValidationError::InvalidPage(page).into());
        }
        if limit <= 0 {
            return Err(ValidationError::InvalidLimit(limit).into());
        }
        let sort = SortSpec::parse(order, &self.allow)?;
        Ok(self.repo.find_all(&PageQuery::new(sort, page, limit)).await?)
    }

    /// Most recent event for `ticker`.
    pub async fn find_by_ticker(&self, ticker: &str) -> ServiceResult<Stock> {
        let ticker = ticker.trim().to_ascii_uppercase();
        self.repo
            .find_by_ticker(&ticker)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("ticker {ticker}")))
    }

    pub async fn find_by_label(&self, label: &str) -> ServiceResult<Vec<Stock>> {
        Ok(self.repo.find_by_label(label.trim()).await?)
    }

    /// Ranks recent events that carry none of the risk labels.
    pub async fn recommendations(&self, limit: i64) -> ServiceResult<Vec<Recommendation>> {
        if limit <= 0 {
            return Err(ValidationError::InvalidLimit(limit).into());
        }
        let without_risk = Predicate::Labels {
            op: SetOp::NotOverlap,
            values: Label::RISK_FLAGS
                .iter()
                .map(|l| l.as_str().to_string())
                .collect(),
        };
        let page = PageQuery::new(SortSpec::default(), 1, RECOMMENDATION_CANDIDATES);
        let candidates = self.repo.find(&page, &[without_risk]).await?;

        let ranked = rank(candidates.iter().map(|s| &s.rating), limit as usize);
        tracing::debug!(candidates = candidates.len(), returned = ranked.len(), "recommendations ranked");
        Ok(ranked)
    }
}

/// Ceiling division that cannot overflow for any positive `page_size`.
fn total_pages(total: i64, page_size: i64) -> i64 {
    if total <= 0 {
        0
    } else {
        (total - 1) / page_size + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::filter::{Filter, FilterValue};
    use crate::storage::InMemoryStockRepository;
    use chrono::{Duration, TimeZone};

    fn rating(ticker: &str, company: &str, action: &str, rating_to: &str) -> StockRating {
        StockRating {
            ticker: ticker.into(),
            company: company.into(),
            brokerage: "Broker".into(),
            action: action.into(),
            rating_to: rating_to.into(),
            target_from: "$100.00".into(),
            target_to: "$100.00".into(),
            time: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            ..Default::default()
        }
    }

    async fn seeded() -> (StockService, Arc<InMemoryStockRepository>) {
        let repo = Arc::new(InMemoryStockRepository::new());
        let service = StockService::new(repo.clone());
        for r in [
            rating("AAPL", "Apple Tech", "upgraded by", "Buy"),
            rating("JPM", "JPMorgan Bank", "downgraded by", "Sell"),
            rating("PFE", "Pfizer Pharma", "initiated by", "Outperform"),
        ] {
            service.register(r).await.unwrap();
        }
        (service, repo)
    }

    #[tokio::test]
    async fn register_classifies_and_validates() {
        let (service, _) = seeded().await;
        let aapl = service.find_by_ticker("aapl").await.unwrap();
        assert!(aapl.rating.has_label("Tech"));
        assert!(aapl.rating.has_label("Bullish Signal"));

        let mut bad = rating("aapl", "Apple", "", "");
        let err = service.register(bad.clone()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ValidationError::InvalidTicker(_))));

        bad.ticker = "AAPL".into();
        bad.time = Utc::now() + Duration::hours(1);
        let err = service.register(bad).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ValidationError::FutureTime(_))));
    }

    #[tokio::test]
    async fn find_validates_in_order() {
        let (service, _) = seeded().await;
        let mut params = PaginationParams {
            page: 0,
            page_size: 0,
            ..Default::default()
        };
        let err = service.find(&params, &Filters::new()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ValidationError::InvalidPage(0))));

        params.page = 1;
        let err = service.find(&params, &Filters::new()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ValidationError::InvalidPageSize(0))));

        params.page_size = 10;
        params.sort_order = 2;
        params.sort_field = "bogus".into();
        let err = service.find(&params, &Filters::new()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ValidationError::InvalidSortOrder(2))));

        params.sort_order = 0;
        let err = service.find(&params, &Filters::new()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ValidationError::InvalidSortField(f)) if f == "bogus"));

        params.sort_field = String::new();
        let mut filters = Filters::new();
        filters.insert("password".into(), Filter::new(FilterValue::Scalar("x".into()), "nope"));
        let err = service.find(&params, &filters).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ValidationError::InvalidFilterField(f)) if f == "password"));
    }

    #[tokio::test]
    async fn find_filters_and_counts_once_per_filter_set() {
        let (service, repo) = seeded().await;
        let params = PaginationParams {
            page: 1,
            page_size: 2,
            ..Default::default()
        };
        let mut filters = Filters::new();
        filters.insert(
            "classifications".into(),
            Filter::new(
                FilterValue::Set(vec!["Tech".into(), "Biotech".into()]),
                "overlap",
            ),
        );

        let page = service.find(&params, &filters).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.sort_field, "time");
        assert_eq!(page.sort_order, -1);

        service.find(&params, &filters).await.unwrap();
        assert_eq!(repo.count_calls(), 1);

        service.register(rating("MSFT", "Microsoft Software", "", "")).await.unwrap();
        let page = service.find(&params, &filters).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(repo.count_calls(), 2);
    }

    #[tokio::test]
    async fn missing_entities_are_not_found() {
        let (service, _) = seeded().await;
        assert!(matches!(
            service.find_by_ticker("NOPE").await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(service.delete(999).await, Err(ServiceError::NotFound(_))));
        service.delete(1).await.unwrap();
        assert!(matches!(
            service.find_by_ticker("AAPL").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn recommendations_exclude_risk_labels() {
        let (service, _) = seeded().await;
        let recs = service.recommendations(5).await.unwrap();
        let tickers: Vec<_> = recs.iter().map(|r| r.ticker.as_str()).collect();
        // JPM carries Bearish Signal and Analyst Negative. PFE scores
        // 8 + 20 + 15 + 30 against AAPL's 25 + 15 + 10 + 20.
        assert_eq!(tickers, vec!["PFE", "AAPL"]);
        assert!(matches!(
            service.recommendations(0).await,
            Err(ServiceError::Validation(ValidationError::InvalidLimit(0)))
        ));
    }

    #[tokio::test]
    async fn find_all_parses_order() {
        let (service, _) = seeded().await;
        let rows = service.find_all("ticker desc", 1, 2).await.unwrap();
        let tickers: Vec<_> = rows.iter().map(|s| s.rating.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["PFE", "JPM"]);
        assert!(matches!(
            service.find_all("ticker; drop", 1, 2).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn total_pages_rounds_up_without_overflow() {
        assert_eq!(total_pages(0, 20), 0);
        assert_eq!(total_pages(1, 20), 1);
        assert_eq!(total_pages(40, 20), 2);
        assert_eq!(total_pages(41, 20), 3);
        assert_eq!(total_pages(5, i64::MAX), 1);
        assert_eq!(total_pages(i64::MAX, 1), i64::MAX);
    }
}

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stock_ratings_core::config::Settings;
use stock_ratings_core::domain::filter::{FilterRequest, PaginationParams};
use stock_ratings_core::error::{ServiceError, ServiceResult};
use stock_ratings_core::pool::WorkerPool;
use stock_ratings_core::service::StockService;
use stock_ratings_core::storage::PgStockRepository;

const DEFAULT_RECOMMENDATIONS: i64 = 5;
const DEFAULT_LIST_LIMIT: i64 = 20;

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

    let pool = connect_db(&settings).await;
    let service = pool.map(|pool| StockService::new(Arc::new(PgStockRepository::new(pool))));
    let workers = WorkerPool::new(settings.query_workers, settings.query_timeout());
    tracing::info!(
        workers = workers.size(),
        timeout_secs = settings.query_timeout_secs,
        degraded = service.is_none(),
        "query pool ready"
    );

    let state = AppState { service, workers };
    let app = router(state, &settings.allowed_origins);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], settings.port));
    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// `None` puts the API in degraded mode: every data route answers 503.
async fn connect_db(settings: &Settings) -> Option<PgPool> {
    let db_url = match settings.require_database_url() {
        Ok(url) => url,
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            return None;
        }
    };

    let pool = match sqlx::postgres::PgPoolOptions::new()
        .max_connections(settings.db_max_connections)
        .connect(db_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            let err = anyhow::Error::new(e);
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
            return None;
        }
    };

    match stock_ratings_core::storage::migrate(&pool).await {
        Ok(()) => Some(pool),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
            None
        }
    }
}

fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/stocks", get(list_stocks).post(find_stocks))
        .route("/api/v1/stocks/:ticker", get(get_stock))
        .route("/api/v1/classifications/:label", get(stocks_by_label))
        .route("/api/v1/recommendations", get(recommendations))
        .with_state(state)
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = if allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        let list: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(origin = %o, "ignoring malformed CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(list)
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

#[derive(Clone)]
struct AppState {
    service: Option<StockService>,
    workers: WorkerPool,
}

impl AppState {
    fn service(&self) -> Result<StockService, ApiError> {
        self.service.clone().ok_or(ApiError::Unavailable)
    }

    /// Runs `op` on the bounded query pool. If the client disconnects, axum
    /// drops this future and the pooled task is aborted with it.
    async fn run<T, F, Fut>(&self, op: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(StockService) -> Fut,
        Fut: std::future::Future<Output = ServiceResult<T>> + Send + 'static,
    {
        let service = self.service()?;
        // Disconnects surface as the drop above, never as `Cancelled`; that
        // variant only comes from callers with their own cancel signal.
        Ok(self
            .workers
            .run(op(service), std::future::pending())
            .await?)
    }
}

#[derive(Debug, Serialize)]
struct Envelope<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data: Some(data),
        error: None,
    })
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("database unavailable")]
    Unavailable,
    #[error("invalid request body: {0}")]
    BadBody(#[from] serde_json::Error),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::BadBody(_) => StatusCode::BAD_REQUEST,
            Self::Service(err) => match err {
                ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
                ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
                ServiceError::Busy => StatusCode::SERVICE_UNAVAILABLE,
                ServiceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                ServiceError::Cancelled => StatusCode::REQUEST_TIMEOUT,
                ServiceError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };

        let message = match &self {
            Self::Service(ServiceError::Upstream(err)) => {
                sentry_anyhow::capture_anyhow(err);
                tracing::error!(error = %err, "query failed");
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        let body = Envelope::<()> {
            success: false,
            data: None,
            error: Some(message),
        };
        (status, Json(body)).into_response()
    }
}

async fn health(State(state): State<AppState>) -> Json<Envelope<serde_json::Value>> {
    ok(serde_json::json!({
        "status": if state.service.is_some() { "ok" } else { "degraded" },
        "workers_available": state.workers.available(),
    }))
}

/// Filtered search. The JSON body is optional; an empty body means no filters.
async fn find_stocks(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let filters = if body.iter().all(u8::is_ascii_whitespace) {
        Default::default()
    } else {
        serde_json::from_slice::<FilterRequest>(&body)?
            .filters
            .unwrap_or_default()
    };

    let page = state
        .run(move |service| async move { service.find(&params, &filters).await })
        .await?;
    Ok(ok(page))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    order: String,
    page: Option<i64>,
    limit: Option<i64>,
}

async fn list_stocks(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = q.page.unwrap_or(1);
    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let rows = state
        .run(move |service| async move { service.find_all(&q.order, page, limit).await })
        .await?;
    Ok(ok(rows))
}

async fn get_stock(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let stock = state
        .run(move |service| async move { service.find_by_ticker(&ticker).await })
        .await?;
    Ok(ok(stock))
}

async fn stocks_by_label(
    State(state): State<AppState>,
    Path(label): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state
        .run(move |service| async move { service.find_by_label(&label).await })
        .await?;
    Ok(ok(rows))
}

#[derive(Debug, Deserialize)]
struct RecommendationsQuery {
    limit: Option<i64>,
}

async fn recommendations(
    State(state): State<AppState>,
    Query(q): Query<RecommendationsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = q.limit.unwrap_or(DEFAULT_RECOMMENDATIONS);
    let recs = state
        .run(move |service| async move { service.recommendations(limit).await })
        .await?;
    Ok(ok(recs))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use stock_ratings_core::domain::stock::StockRating;
    use stock_ratings_core::storage::InMemoryStockRepository;

    async fn state() -> AppState {
        let service = StockService::new(Arc::new(InMemoryStockRepository::new()));
        service
            .register(StockRating {
                ticker: "AAPL".into(),
                company: "Apple Tech".into(),
                brokerage: "Wedbush".into(),
                target_from: "$100".into(),
                target_to: "$130".into(),
                rating_to: "Buy".into(),
                time: chrono::Utc::now() - chrono::Duration::hours(1),
                ..Default::default()
            })
            .await
            .unwrap();
        AppState {
            service: Some(service),
            workers: WorkerPool::new(2, Duration::from_secs(5)),
        }
    }

    async fn read<R: IntoResponse>(res: Result<R, ApiError>) -> (StatusCode, serde_json::Value) {
        let res = res.into_response();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn params(page: i64) -> Query<PaginationParams> {
        Query(PaginationParams {
            page,
            page_size: 10,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn search_returns_page_envelope() {
        let body = Bytes::from_static(
            br#"{"filters":{"classifications":{"value":"Tech","matchMode":"contains"}}}"#,
        );
        let (status, body) = read(find_stocks(State(state().await), params(1), body).await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["total"], 1);
        assert_eq!(body["data"]["items"][0]["ticker"], "AAPL");
        assert_eq!(body["data"]["sort_field"], "time");
    }

    #[tokio::test]
    async fn bad_input_is_a_bad_request() {
        let (status, body) =
            read(find_stocks(State(state().await), params(0), Bytes::new()).await).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, _) = read(
            find_stocks(State(state().await), params(1), Bytes::from_static(b"{not json")).await,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_ticker_is_not_found() {
        let (status, _) =
            read(get_stock(State(state().await), Path("NOPE".to_string())).await).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn recommendations_default_limit() {
        let q = Query(RecommendationsQuery { limit: None });
        let (status, body) = read(recommendations(State(state().await), q).await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["position"], 1);
        assert_eq!(body["data"][0]["ticker"], "AAPL");
    }

    #[tokio::test]
    async fn degraded_mode_answers_503() {
        let state = AppState {
            service: None,
            workers: WorkerPool::new(1, Duration::from_secs(1)),
        };
        let q = Query(RecommendationsQuery { limit: None });
        let (status, body) = read(recommendations(State(state), q).await).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "database unavailable");
    }

    #[test]
    fn service_errors_map_to_statuses() {
        let status = |e: ServiceError| ApiError::from(e).into_response().status();
        assert_eq!(status(ServiceError::Busy), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status(ServiceError::Timeout(Duration::from_secs(5))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(status(ServiceError::Cancelled), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            status(ServiceError::Upstream(anyhow::anyhow!("db down"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

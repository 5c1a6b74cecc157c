use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CurrencyError {
    #[error("invalid currency format: {0:?}")]
    InvalidFormat(String),
    #[error("target price base is zero")]
    DivisionByZero,
}

/// Failure translating one filter into a predicate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslateError {
    #[error("unsupported match mode {mode:?} for field {field}")]
    UnsupportedMatchMode { field: String, mode: String },
    #[error("invalid value type for field {field}: {detail}")]
    InvalidValueType { field: String, detail: String },
}

/// Bad input from the caller. Never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("page must be greater than 0 (got {0})")]
    InvalidPage(i64),
    #[error("pageSize must be greater than 0 (got {0})")]
    InvalidPageSize(i64),
    #[error("sortOrder must be 1 or -1 (got {0})")]
    InvalidSortOrder(i32),
    #[error("invalid sort field: {0}")]
    InvalidSortField(String),
    #[error("invalid filter field: {0}")]
    InvalidFilterField(String),
    #[error("filter field {0} given more than once")]
    DuplicateFilterField(String),
    #[error("invalid order clause: {0:?}")]
    InvalidOrder(String),
    #[error("limit must be greater than 0 (got {0})")]
    InvalidLimit(i64),
    #[error("ticker must be 1-10 uppercase letters or digits (got {0:?})")]
    InvalidTicker(String),
    #[error("time cannot be in the future ({0})")]
    FutureTime(DateTime<Utc>),
    #[error(transparent)]
    Filter(#[from] TranslateError),
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("upstream failure: {0:#}")]
    Upstream(#[from] anyhow::Error),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("server busy")]
    Busy,
    #[error("caller cancelled the operation")]
    Cancelled,
}

pub type ServiceResult<T> = Result<T, ServiceError>;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{CurrencyError, ValidationError};

pub const MAX_TICKER_LEN: usize = 10;

/// Label assigned when nothing else applies.
pub const DEFAULT_LABEL: &str = "Neutral";

/// One analyst rating event as delivered by the feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StockRating {
    pub ticker: String,
    #[serde(default)]
    pub target_from: String,
    #[serde(default)]
    pub target_to: String,
    pub company: String,
    #[serde(default)]
    pub action: String,
    pub brokerage: String,
    #[serde(default)]
    pub rating_from: String,
    #[serde(default)]
    pub rating_to: String,
    pub time: DateTime<Utc>,
    #[serde(default, serialize_with = "serialize_labels")]
    pub classifications: Vec<String>,
}

/// A persisted rating event.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Stock {
    pub id: i64,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub rating: StockRating,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockRating {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), ValidationError> {
        if !is_valid_ticker(&self.ticker) {
            return Err(ValidationError::InvalidTicker(self.ticker.clone()));
        }
        if self.time > now {
            return Err(ValidationError::FutureTime(self.time));
        }
        Ok(())
    }

    /// Percentage change between the two target prices.
    pub fn upside(&self) -> Result<f64, CurrencyError> {
        percent_change(&self.target_from, &self.target_to)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.classifications.iter().any(|c| c == label)
    }

    /// Label set as written to storage: never empty.
    pub fn stored_labels(&self) -> Vec<String> {
        if self.classifications.is_empty() {
            vec![DEFAULT_LABEL.to_string()]
        } else {
            self.classifications.clone()
        }
    }
}

pub fn is_valid_ticker(ticker: &str) -> bool {
    !ticker.is_empty()
        && ticker.len() <= MAX_TICKER_LEN
        && ticker
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Parses strings such as `"$1,013.50"`.
pub fn parse_currency(raw: &str) -> Result<f64, CurrencyError> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '$' && *c != ',')
        .collect();
    let value = cleaned
        .parse::<f64>()
        .map_err(|_| CurrencyError::InvalidFormat(raw.to_string()))?;
    if !value.is_finite() {
        return Err(CurrencyError::InvalidFormat(raw.to_string()));
    }
    Ok(value)
}

pub fn percent_change(from: &str, to: &str) -> Result<f64, CurrencyError> {
    let from = parse_currency(from)?;
    let to = parse_currency(to)?;
    if from == 0.0 {
        return Err(CurrencyError::DivisionByZero);
    }
    Ok((to - from) / from * 100.0)
}

fn serialize_labels<S: Serializer>(labels: &[String], serializer: S) -> Result<S::Ok, S::Error> {
    if labels.is_empty() {
        [DEFAULT_LABEL].serialize(serializer)
    } else {
        labels.serialize(serializer)
    }
}

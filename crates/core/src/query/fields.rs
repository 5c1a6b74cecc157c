use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::domain::stock::Stock;

/// Comparable type of a queryable column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Text,
    Timestamp,
    /// The multi-valued label column.
    TextSet,
}

/// Queryable columns of the `stocks` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Id,
    CreatedAt,
    UpdatedAt,
    Ticker,
    TargetFrom,
    TargetTo,
    Company,
    Action,
    Brokerage,
    RatingFrom,
    RatingTo,
    Time,
    Classifications,
}

/// Borrowed value of one column of one row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnValue<'a> {
    Integer(i64),
    Text(&'a str),
    Timestamp(DateTime<Utc>),
    TextSet(&'a [String]),
}

impl Column {
    pub const ALL: [Column; 13] = [
        Column::Id,
        Column::CreatedAt,
        Column::UpdatedAt,
        Column::Ticker,
        Column::TargetFrom,
        Column::TargetTo,
        Column::Company,
        Column::Action,
        Column::Brokerage,
        Column::RatingFrom,
        Column::RatingTo,
        Column::Time,
        Column::Classifications,
    ];

    /// Column used when the caller does not choose a sort field.
    pub const DEFAULT_SORT: Column = Column::Time;

    pub fn name(self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::CreatedAt => "created_at",
            Column::UpdatedAt => "updated_at",
            Column::Ticker => "ticker",
            Column::TargetFrom => "target_from",
            Column::TargetTo => "target_to",
            Column::Company => "company",
            Column::Action => "action",
            Column::Brokerage => "brokerage",
            Column::RatingFrom => "rating_from",
            Column::RatingTo => "rating_to",
            Column::Time => "time",
            Column::Classifications => "classifications",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Column::Id => FieldKind::Integer,
            Column::CreatedAt | Column::UpdatedAt | Column::Time => FieldKind::Timestamp,
            Column::Classifications => FieldKind::TextSet,
            _ => FieldKind::Text,
        }
    }

    pub fn value_of(self, stock: &Stock) -> ColumnValue<'_> {
        let r = &stock.rating;
        match self {
            Column::Id => ColumnValue::Integer(stock.id),
            Column::CreatedAt => ColumnValue::Timestamp(stock.created_at),
            Column::UpdatedAt => ColumnValue::Timestamp(stock.updated_at),
            Column::Ticker => ColumnValue::Text(&r.ticker),
            Column::TargetFrom => ColumnValue::Text(&r.target_from),
            Column::TargetTo => ColumnValue::Text(&r.target_to),
            Column::Company => ColumnValue::Text(&r.company),
            Column::Action => ColumnValue::Text(&r.action),
            Column::Brokerage => ColumnValue::Text(&r.brokerage),
            Column::RatingFrom => ColumnValue::Text(&r.rating_from),
            Column::RatingTo => ColumnValue::Text(&r.rating_to),
            Column::Time => ColumnValue::Timestamp(r.time),
            Column::Classifications => ColumnValue::TextSet(&r.classifications),
        }
    }
}

/// Maps client-supplied field names onto columns.
///
/// Matching ignores case and underscores, so `target_from`, `targetFrom` and
/// `TargetFrom` all resolve to the same column.
#[derive(Debug, Clone)]
pub struct FieldAllowlist {
    by_key: HashMap<String, Column>,
}

impl FieldAllowlist {
    pub fn new(columns: &[Column]) -> Self {
        let by_key = columns
            .iter()
            .map(|c| (normalize(c.name()), *c))
            .collect();
        Self { by_key }
    }

    pub fn for_stocks() -> Self {
        Self::new(&Column::ALL)
    }

    pub fn resolve(&self, field: &str) -> Option<Column> {
        self.by_key.get(&normalize(field)).copied()
    }

    pub fn is_valid(&self, field: &str) -> bool {
        self.resolve(field).is_some()
    }

    pub fn columns(&self) -> Vec<Column> {
        let mut out: Vec<Column> = self.by_key.values().copied().collect();
        out.sort_by_key(|c| c.name());
        out
    }
}

impl Default for FieldAllowlist {
    fn default() -> Self {
        Self::for_stocks()
    }
}

fn normalize(field: &str) -> String {
    field
        .chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

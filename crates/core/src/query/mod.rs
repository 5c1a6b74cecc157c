//! Client filter vocabulary to storage predicates.

pub mod fields;
pub mod predicate;

use std::cmp::Ordering;

use crate::domain::filter::Filters;
use crate::domain::stock::Stock;
use crate::error::ValidationError;

use fields::{Column, ColumnValue, FieldAllowlist};
use predicate::{translate, Predicate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub column: Column,
    pub order: SortOrder,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            column: Column::DEFAULT_SORT,
            order: SortOrder::Desc,
        }
    }
}

impl SortSpec {
    /// Parses `"<field>"`, `"<field> asc"` or `"<field> desc"`.
    pub fn parse(order: &str, allow: &FieldAllowlist) -> Result<Self, ValidationError> {
        let mut parts = order.split_whitespace();
        let Some(field) = parts.next() else {
            return Ok(Self::default());
        };
        let column = allow
            .resolve(field)
            .ok_or_else(|| ValidationError::InvalidSortField(field.to_string()))?;
        let order_kw = parts.next();
        if parts.next().is_some() {
            return Err(ValidationError::InvalidOrder(order.to_string()));
        }
        let order = match order_kw.map(|s| s.to_ascii_lowercase()).as_deref() {
            None | Some("asc") => SortOrder::Asc,
            Some("desc") => SortOrder::Desc,
            Some(_) => return Err(ValidationError::InvalidOrder(order.to_string())),
        };
        Ok(Self { column, order })
    }

    /// Row ordering used by in-memory storage; ties fall back to `id`.
    pub fn compare(&self, a: &Stock, b: &Stock) -> Ordering {
        let primary = compare_values(self.column.value_of(a), self.column.value_of(b));
        let primary = match self.order {
            SortOrder::Asc => primary,
            SortOrder::Desc => primary.reverse(),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

fn compare_values(a: ColumnValue<'_>, b: ColumnValue<'_>) -> Ordering {
    match (a, b) {
        (ColumnValue::Integer(x), ColumnValue::Integer(y)) => x.cmp(&y),
        (ColumnValue::Text(x), ColumnValue::Text(y)) => x.cmp(y),
        (ColumnValue::Timestamp(x), ColumnValue::Timestamp(y)) => x.cmp(&y),
        (ColumnValue::TextSet(x), ColumnValue::TextSet(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// One page of a sorted, filtered result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub sort: SortSpec,
    pub offset: i64,
    pub limit: i64,
}

impl PageQuery {
    /// `page` is 1-based.
    pub fn new(sort: SortSpec, page: i64, page_size: i64) -> Self {
        Self {
            sort,
            offset: (page - 1).saturating_mul(page_size),
            limit: page_size,
        }
    }
}

/// Translates every filter, failing on the first bad one. Two keys naming the
/// same column (`ratingTo` and `rating_to`) are rejected.
///
/// Returns the predicates together with the filter set re-keyed by canonical
/// column name, which is what the count cache keys on.
pub fn translate_filters(
    filters: &Filters,
    allow: &FieldAllowlist,
) -> Result<(Vec<Predicate>, Filters), ValidationError> {
    let mut predicates = Vec::with_capacity(filters.len());
    let mut canonical = Filters::new();
    for (field, filter) in filters {
        let column = allow
            .resolve(field)
            .ok_or_else(|| ValidationError::InvalidFilterField(field.clone()))?;
        if canonical.contains_key(column.name()) {
            return Err(ValidationError::DuplicateFilterField(field.clone()));
        }
        predicates.push(translate(column, filter)?);
        canonical.insert(column.name().to_string(), filter.clone());
    }
    Ok((predicates, canonical))
}

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::domain::filter::{Filter, FilterValue};
use crate::domain::stock::Stock;
use crate::error::TranslateError;
use crate::query::fields::{Column, ColumnValue, FieldKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarOp {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
}

/// Relationship between a row's label set and the filter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Equals,
    NotEquals,
    /// Row labels are a superset of the filter set.
    Contains,
    NotContains,
    /// Row labels are a subset of the filter set.
    Contained,
    NotContained,
    Overlap,
    NotOverlap,
}

impl ScalarOp {
    pub fn parse(mode: &str) -> Option<Self> {
        Some(match mode {
            "equals" => ScalarOp::Equals,
            "contains" => ScalarOp::Contains,
            "startsWith" => ScalarOp::StartsWith,
            "endsWith" => ScalarOp::EndsWith,
            "greaterThan" => ScalarOp::GreaterThan,
            "lessThan" => ScalarOp::LessThan,
            _ => return None,
        })
    }

    fn is_pattern(self) -> bool {
        matches!(
            self,
            ScalarOp::Contains | ScalarOp::StartsWith | ScalarOp::EndsWith
        )
    }
}

impl SetOp {
    pub fn parse(mode: &str) -> Option<Self> {
        Some(match mode {
            "equals" => SetOp::Equals,
            "notEquals" => SetOp::NotEquals,
            "contains" => SetOp::Contains,
            "notContains" => SetOp::NotContains,
            "contained" => SetOp::Contained,
            "notContained" => SetOp::NotContained,
            "overlap" => SetOp::Overlap,
            "notOverlap" => SetOp::NotOverlap,
            _ => return None,
        })
    }

    /// The positive relation and whether it is negated.
    pub fn split(self) -> (SetOp, bool) {
        match self {
            SetOp::NotEquals => (SetOp::Equals, true),
            SetOp::NotContains => (SetOp::Contains, true),
            SetOp::NotContained => (SetOp::Contained, true),
            SetOp::NotOverlap => (SetOp::Overlap, true),
            positive => (positive, false),
        }
    }
}

/// Right-hand side of a scalar comparison, typed for its column.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Integer(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Scalar {
        column: Column,
        op: ScalarOp,
        operand: Operand,
    },
    Labels {
        op: SetOp,
        values: Vec<String>,
    },
}

/// Turns one validated filter into a predicate on `column`.
pub fn translate(column: Column, filter: &Filter) -> Result<Predicate, TranslateError> {
    let field = column.name();
    let unsupported = || TranslateError::UnsupportedMatchMode {
        field: field.to_string(),
        mode: filter.match_mode.clone(),
    };

    if column.kind() == FieldKind::TextSet {
        let op = SetOp::parse(&filter.match_mode).ok_or_else(unsupported)?;
        let values = match &filter.value {
            FilterValue::Scalar(s) => vec![s.clone()],
            FilterValue::Set(items) => items.clone(),
            FilterValue::Invalid(raw) => {
                return Err(TranslateError::InvalidValueType {
                    field: field.to_string(),
                    detail: format!("expected string or array of strings, got {raw}"),
                })
            }
        };
        return Ok(Predicate::Labels { op, values });
    }

    let op = ScalarOp::parse(&filter.match_mode).ok_or_else(unsupported)?;
    let raw = match &filter.value {
        FilterValue::Scalar(s) => s,
        FilterValue::Set(_) => {
            return Err(TranslateError::InvalidValueType {
                field: field.to_string(),
                detail: "arrays are only accepted for classifications".to_string(),
            })
        }
        FilterValue::Invalid(raw) => {
            return Err(TranslateError::InvalidValueType {
                field: field.to_string(),
                detail: format!("expected a scalar, got {raw}"),
            })
        }
    };

    let operand = if op.is_pattern() {
        Operand::Text(raw.clone())
    } else {
        coerce(column, raw)?
    };

    Ok(Predicate::Scalar {
        column,
        op,
        operand,
    })
}

fn coerce(column: Column, raw: &str) -> Result<Operand, TranslateError> {
    let invalid = |expected: &str| TranslateError::InvalidValueType {
        field: column.name().to_string(),
        detail: format!("expected {expected}, got {raw:?}"),
    };
    match column.kind() {
        FieldKind::Integer => raw
            .trim()
            .parse::<i64>()
            .map(Operand::Integer)
            .map_err(|_| invalid("an integer")),
        FieldKind::Timestamp => DateTime::parse_from_rfc3339(raw.trim())
            .map(|t| Operand::Timestamp(t.with_timezone(&Utc)))
            .map_err(|_| invalid("an RFC 3339 timestamp")),
        FieldKind::Text => Ok(Operand::Text(raw.to_string())),
        FieldKind::TextSet => Err(invalid("a label set")),
    }
}

impl Predicate {
    /// Evaluates the predicate against a row.
    pub fn matches(&self, stock: &Stock) -> bool {
        match self {
            Predicate::Scalar {
                column,
                op,
                operand,
            } => scalar_matches(column.value_of(stock), *op, operand),
            Predicate::Labels { op, values } => {
                set_matches(&stock.rating.stored_labels(), *op, values)
            }
        }
    }
}

fn scalar_matches(value: ColumnValue<'_>, op: ScalarOp, operand: &Operand) -> bool {
    if op.is_pattern() {
        let Operand::Text(needle) = operand else {
            return false;
        };
        let haystack = render(value);
        return match op {
            ScalarOp::Contains => haystack.contains(needle.as_str()),
            ScalarOp::StartsWith => haystack.starts_with(needle.as_str()),
            _ => haystack.ends_with(needle.as_str()),
        };
    }

    let ordering = match (value, operand) {
        (ColumnValue::Integer(a), Operand::Integer(b)) => a.cmp(b),
        (ColumnValue::Text(a), Operand::Text(b)) => a.cmp(b.as_str()),
        (ColumnValue::Timestamp(a), Operand::Timestamp(b)) => a.cmp(b),
        _ => return false,
    };
    match op {
        ScalarOp::Equals => ordering == Ordering::Equal,
        ScalarOp::GreaterThan => ordering == Ordering::Greater,
        _ => ordering == Ordering::Less,
    }
}

fn render(value: ColumnValue<'_>) -> String {
    match value {
        ColumnValue::Integer(i) => i.to_string(),
        ColumnValue::Text(s) => s.to_string(),
        ColumnValue::Timestamp(t) => t.to_rfc3339(),
        ColumnValue::TextSet(items) => items.join(","),
    }
}

fn set_matches(row: &[String], op: SetOp, values: &[String]) -> bool {
    let row: BTreeSet<&str> = row.iter().map(String::as_str).collect();
    let wanted: BTreeSet<&str> = values.iter().map(String::as_str).collect();
    let (positive, negated) = op.split();
    let holds = match positive {
        SetOp::Equals => row == wanted,
        SetOp::Contains => row.is_superset(&wanted),
        SetOp::Contained => row.is_subset(&wanted),
        _ => !row.is_disjoint(&wanted),
    };
    holds != negated
}

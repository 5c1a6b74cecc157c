use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Client-supplied filter value: either a scalar or a set of strings.
///
/// Numbers and booleans are kept in their JSON text form; the translator
/// coerces them to the column type later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    Scalar(String),
    Set(Vec<String>),
    /// Anything else the client sent. Rejected during translation.
    Invalid(String),
}

impl From<Value> for FilterValue {
    fn from(v: Value) -> Self {
        match v {
            Value::String(s) => FilterValue::Scalar(s),
            Value::Number(n) => FilterValue::Scalar(n.to_string()),
            Value::Bool(b) => FilterValue::Scalar(b.to_string()),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => out.push(s),
                        other => return FilterValue::Invalid(Value::Array(vec![other]).to_string()),
                    }
                }
                FilterValue::Set(out)
            }
            other => FilterValue::Invalid(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    #[serde(deserialize_with = "deserialize_value")]
    pub value: FilterValue,
    pub match_mode: String,
}

impl Filter {
    pub fn new(value: FilterValue, match_mode: impl Into<String>) -> Self {
        Self {
            value,
            match_mode: match_mode.into(),
        }
    }
}

/// Field name to filter. Ordered so that serialisation is canonical.
pub type Filters = BTreeMap<String, Filter>;

/// Request body of the filtered search endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterRequest {
    #[serde(default)]
    pub filters: Option<Filters>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaginationParams {
    pub page: i64,
    pub page_size: i64,
    pub sort_field: String,
    /// 1 ascending, -1 descending, 0 unset.
    pub sort_order: i32,
}

fn deserialize_value<'de, D>(deserializer: D) -> Result<FilterValue, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(FilterValue::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_wire_format() {
        let body = json!({
            "filters": {
                "classifications": {"value": ["Tech", "Potential Growth"], "matchMode": "overlap"},
                "ticker": {"value": "AA", "matchMode": "startsWith"},
                "id": {"value": 10, "matchMode": "greaterThan"}
            }
        });
        let req: FilterRequest = serde_json::from_value(body).unwrap();
        let filters = req.filters.unwrap();
        assert_eq!(
            filters["classifications"].value,
            FilterValue::Set(vec!["Tech".into(), "Potential Growth".into()])
        );
        assert_eq!(filters["ticker"].value, FilterValue::Scalar("AA".into()));
        assert_eq!(filters["id"].value, FilterValue::Scalar("10".into()));
        assert_eq!(filters["id"].match_mode, "greaterThan");
    }

    #[test]
    fn mixed_arrays_are_marked_invalid() {
        let f: Filter =
            serde_json::from_value(json!({"value": ["Tech", 3], "matchMode": "overlap"})).unwrap();
        assert!(matches!(f.value, FilterValue::Invalid(_)));

        let f: Filter =
            serde_json::from_value(json!({"value": {"a": 1}, "matchMode": "equals"})).unwrap();
        assert!(matches!(f.value, FilterValue::Invalid(_)));
    }

    #[test]
    fn missing_filters_and_pagination_default() {
        let req: FilterRequest = serde_json::from_value(json!({})).unwrap();
        assert!(req.filters.is_none());

        let p: PaginationParams = serde_json::from_value(json!({"page": 2})).unwrap();
        assert_eq!(p.page, 2);
        assert_eq!(p.page_size, 0);
        assert_eq!(p.sort_order, 0);
        assert!(p.sort_field.is_empty());
    }

    #[test]
    fn filters_serialize_in_key_order() {
        let mut a = Filters::new();
        a.insert("ticker".into(), Filter::new(FilterValue::Scalar("A".into()), "equals"));
        a.insert("company".into(), Filter::new(FilterValue::Scalar("B".into()), "contains"));
        let s = serde_json::to_string(&a).unwrap();
        assert!(s.find("company").unwrap() < s.find("ticker").unwrap());
    }
}

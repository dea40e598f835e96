//! Filter expressions and queries over JSON documents.
//!
//! The document-store boundary speaks in these types so that repository
//! adapters can express "unprocessed events, oldest first" or "shadow keys
//! after X" without knowing the driver. Drivers translate them natively; the
//! [`FilterExpr::matches`] and [`compare_values`] helpers give in-memory
//! drivers the same semantics.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::identity::Timestamp;

/// Comparison operator for a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    /// Field value is one of the values in an array.
    In,
    /// String field contains the substring.
    Contains,
    /// Field is present (value `true`) or absent (value `false`).
    Exists,
}

/// A single field predicate. Dotted field names address nested objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct FilterExpr {
    pub field: String,
    pub operator: FilterOperator,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub value: Value,
}

impl FilterExpr {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOperator::Eq, value)
    }

    pub fn gt(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOperator::Gt, value)
    }

    /// Evaluate the predicate against a document.
    pub fn matches(&self, doc: &Value) -> bool {
        let field = lookup(doc, &self.field);
        match self.operator {
            FilterOperator::Exists => {
                let wanted = self.value.as_bool().unwrap_or(true);
                field.is_some_and(|v| !v.is_null()) == wanted
            }
            FilterOperator::Eq => field.unwrap_or(&Value::Null) == &self.value,
            FilterOperator::Ne => field.unwrap_or(&Value::Null) != &self.value,
            FilterOperator::In => match &self.value {
                Value::Array(options) => {
                    let actual = field.unwrap_or(&Value::Null);
                    options.iter().any(|o| o == actual)
                }
                _ => false,
            },
            FilterOperator::Contains => match (field, &self.value) {
                (Some(Value::String(s)), Value::String(needle)) => s.contains(needle.as_str()),
                (Some(Value::Array(items)), needle) => items.contains(needle),
                _ => false,
            },
            FilterOperator::Gt | FilterOperator::Lt | FilterOperator::Gte | FilterOperator::Lte => {
                let Some(actual) = field else {
                    return false;
                };
                let Some(ordering) = compare_values(actual, &self.value) else {
                    return false;
                };
                match self.operator {
                    FilterOperator::Gt => ordering == Ordering::Greater,
                    FilterOperator::Lt => ordering == Ordering::Less,
                    FilterOperator::Gte => ordering != Ordering::Less,
                    _ => ordering != Ordering::Greater,
                }
            }
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub order: SortOrder,
}

/// A conjunctive query with ordering, an offset and an optional limit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentQuery {
    pub filters: Vec<FilterExpr>,
    pub sort: Vec<SortKey>,
    /// Matching documents to pass over before the first returned one.
    #[serde(default)]
    pub skip: usize,
    pub limit: Option<usize>,
}

impl DocumentQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, expr: FilterExpr) -> Self {
        self.filters.push(expr);
        self
    }

    pub fn sort_asc(mut self, field: impl Into<String>) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            order: SortOrder::Asc,
        });
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if the document satisfies every filter.
    pub fn matches(&self, doc: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Order two documents by the sort keys. Missing fields sort first.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        for key in &self.sort {
            let ordering = match (lookup(a, &key.field), lookup(b, &key.field)) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
            };
            let ordering = match key.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// Resolve a dotted path inside a document.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, segment| current.get(segment))
}

/// Order two JSON scalars. Numbers compare numerically, strings that are
/// both RFC 3339 timestamps compare chronologically, other strings
/// lexicographically. Mixed or non-scalar types are unordered.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => {
            match (
                x.parse::<Timestamp>().ok(),
                y.parse::<Timestamp>().ok(),
            ) {
                (Some(tx), Some(ty)) => Some(tx.cmp(&ty)),
                _ => Some(x.cmp(y)),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_eq_and_exists() {
        let doc = json!({ "processed": false, "payload": { "key": "a" } });
        assert!(FilterExpr::eq("processed", json!(false)).matches(&doc));
        assert!(FilterExpr::eq("payload.key", json!("a")).matches(&doc));
        assert!(!FilterExpr::eq("payload.key", json!("b")).matches(&doc));
        assert!(FilterExpr::new("payload.key", FilterOperator::Exists, json!(true)).matches(&doc));
        assert!(FilterExpr::new("missing", FilterOperator::Exists, json!(false)).matches(&doc));
    }

    #[test]
    fn test_range_on_strings_and_numbers() {
        let doc = json!({ "key": "user:2", "n": 5 });
        assert!(FilterExpr::gt("key", json!("user:1")).matches(&doc));
        assert!(!FilterExpr::gt("key", json!("user:2")).matches(&doc));
        assert!(FilterExpr::new("n", FilterOperator::Lte, json!(5)).matches(&doc));
        assert!(!FilterExpr::new("n", FilterOperator::Lt, json!(5)).matches(&doc));
        assert!(!FilterExpr::gt("missing", json!(0)).matches(&doc));
    }

    #[test]
    fn test_timestamps_compare_chronologically() {
        // Lexicographically "…00.5Z" < "…00Z", chronologically it is later.
        let later = json!("2024-01-01T00:00:00.500Z");
        let earlier = json!("2024-01-01T00:00:00Z");
        assert_eq!(compare_values(&later, &earlier), Some(Ordering::Greater));
    }

    #[test]
    fn test_in_and_contains() {
        let doc = json!({ "type": "KVMutated", "tags": ["a", "b"], "value": "hello world" });
        assert!(FilterExpr::new("type", FilterOperator::In, json!(["X", "KVMutated"])).matches(&doc));
        assert!(FilterExpr::new("value", FilterOperator::Contains, json!("world")).matches(&doc));
        assert!(FilterExpr::new("tags", FilterOperator::Contains, json!("b")).matches(&doc));
    }

    #[test]
    fn test_query_sorting() {
        let query = DocumentQuery::new().sort_asc("ts").sort_asc("id");
        let a = json!({ "ts": "2024-01-01T00:00:01Z", "id": "b" });
        let b = json!({ "ts": "2024-01-01T00:00:01Z", "id": "a" });
        let c = json!({ "ts": "2024-01-01T00:00:00Z", "id": "z" });

        let mut docs = vec![a.clone(), b.clone(), c.clone()];
        docs.sort_by(|x, y| query.compare(x, y));
        assert_eq!(docs, vec![c, b, a]);
    }
}

//! Backend-neutral query language.
//!
//! Filters are evaluated directly against JSON documents by the memory store
//! and translated into bool/filter DSL by the OpenSearch store.

use crate::MAX_QUERY_SIZE;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::cmp::Ordering;

/// A single document predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals value (any element when the field is an array)
    Term { field: String, value: Value },
    /// Field equals any of the values
    Terms { field: String, values: Vec<Value> },
    /// Field within bounds
    Range {
        field: String,
        gte: Option<Value>,
        gt: Option<Value>,
        lte: Option<Value>,
        lt: Option<Value>,
    },
    /// Negation
    MustNot(Box<Filter>),
}

fn to_value<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

impl Filter {
    pub fn term(field: &str, value: impl Serialize) -> Self {
        Self::Term {
            field: field.to_string(),
            value: to_value(value),
        }
    }

    pub fn terms<T: Serialize>(field: &str, values: impl IntoIterator<Item = T>) -> Self {
        Self::Terms {
            field: field.to_string(),
            values: values.into_iter().map(to_value).collect(),
        }
    }

    fn range(field: &str) -> Self {
        Self::Range {
            field: field.to_string(),
            gte: None,
            gt: None,
            lte: None,
            lt: None,
        }
    }

    pub fn gte(field: &str, value: impl Serialize) -> Self {
        let mut f = Self::range(field);
        if let Self::Range { gte, .. } = &mut f {
            *gte = Some(to_value(value));
        }
        f
    }

    pub fn lt(field: &str, value: impl Serialize) -> Self {
        let mut f = Self::range(field);
        if let Self::Range { lt, .. } = &mut f {
            *lt = Some(to_value(value));
        }
        f
    }

    /// `start <= field <= end`
    pub fn between(field: &str, start: impl Serialize, end: impl Serialize) -> Self {
        let mut f = Self::range(field);
        if let Self::Range { gte, lte, .. } = &mut f {
            *gte = Some(to_value(start));
            *lte = Some(to_value(end));
        }
        f
    }

    pub fn not(inner: Filter) -> Self {
        Self::MustNot(Box::new(inner))
    }

    /// Evaluate against a JSON document.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Self::Term { field, value } => field_values(doc, field)
                .iter()
                .any(|v| compare(v, value) == Some(Ordering::Equal)),
            Self::Terms { field, values } => field_values(doc, field).iter().any(|v| {
                values
                    .iter()
                    .any(|candidate| compare(v, candidate) == Some(Ordering::Equal))
            }),
            Self::Range {
                field,
                gte,
                gt,
                lte,
                lt,
            } => {
                let Some(v) = doc.get(field) else {
                    return false;
                };
                let check = |bound: &Option<Value>, ok: fn(Ordering) -> bool| match bound {
                    None => true,
                    Some(b) => compare(v, b).map(ok).unwrap_or(false),
                };
                check(gte, |o| o != Ordering::Less)
                    && check(gt, |o| o == Ordering::Greater)
                    && check(lte, |o| o != Ordering::Greater)
                    && check(lt, |o| o == Ordering::Less)
            }
            Self::MustNot(inner) => !inner.matches(doc),
        }
    }

    /// Query DSL clause
    pub fn to_dsl(&self) -> Value {
        match self {
            Self::Term { field, value } => json!({ "term": { field: value } }),
            Self::Terms { field, values } => json!({ "terms": { field: values } }),
            Self::Range {
                field,
                gte,
                gt,
                lte,
                lt,
            } => {
                let mut bounds = serde_json::Map::new();
                for (name, bound) in [("gte", gte), ("gt", gt), ("lte", lte), ("lt", lt)] {
                    if let Some(b) = bound {
                        bounds.insert(name.to_string(), b.clone());
                    }
                }
                json!({ "range": { field: bounds } })
            }
            Self::MustNot(inner) => json!({ "bool": { "must_not": [inner.to_dsl()] } }),
        }
    }
}

fn field_values<'a>(doc: &'a Value, field: &str) -> Vec<&'a Value> {
    match doc.get(field) {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(v) => vec![v],
        None => Vec::new(),
    }
}

fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Order two JSON scalars: numbers numerically, RFC 3339 strings as
/// instants, other strings lexically.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                return Some(x.cmp(&y));
            }
            x.as_f64()?.partial_cmp(&y.as_f64()?)
        }
        (Value::String(x), Value::String(y)) => match (parse_instant(x), parse_instant(y)) {
            (Some(tx), Some(ty)) => Some(tx.cmp(&ty)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Filtered, sorted, size-capped search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub filters: Vec<Filter>,
    pub sort: Option<(String, SortOrder)>,
    pub size: usize,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            sort: None,
            size: MAX_QUERY_SIZE,
        }
    }
}

impl SearchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn sort(mut self, field: &str, order: SortOrder) -> Self {
        self.sort = Some((field.to_string(), order));
        self
    }

    /// Result size, capped at [`MAX_QUERY_SIZE`]
    pub fn size(mut self, size: usize) -> Self {
        self.size = size.min(MAX_QUERY_SIZE);
        self
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Sort and truncate matched documents in place.
    pub fn finish(&self, docs: &mut Vec<Value>) {
        if let Some((field, order)) = &self.sort {
            // documents without the field sort last in either order
            docs.sort_by(|a, b| match (a.get(field), b.get(field)) {
                (Some(x), Some(y)) => {
                    let ord = compare(x, y).unwrap_or(Ordering::Equal);
                    match order {
                        SortOrder::Asc => ord,
                        SortOrder::Desc => ord.reverse(),
                    }
                }
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            });
        }
        docs.truncate(self.size.min(MAX_QUERY_SIZE));
    }

    /// Request body for `_search`
    pub fn to_dsl(&self) -> Value {
        let mut body = json!({
            "query": filters_to_dsl(&self.filters),
            "size": self.size.min(MAX_QUERY_SIZE),
        });
        if let Some((field, order)) = &self.sort {
            let order = match order {
                SortOrder::Asc => "asc",
                SortOrder::Desc => "desc",
            };
            body["sort"] = json!([{ field: { "order": order } }]);
        }
        body
    }
}

/// `bool.filter` over all filters, or `match_all` when empty
pub fn filters_to_dsl(filters: &[Filter]) -> Value {
    if filters.is_empty() {
        return json!({ "match_all": {} });
    }
    let clauses: Vec<Value> = filters.iter().map(Filter::to_dsl).collect();
    json!({ "bool": { "filter": clauses } })
}

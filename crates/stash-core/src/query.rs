//! Exact-match query engine.
//!
//! Queries run against a per-record JSON view of the form
//! `{"key": ..., "metadata": {...}, "value": ...}`. Field paths are
//! dot-addressed:
//!
//! | path | addresses |
//! |------|-----------|
//! | `key` | the item key |
//! | `metadata.version`, `metadata.tags`, ... | item metadata |
//! | `tags` | shorthand for `metadata.tags` |
//! | `value`, `value.a.b` | the decoded value |
//! | anything else (`a.b`) | `value.a.b` |
//!
//! Paths under `key`/`metadata` are answered without decoding the stored
//! value. Only exact equality is supported; a scalar compared against an
//! array matches when the array contains it (so `metadata.tags = "x"` means
//! "tagged x").

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StashError};

/// A query over the item store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Exact-match predicates keyed by field path, all of which must hold.
    /// Serialized as a JSON object: `{"where": {"metadata.tags": "x"}}`.
    #[serde(rename = "where", default)]
    pub filters: BTreeMap<String, Value>,

    /// `"field:asc"` or `"field:desc"`
    #[serde(default)]
    pub order_by: Option<String>,

    #[serde(default)]
    pub limit: Option<usize>,

    #[serde(default)]
    pub offset: usize,

    /// Fields to project; empty returns the full record view
    #[serde(default)]
    pub select: Vec<String>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a predicate. A second predicate on the same path replaces the first.
    pub fn filter(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(path.into(), value.into());
        self
    }

    pub fn order_by(mut self, spec: impl Into<String>) -> Self {
        self.order_by = Some(spec.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = fields.into_iter().map(Into::into).collect();
        self
    }
}

/// Rows returned by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Number of records matching the filters, before pagination
    pub total: usize,
    /// Projected rows, or full record views when `select` is empty
    pub rows: Vec<Value>,
}

/// A parsed field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPath {
    Key,
    Metadata(Vec<String>),
    Value(Vec<String>),
}

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.trim();
        if trimmed.is_empty() || trimmed.split('.').any(str::is_empty) {
            return Err(StashError::InvalidInput(format!(
                "Invalid field path: {:?}",
                path
            )));
        }
        let mut parts: Vec<String> = trimmed.split('.').map(String::from).collect();
        let head = parts.remove(0);
        Ok(match head.as_str() {
            "key" if parts.is_empty() => FieldPath::Key,
            "metadata" => FieldPath::Metadata(parts),
            "tags" if parts.is_empty() => FieldPath::Metadata(vec!["tags".to_string()]),
            "value" => FieldPath::Value(parts),
            _ => {
                parts.insert(0, head);
                FieldPath::Value(parts)
            }
        })
    }

    /// Whether evaluating this path requires the decoded value.
    pub fn needs_value(&self) -> bool {
        matches!(self, FieldPath::Value(_))
    }

    /// Segments from the root of the record view.
    fn segments(&self) -> Vec<&str> {
        match self {
            FieldPath::Key => vec!["key"],
            FieldPath::Metadata(rest) => std::iter::once("metadata")
                .chain(rest.iter().map(String::as_str))
                .collect(),
            FieldPath::Value(rest) => std::iter::once("value")
                .chain(rest.iter().map(String::as_str))
                .collect(),
        }
    }

    /// Resolve against a record view.
    pub fn resolve<'a>(&self, view: &'a Value) -> Option<&'a Value> {
        self.segments()
            .into_iter()
            .try_fold(view, |current, segment| match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// A parsed `orderBy` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: FieldPath,
    pub direction: SortDirection,
}

impl OrderBy {
    /// Parse `"field"`, `"field:asc"` or `"field:desc"`.
    pub fn parse(spec: &str) -> Result<Self> {
        let (field, direction) = match spec.rsplit_once(':') {
            Some((field, dir)) => {
                let direction = match dir.trim().to_ascii_lowercase().as_str() {
                    "asc" => SortDirection::Asc,
                    "desc" => SortDirection::Desc,
                    other => {
                        return Err(StashError::InvalidInput(format!(
                            "Invalid sort direction: {:?} (use asc or desc)",
                            other
                        )))
                    }
                };
                (field, direction)
            }
            None => (spec, SortDirection::Asc),
        };
        Ok(Self {
            field: FieldPath::parse(field)?,
            direction,
        })
    }

    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let ordering = compare_values(self.field.resolve(a), self.field.resolve(b));
        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

/// A query with its paths parsed and classified.
#[derive(Debug, Clone)]
pub(crate) struct CompiledQuery {
    pub fast_filters: Vec<(FieldPath, Value)>,
    pub slow_filters: Vec<(FieldPath, Value)>,
    pub order_by: Option<OrderBy>,
    pub select: Vec<(String, FieldPath)>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl CompiledQuery {
    pub fn compile(query: &Query) -> Result<Self> {
        let mut fast_filters = Vec::new();
        let mut slow_filters = Vec::new();
        for (path, expected) in &query.filters {
            let field = FieldPath::parse(path)?;
            if field.needs_value() {
                slow_filters.push((field, expected.clone()));
            } else {
                fast_filters.push((field, expected.clone()));
            }
        }
        let order_by = query.order_by.as_deref().map(OrderBy::parse).transpose()?;
        let select = query
            .select
            .iter()
            .map(|path| -> Result<(String, FieldPath)> {
                Ok((path.trim().to_string(), FieldPath::parse(path)?))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            fast_filters,
            slow_filters,
            order_by,
            select,
            offset: query.offset,
            limit: query.limit,
        })
    }

    /// Whether values must be decoded before filtering or sorting.
    pub fn needs_value_before_paging(&self) -> bool {
        !self.slow_filters.is_empty()
            || self
                .order_by
                .as_ref()
                .is_some_and(|order| order.field.needs_value())
    }

    /// Whether the output rows include value data.
    pub fn output_needs_value(&self) -> bool {
        self.select.is_empty() || self.select.iter().any(|(_, field)| field.needs_value())
    }

    pub fn matches_fast(&self, view: &Value) -> bool {
        matches_all(view, &self.fast_filters)
    }

    pub fn matches_slow(&self, view: &Value) -> bool {
        matches_all(view, &self.slow_filters)
    }

    /// Apply offset and limit.
    pub fn page<T>(&self, rows: Vec<T>) -> Vec<T> {
        let iter = rows.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }

    /// Shape a matched record view for output.
    pub fn project(&self, view: Value) -> Value {
        if self.select.is_empty() {
            return view;
        }
        let mut out = Value::Object(Map::new());
        for (path, field) in &self.select {
            let value = field.resolve(&view).cloned().unwrap_or(Value::Null);
            insert_path(&mut out, path, value);
        }
        out
    }
}

fn matches_all(view: &Value, filters: &[(FieldPath, Value)]) -> bool {
    filters
        .iter()
        .all(|(field, expected)| matches_value(field.resolve(view), expected))
}

fn matches_value(actual: Option<&Value>, expected: &Value) -> bool {
    match (actual, expected) {
        (None, Value::Null) => true,
        (None, _) => false,
        (Some(Value::Array(items)), expected) if !expected.is_array() => items.contains(expected),
        (Some(actual), expected) => json_eq(actual, expected),
    }
}

/// Equality that treats `1` and `1.0` as equal.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over optional JSON values; missing sorts as null.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x.len().cmp(&y.len()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn insert_path(out: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = out;
    for (i, segment) in segments.iter().enumerate() {
        let Value::Object(map) = current else {
            return;
        };
        if i == segments.len() - 1 {
            map.insert((*segment).to_string(), value);
            return;
        }
        current = map
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

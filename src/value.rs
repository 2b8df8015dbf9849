//! Dynamic metadata values.
//!
//! Chunk, document and library metadata is a mapping from string keys to
//! JSON-scalar values or arrays thereof. Filters dispatch over the tag;
//! comparisons define a total order only within a tag, so a number never
//! compares against a string and cross-tag range filters evaluate to false.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Metadata map. BTreeMap keeps iteration order stable across runs.
pub type Metadata = BTreeMap<String, Value>;

/// A metadata value: JSON scalar or array of values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
}

impl Value {
    /// Projection into the ordered domain used by range operators.
    ///
    /// Numbers order as numbers; strings order as dates when they parse as
    /// ISO-8601. Everything else has no order.
    pub(crate) fn as_ordered(&self) -> Option<OrderedValue> {
        match self {
            Value::Number(n) => Some(OrderedValue::Number(*n)),
            Value::String(s) => parse_iso_date(s).map(OrderedValue::Date),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl TryFrom<&serde_json::Value> for Value {
    type Error = StoreError;

    fn try_from(v: &serde_json::Value) -> Result<Self> {
        match v {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number).ok_or_else(|| {
                StoreError::InvalidRequest(format!("unrepresentable number: {n}"))
            }),
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(Value::try_from)
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            serde_json::Value::Object(_) => Err(StoreError::InvalidRequest(
                "metadata values must be JSON scalars or arrays".to_string(),
            )),
        }
    }
}

/// Convert a JSON object into a [`Metadata`] map.
pub fn metadata_from_json(map: &serde_json::Map<String, serde_json::Value>) -> Result<Metadata> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), Value::try_from(v)?)))
        .collect()
}

/// A value projected into one of the two comparable domains.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum OrderedValue {
    Number(f64),
    Date(DateTime<Utc>),
}

impl OrderedValue {
    /// Intra-tag comparison; cross-tag pairs have no order.
    pub(crate) fn compare(&self, other: &OrderedValue) -> Option<Ordering> {
        match (self, other) {
            (OrderedValue::Number(a), OrderedValue::Number(b)) => a.partial_cmp(b),
            (OrderedValue::Date(a), OrderedValue::Date(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// Parse an ISO-8601 date or datetime string.
///
/// Accepts RFC 3339 (`2024-06-01T12:00:00Z`), a bare date (`2024-06-01`,
/// taken as midnight UTC) and a naive datetime (`2024-06-01T12:00:00`).
fn parse_iso_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0)?));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    None
}

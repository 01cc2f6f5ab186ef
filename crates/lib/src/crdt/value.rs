//! Detached values handed to local mutations.
//!
//! A `LiveValue` is plain data describing a subtree that does not exist yet. It gets
//! ids only when a mutation attaches it to the pool. Plain JSON stored inside a
//! record stays inline; inside a list or dictionary it becomes a leaf node.

use std::collections::BTreeMap;

use serde_json::Value;

/// A subtree to be attached by a local mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveValue {
    Json(Value),
    Record(BTreeMap<String, LiveValue>),
    Dict(BTreeMap<String, LiveValue>),
    List(Vec<LiveValue>),
}

impl LiveValue {
    pub fn record<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, LiveValue)>,
    {
        LiveValue::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn dict<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, LiveValue)>,
    {
        LiveValue::Dict(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator<Item = LiveValue>,
    {
        LiveValue::List(items.into_iter().collect())
    }

    pub fn is_json(&self) -> bool {
        matches!(self, LiveValue::Json(_))
    }

    /// The immutable projection this value will have once attached.
    pub fn to_json(&self) -> Value {
        match self {
            LiveValue::Json(value) => value.clone(),
            LiveValue::Record(fields) | LiveValue::Dict(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            LiveValue::List(items) => Value::Array(items.iter().map(LiveValue::to_json).collect()),
        }
    }
}

impl From<Value> for LiveValue {
    fn from(value: Value) -> Self {
        LiveValue::Json(value)
    }
}

impl From<&str> for LiveValue {
    fn from(value: &str) -> Self {
        LiveValue::Json(Value::String(value.to_string()))
    }
}

impl From<String> for LiveValue {
    fn from(value: String) -> Self {
        LiveValue::Json(Value::String(value))
    }
}

impl From<i64> for LiveValue {
    fn from(value: i64) -> Self {
        LiveValue::Json(Value::from(value))
    }
}

impl From<f64> for LiveValue {
    fn from(value: f64) -> Self {
        LiveValue::Json(Value::from(value))
    }
}

impl From<bool> for LiveValue {
    fn from(value: bool) -> Self {
        LiveValue::Json(Value::Bool(value))
    }
}

//! # Field Snapshots
//!
//! A [`Snapshot`] is a top-level field map of a model, captured through
//! `serde`. It serves two purposes:
//!
//! - the "first dirty" state captured when a sync is registered
//! - the partial-update payload handed to a `DataSource`
//!
//! ## Diff Semantics
//! ```text
//! first    { id: 1, name: "a", tags: ["x"] }
//! current  { id: 1, name: "b", tags: ["x"] }
//!                      │
//!                      ▼  changes_since(first)
//! dirty    { name: "b" }
//! ```
//!
//! Comparison is per top-level field. A nested value counts as one field:
//! changing anything inside `tags` reports the whole new `tags` value.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

/// Top-level field map of a model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(BTreeMap<String, Value>);

impl Snapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Snapshot(BTreeMap::new())
    }

    /// Captures the fields of any serializable value.
    ///
    /// ## Errors
    /// - [`CoreError::SnapshotFailed`] if serialization fails
    /// - [`CoreError::NotAnObject`] if the value is not a struct or map
    pub fn capture<T: Serialize + ?Sized>(value: &T) -> CoreResult<Self> {
        match serde_json::to_value(value)? {
            Value::Object(fields) => Ok(Snapshot(fields.into_iter().collect())),
            other => Err(CoreError::NotAnObject {
                kind: value_kind(&other),
            }),
        }
    }

    /// Returns the fields of `self` whose value differs from `first`.
    ///
    /// Only keys present in `self` are considered. A key missing from
    /// `first` counts as changed.
    pub fn changes_since(&self, first: &Snapshot) -> Snapshot {
        self.0
            .iter()
            .filter(|(key, value)| first.0.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Writes a timestamp into `field`.
    pub fn stamp(&mut self, field: &str, at: DateTime<Utc>) -> CoreResult<()> {
        self.0.insert(field.to_string(), serde_json::to_value(at)?);
        Ok(())
    }

    /// Copies every field of `other` over the fields of `self`.
    pub fn merge(&mut self, other: &Snapshot) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    pub fn contains_key(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Field names in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl FromIterator<(String, Value)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Snapshot(iter.into_iter().collect())
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

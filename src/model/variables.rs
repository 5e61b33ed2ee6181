// ABOUTME: Runtime variable bag used for condition evaluation and personalization
// ABOUTME: Wraps a string-keyed JSON value map with merge and emptiness helpers

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Per-instance key/value context. Branch conditions read from it and
/// message templates substitute tokens out of it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VariableBag(HashMap<String, Value>);

impl VariableBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge `other` on top of this bag. Keys in `other` win.
    pub fn merged_with(&self, other: &VariableBag) -> VariableBag {
        let mut merged = self.0.clone();
        for (k, v) in &other.0 {
            merged.insert(k.clone(), v.clone());
        }
        VariableBag(merged)
    }

    /// A value counts as empty when it is missing, null, an empty string,
    /// or an empty collection.
    pub fn is_value_empty(value: Option<&Value>) -> bool {
        match value {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(Value::Array(a)) => a.is_empty(),
            Some(Value::Object(o)) => o.is_empty(),
            Some(_) => false,
        }
    }

    /// Render a value as the string form used in messages and comparisons.
    pub fn value_to_string(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for VariableBag {
    fn from_iter<T: IntoIterator<Item = (K, Value)>>(iter: T) -> Self {
        VariableBag(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

// Stepper - Thread-plan execution engine
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Structured arguments handed to a scripted plan at construction.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// Errors raised while marshalling plan arguments.
#[derive(Debug, Error)]
pub enum ArgsError {
    /// The JSON text did not parse
    #[error("invalid plan arguments: {0}")]
    Json(#[from] serde_json::Error),

    /// The document parsed but is not a key/value object
    #[error("plan arguments must be a JSON object, got {0}")]
    NotAnObject(String),

    /// `-k`/`-v` options were not given in pairs
    #[error("plan arguments need matching keys and values: got {keys} key(s) and {values} value(s)")]
    MismatchedPairs {
        /// Number of keys given.
        keys: usize,
        /// Number of values given.
        values: usize,
    },
}

/// An opaque key/value document of strings, numbers and booleans.
///
/// Ownership moves into the plan that receives it; there is no way to mutate
/// the document through the plan afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanArgs {
    entries: Map<String, JsonValue>,
}

impl PlanArgs {
    /// An empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object such as `{"variable_name": "foo"}`.
    pub fn from_json(text: &str) -> Result<Self, ArgsError> {
        match serde_json::from_str::<JsonValue>(text)? {
            JsonValue::Object(entries) => Ok(Self { entries }),
            other => Err(ArgsError::NotAnObject(other.to_string())),
        }
    }

    /// Build from parallel key and value lists, as given by repeated
    /// `-k <key> -v <value>` options. Values are kept as strings; a repeated
    /// key keeps its last value.
    pub fn from_key_value_pairs<K, V>(keys: &[K], values: &[V]) -> Result<Self, ArgsError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        if keys.len() != values.len() {
            return Err(ArgsError::MismatchedPairs { keys: keys.len(), values: values.len() });
        }

        let entries = keys
            .iter()
            .zip(values)
            .map(|(k, v)| (k.as_ref().to_string(), JsonValue::String(v.as_ref().to_string())))
            .collect();
        Ok(Self { entries })
    }

    /// Builder-style insertion, mostly for tests and embedders.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Raw access to an entry.
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.entries.get(key)
    }

    /// String entry. Numbers and booleans are not coerced.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(JsonValue::as_str)
    }

    /// Boolean entry; the strings `"true"` and `"false"` are accepted too.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.entries.get(key)? {
            JsonValue::Bool(b) => Some(*b),
            JsonValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Integer entry; numeric strings are accepted too.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.entries.get(key)? {
            JsonValue::Number(n) => n.as_i64(),
            JsonValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Whether the document has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.entries.iter()
    }
}

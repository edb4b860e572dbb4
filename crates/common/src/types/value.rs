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

use std::fmt;

use serde::{Deserialize, Serialize};

/// A variable's value as read through frame introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Integral value.
    Integer(i64),
    /// Boolean value.
    Boolean(bool),
    /// Anything rendered as text (pointers, aggregates).
    Text(String),
}

impl Value {
    /// Whether this value differs from a previously captured `baseline`.
    pub fn changed_from(&self, baseline: &Self) -> bool {
        self != baseline
    }

    /// The value as an unsigned integer, if it is one.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Integer(v) => u64::try_from(*v).ok(),
            Self::Boolean(b) => Some(u64::from(*b)),
            Self::Text(_) => None,
        }
    }

    /// The value as a signed integer, if it is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changed_from_baseline() {
        let baseline = Value::Integer(10);
        assert!(!Value::Integer(10).changed_from(&baseline));
        assert!(Value::Integer(11).changed_from(&baseline));
        assert!(Value::Text("10".into()).changed_from(&baseline));
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::Integer(10).as_u64(), Some(10));
        assert_eq!(Value::Integer(-1).as_u64(), None);
        assert_eq!(Value::Boolean(true).as_u64(), Some(1));
        assert_eq!(Value::Text("x".into()).as_i64(), None);
    }
}

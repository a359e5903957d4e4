use std::fmt;
use std::ops::Index;

use indexmap::IndexMap;

use crate::error::DialectError;

/// A parsed dialect document.
///
/// Mirrors the JSON data model plus the values the dialects add: non-finite
/// numbers and `undefined`. Objects keep their members in insertion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
}

static UNDEFINED: Value = Value::Undefined;

/// 2^63, the first integral f64 outside i64.
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;
/// 2^64, the first integral f64 outside u64.
const U64_LIMIT: f64 = 18_446_744_073_709_551_616.0;

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Object(members) => Some(members),
            _ => None,
        }
    }

    /// Looks up an object member.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|members| members.get(key))
    }

    /// Recursively sorts object members by key.
    pub fn sort_keys(&mut self) {
        match self {
            Value::Array(items) => items.iter_mut().for_each(Value::sort_keys),
            Value::Object(members) => {
                members.sort_keys();
                members.values_mut().for_each(Value::sort_keys);
            }
            _ => {}
        }
    }

    /// Converts to a `serde_json` tree.
    ///
    /// Fails on non-finite numbers. `Undefined` members are dropped from
    /// objects and become `null` elsewhere, as `JSON.stringify` does.
    pub fn to_json(&self) -> Result<serde_json::Value, DialectError> {
        Ok(match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => {
                serde_json::Value::Number(json_number(*n).ok_or(DialectError::NonFinite(*n))?)
            }
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(
                items.iter().map(Value::to_json).collect::<Result<_, _>>()?,
            ),
            Value::Object(members) => {
                let mut map = serde_json::Map::with_capacity(members.len());
                for (key, value) in members {
                    if !value.is_undefined() {
                        map.insert(key.clone(), value.to_json()?);
                    }
                }
                serde_json::Value::Object(map)
            }
        })
    }
}

/// Converts an f64 to a JSON number, printing integral values without a
/// fractional part.
///
/// Every integral value below 2^64 in magnitude prints as plain digits.
/// Larger integral values keep the shortest round-trip exponent form
/// (`1e20`), which parses back to the same f64.
pub(crate) fn json_number(n: f64) -> Option<serde_json::Number> {
    if n.is_finite() && n.fract() == 0.0 {
        if n.abs() < I64_LIMIT {
            return Some(serde_json::Number::from(n as i64));
        }
        if n > 0.0 && n < U64_LIMIT {
            return Some(serde_json::Number::from(n as u64));
        }
    }
    serde_json::Number::from_f64(n)
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(members) => Value::Object(
                members
                    .into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
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

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n.into())
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

impl<K: Into<String>> FromIterator<(K, Value)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Value::Object(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl Index<&str> for Value {
    type Output = Value;

    /// Missing members and non-objects index to `Undefined`.
    fn index(&self, key: &str) -> &Value {
        self.get(key).unwrap_or(&UNDEFINED)
    }
}

impl Index<usize> for Value {
    type Output = Value;

    fn index(&self, i: usize) -> &Value {
        self.as_array().and_then(|items| items.get(i)).unwrap_or(&UNDEFINED)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match crate::Dialect::Work.stringify(self, None) {
            Ok(text) => f.write_str(&text),
            Err(_) => Err(fmt::Error),
        }
    }
}

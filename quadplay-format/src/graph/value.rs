use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use num_bigint::BigInt;

use super::error::GraphError;
use super::function::Function;
use crate::value::Value;

/// Mutable container with reference identity.
pub type Shared<T> = Rc<RefCell<T>>;

/// A value in a serializable object graph.
///
/// Containers are shared: cloning a `GraphValue` clones the handle, not the
/// contents, and [`GraphValue::same`] compares handles. That is what lets a
/// graph hold the same container twice, or contain itself.
#[derive(Clone)]
pub enum GraphValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(BigInt),
    String(String),
    /// A registered symbol, identified by its description.
    Symbol(String),
    Array(Shared<Vec<GraphValue>>),
    Object(Shared<IndexMap<String, GraphValue>>),
    Set(Shared<Vec<GraphValue>>),
    Map(Shared<Vec<(GraphValue, GraphValue)>>),
    TypedArray(Shared<TypedArray>),
    Date(DateTime<Utc>),
    Url(String),
    RegExp { source: String, flags: String },
    Function(Function),
}

fn shared<T>(inner: T) -> Shared<T> {
    Rc::new(RefCell::new(inner))
}

impl GraphValue {
    pub fn array(items: Vec<GraphValue>) -> Self {
        GraphValue::Array(shared(items))
    }

    pub fn object(members: IndexMap<String, GraphValue>) -> Self {
        GraphValue::Object(shared(members))
    }

    pub fn set(items: Vec<GraphValue>) -> Self {
        GraphValue::Set(shared(items))
    }

    pub fn map(entries: Vec<(GraphValue, GraphValue)>) -> Self {
        GraphValue::Map(shared(entries))
    }

    pub fn typed_array(array: TypedArray) -> Self {
        GraphValue::TypedArray(shared(array))
    }

    pub fn regexp(source: impl Into<String>, flags: impl Into<String>) -> Self {
        GraphValue::RegExp {
            source: source.into(),
            flags: flags.into(),
        }
    }

    /// Wire name of this value's kind.
    pub fn type_name(&self) -> &'static str {
        match self {
            GraphValue::Undefined => "undefined",
            GraphValue::Null => "null",
            GraphValue::Bool(_) => "boolean",
            GraphValue::Number(_) => "number",
            GraphValue::BigInt(_) => "bigint",
            GraphValue::String(_) => "string",
            GraphValue::Symbol(_) => "symbol",
            GraphValue::Array(_) => "Array",
            GraphValue::Object(_) => "object",
            GraphValue::Set(_) => "Set",
            GraphValue::Map(_) => "Map",
            GraphValue::TypedArray(array) => array.borrow().type_name(),
            GraphValue::Date(_) => "Date",
            GraphValue::Url(_) => "URL",
            GraphValue::RegExp { .. } => "RegExp",
            GraphValue::Function(_) => "function",
        }
    }

    /// Address of the shared allocation for container kinds.
    pub(crate) fn identity(&self) -> Option<usize> {
        let ptr = match self {
            GraphValue::Array(rc) | GraphValue::Set(rc) => Rc::as_ptr(rc) as *const (),
            GraphValue::Object(rc) => Rc::as_ptr(rc) as *const (),
            GraphValue::Map(rc) => Rc::as_ptr(rc) as *const (),
            GraphValue::TypedArray(rc) => Rc::as_ptr(rc) as *const (),
            _ => return None,
        };
        Some(ptr as usize)
    }

    /// Whether both values are the same container or function.
    pub fn same(&self, other: &GraphValue) -> bool {
        match (self, other) {
            (GraphValue::Function(a), GraphValue::Function(b)) => a.same(b),
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, GraphValue::Undefined)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            GraphValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GraphValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Shared<Vec<GraphValue>>> {
        match self {
            GraphValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Shared<IndexMap<String, GraphValue>>> {
        match self {
            GraphValue::Object(members) => Some(members),
            _ => None,
        }
    }

    /// Clones an object member's handle.
    pub fn member(&self, key: &str) -> Option<GraphValue> {
        self.as_object().and_then(|members| members.borrow().get(key).cloned())
    }

    /// Converts to a dialect document.
    ///
    /// Kinds without a document form are flattened: sets and typed arrays
    /// become arrays, maps become arrays of `[key, value]` pairs, dates, URLs
    /// and regular expressions become strings, and functions are dropped.
    /// Shared containers are duplicated; cycles are an error.
    pub fn to_value(&self) -> Result<Value, GraphError> {
        self.to_value_guarded(&mut HashSet::new())
    }

    fn to_value_guarded(&self, active: &mut HashSet<usize>) -> Result<Value, GraphError> {
        let id = self.identity();
        if let Some(id) = id {
            if !active.insert(id) {
                return Err(GraphError::Cycle);
            }
        }

        let value = match self {
            GraphValue::Undefined | GraphValue::Function(_) => Value::Undefined,
            GraphValue::Null => Value::Null,
            GraphValue::Bool(b) => Value::Bool(*b),
            GraphValue::Number(n) => Value::Number(*n),
            GraphValue::BigInt(b) => Value::Number(b.to_string().parse().unwrap_or(f64::NAN)),
            GraphValue::String(s) | GraphValue::Symbol(s) | GraphValue::Url(s) => {
                Value::String(s.clone())
            }
            GraphValue::Array(items) | GraphValue::Set(items) => Value::Array(
                items
                    .borrow()
                    .iter()
                    .map(|item| item.to_value_guarded(active))
                    .collect::<Result<_, _>>()?,
            ),
            GraphValue::Object(members) => {
                let mut out = IndexMap::new();
                for (key, member) in members.borrow().iter() {
                    out.insert(key.clone(), member.to_value_guarded(active)?);
                }
                Value::Object(out)
            }
            GraphValue::Map(entries) => {
                let mut out = Vec::new();
                for (key, member) in entries.borrow().iter() {
                    out.push(Value::Array(vec![
                        key.to_value_guarded(active)?,
                        member.to_value_guarded(active)?,
                    ]));
                }
                Value::Array(out)
            }
            GraphValue::TypedArray(array) => {
                Value::Array(array.borrow().to_f64s().into_iter().map(Value::Number).collect())
            }
            GraphValue::Date(date) => Value::String(date_text(date)),
            GraphValue::RegExp { source, flags } => Value::String(format!("/{source}/{flags}")),
        };

        if let Some(id) = id {
            active.remove(&id);
        }
        Ok(value)
    }
}

pub(crate) fn date_text(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl From<Value> for GraphValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Undefined => GraphValue::Undefined,
            Value::Null => GraphValue::Null,
            Value::Bool(b) => GraphValue::Bool(b),
            Value::Number(n) => GraphValue::Number(n),
            Value::String(s) => GraphValue::String(s),
            Value::Array(items) => {
                GraphValue::array(items.into_iter().map(GraphValue::from).collect())
            }
            Value::Object(members) => GraphValue::object(
                members
                    .into_iter()
                    .map(|(key, member)| (key, GraphValue::from(member)))
                    .collect(),
            ),
        }
    }
}

impl From<f64> for GraphValue {
    fn from(n: f64) -> Self {
        GraphValue::Number(n)
    }
}

impl From<bool> for GraphValue {
    fn from(b: bool) -> Self {
        GraphValue::Bool(b)
    }
}

impl From<&str> for GraphValue {
    fn from(s: &str) -> Self {
        GraphValue::String(s.to_string())
    }
}

impl From<String> for GraphValue {
    fn from(s: String) -> Self {
        GraphValue::String(s)
    }
}

impl From<BigInt> for GraphValue {
    fn from(b: BigInt) -> Self {
        GraphValue::BigInt(b)
    }
}

impl From<Function> for GraphValue {
    fn from(f: Function) -> Self {
        GraphValue::Function(f)
    }
}

impl<K: Into<String>> FromIterator<(K, GraphValue)> for GraphValue {
    fn from_iter<I: IntoIterator<Item = (K, GraphValue)>>(iter: I) -> Self {
        GraphValue::object(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

// Containers print as kind and address only, since graphs may be cyclic.
impl fmt::Debug for GraphValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphValue::Undefined => f.write_str("Undefined"),
            GraphValue::Null => f.write_str("Null"),
            GraphValue::Bool(b) => write!(f, "Bool({b})"),
            GraphValue::Number(n) => write!(f, "Number({n})"),
            GraphValue::BigInt(b) => write!(f, "BigInt({b})"),
            GraphValue::String(s) => write!(f, "String({s:?})"),
            GraphValue::Symbol(s) => write!(f, "Symbol({s:?})"),
            GraphValue::Date(d) => write!(f, "Date({})", date_text(d)),
            GraphValue::Url(u) => write!(f, "Url({u:?})"),
            GraphValue::RegExp { source, flags } => write!(f, "RegExp(/{source}/{flags})"),
            GraphValue::Function(func) => write!(f, "Function({})", func.name()),
            container => write!(
                f,
                "{}@{:#x}",
                container.type_name(),
                container.identity().unwrap_or_default()
            ),
        }
    }
}

/// A typed numeric array.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedArray {
    Uint32(Vec<u32>),
    Int32(Vec<i32>),
    Uint16(Vec<u16>),
    Int16(Vec<i16>),
    Uint8(Vec<u8>),
    Uint8Clamped(Vec<u8>),
    Int8(Vec<i8>),
    Float64(Vec<f64>),
    Float32(Vec<f32>),
    BigUint64(Vec<u64>),
    BigInt64(Vec<i64>),
}

fn parse_all<T: std::str::FromStr>(name: &str, items: &[String]) -> Result<Vec<T>, GraphError> {
    items
        .iter()
        .map(|item| {
            item.parse()
                .map_err(|_| GraphError::Malformed(format!("bad {name} element {item:?}")))
        })
        .collect()
}

fn parse_floats(name: &str, items: &[String]) -> Result<Vec<f64>, GraphError> {
    items
        .iter()
        .map(|item| {
            parse_number(item)
                .ok_or_else(|| GraphError::Malformed(format!("bad {name} element {item:?}")))
        })
        .collect()
}

impl TypedArray {
    pub fn type_name(&self) -> &'static str {
        match self {
            TypedArray::Uint32(_) => "Uint32Array",
            TypedArray::Int32(_) => "Int32Array",
            TypedArray::Uint16(_) => "Uint16Array",
            TypedArray::Int16(_) => "Int16Array",
            TypedArray::Uint8(_) => "Uint8Array",
            TypedArray::Uint8Clamped(_) => "Uint8ClampedArray",
            TypedArray::Int8(_) => "Int8Array",
            TypedArray::Float64(_) => "Float64Array",
            TypedArray::Float32(_) => "Float32Array",
            TypedArray::BigUint64(_) => "BigUint64Array",
            TypedArray::BigInt64(_) => "BigInt64Array",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TypedArray::Uint32(v) => v.len(),
            TypedArray::Int32(v) => v.len(),
            TypedArray::Uint16(v) => v.len(),
            TypedArray::Int16(v) => v.len(),
            TypedArray::Uint8(v) | TypedArray::Uint8Clamped(v) => v.len(),
            TypedArray::Int8(v) => v.len(),
            TypedArray::Float64(v) => v.len(),
            TypedArray::Float32(v) => v.len(),
            TypedArray::BigUint64(v) => v.len(),
            TypedArray::BigInt64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements as wire text. Float elements keep the sign of zero.
    pub(crate) fn to_text(&self) -> Vec<String> {
        fn text<T: ToString>(v: &[T]) -> Vec<String> {
            v.iter().map(ToString::to_string).collect()
        }
        match self {
            TypedArray::Uint32(v) => text(v),
            TypedArray::Int32(v) => text(v),
            TypedArray::Uint16(v) => text(v),
            TypedArray::Int16(v) => text(v),
            TypedArray::Uint8(v) | TypedArray::Uint8Clamped(v) => text(v),
            TypedArray::Int8(v) => text(v),
            TypedArray::Float64(v) => v.iter().map(|&n| number_text(n)).collect(),
            TypedArray::Float32(v) => v.iter().map(|&n| float32_text(n)).collect(),
            TypedArray::BigUint64(v) => text(v),
            TypedArray::BigInt64(v) => text(v),
        }
    }

    /// Rebuilds an array from its wire name and element text.
    pub(crate) fn from_text(name: &str, items: &[String]) -> Result<Self, GraphError> {
        Ok(match name {
            "Uint32Array" => TypedArray::Uint32(parse_all(name, items)?),
            "Int32Array" => TypedArray::Int32(parse_all(name, items)?),
            "Uint16Array" => TypedArray::Uint16(parse_all(name, items)?),
            "Int16Array" => TypedArray::Int16(parse_all(name, items)?),
            "Uint8Array" => TypedArray::Uint8(parse_all(name, items)?),
            "Uint8ClampedArray" => TypedArray::Uint8Clamped(parse_all(name, items)?),
            "Int8Array" => TypedArray::Int8(parse_all(name, items)?),
            "Float64Array" => TypedArray::Float64(parse_floats(name, items)?),
            "Float32Array" => {
                TypedArray::Float32(parse_floats(name, items)?.into_iter().map(|n| n as f32).collect())
            }
            "BigUint64Array" => TypedArray::BigUint64(parse_all(name, items)?),
            "BigInt64Array" => TypedArray::BigInt64(parse_all(name, items)?),
            other => return Err(GraphError::Malformed(format!("unknown array type {other}"))),
        })
    }

    fn to_f64s(&self) -> Vec<f64> {
        match self {
            TypedArray::Uint32(v) => v.iter().map(|&n| n.into()).collect(),
            TypedArray::Int32(v) => v.iter().map(|&n| n.into()).collect(),
            TypedArray::Uint16(v) => v.iter().map(|&n| n.into()).collect(),
            TypedArray::Int16(v) => v.iter().map(|&n| n.into()).collect(),
            TypedArray::Uint8(v) | TypedArray::Uint8Clamped(v) => v.iter().map(|&n| n.into()).collect(),
            TypedArray::Int8(v) => v.iter().map(|&n| n.into()).collect(),
            TypedArray::Float64(v) => v.clone(),
            TypedArray::Float32(v) => v.iter().map(|&n| n.into()).collect(),
            TypedArray::BigUint64(v) => v.iter().map(|&n| n as f64).collect(),
            TypedArray::BigInt64(v) => v.iter().map(|&n| n as f64).collect(),
        }
    }
}

/// Wire text of a number, distinguishing `-0` from `0`.
pub(crate) fn number_text(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".into() } else { "-Infinity".into() }
    } else if n == 0.0 && n.is_sign_negative() {
        "-0".into()
    } else {
        n.to_string()
    }
}

fn float32_text(n: f32) -> String {
    if n.is_finite() && !(n == 0.0 && n.is_sign_negative()) {
        n.to_string()
    } else {
        number_text(n.into())
    }
}

pub(crate) fn parse_number(text: &str) -> Option<f64> {
    match text.trim() {
        "NaN" => Some(f64::NAN),
        "Infinity" | "+Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        other => other.parse().ok(),
    }
}

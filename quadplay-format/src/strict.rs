//! Bridge between dialect values and the strict JSON parser.
//!
//! `serde_json` builds and prints the actual trees. Values that strict JSON
//! cannot express travel through it as sentinel strings made of a single
//! private-use character, and are restored on the way out.

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

use crate::error::DialectError;
use crate::value::{json_number, Value};

const NAN: &str = "\u{E001}";
const INFINITY: &str = "\u{E002}";
const NEG_INFINITY: &str = "\u{E003}";
const UNDEFINED: &str = "\u{E004}";

/// Maximum indent width, as with `JSON.stringify`.
const MAX_INDENT: usize = 10;

/// Which non-JSON values are carried through sentinel strings.
///
/// Non-finite numbers always are; `undefined` only for dialects that have a
/// literal for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sentinels {
    pub undefined: bool,
}

impl Sentinels {
    pub const IEEE: Sentinels = Sentinels { undefined: false };
    pub const IEEE_AND_UNDEFINED: Sentinels = Sentinels { undefined: true };

    /// Quoted sentinel for a bare token in dialect text.
    pub(crate) fn quoted_nan() -> String {
        format!("\"{NAN}\"")
    }

    pub(crate) fn quoted_infinity() -> String {
        format!("\"{INFINITY}\"")
    }

    pub(crate) fn quoted_neg_infinity() -> String {
        format!("\"{NEG_INFINITY}\"")
    }

    pub(crate) fn quoted_undefined() -> String {
        format!("\"{UNDEFINED}\"")
    }

    fn restore(self, value: Value) -> Value {
        match value {
            Value::String(s) => match s.as_str() {
                NAN => Value::Number(f64::NAN),
                INFINITY => Value::Number(f64::INFINITY),
                NEG_INFINITY => Value::Number(f64::NEG_INFINITY),
                UNDEFINED if self.undefined => Value::Undefined,
                _ => Value::String(s),
            },
            other => other,
        }
    }

    fn reveal(self, text: &str) -> String {
        let text = text
            .replace(&Self::quoted_nan(), "NaN")
            .replace(&Self::quoted_infinity(), "Infinity")
            .replace(&Self::quoted_neg_infinity(), "-Infinity");
        if self.undefined {
            text.replace(&Self::quoted_undefined(), "undefined")
        } else {
            text
        }
    }
}

/// Hook applied to every parsed value, children first.
pub trait Reviver {
    fn revive(&mut self, key: &str, value: Value) -> Value;
}

impl<F: FnMut(&str, Value) -> Value> Reviver for F {
    fn revive(&mut self, key: &str, value: Value) -> Value {
        self(key, value)
    }
}

/// Hook applied to every value before it is printed, parents first.
pub trait Replacer {
    fn replace_value(&mut self, key: &str, value: Value) -> Value;
}

impl<F: FnMut(&str, Value) -> Value> Replacer for F {
    fn replace_value(&mut self, key: &str, value: Value) -> Value {
        self(key, value)
    }
}

/// Parses strict JSON text, restoring sentinels before `reviver` runs.
///
/// Syntax errors are `serde_json`'s own.
pub fn parse_strict(
    text: &str,
    sentinels: Sentinels,
    mut reviver: Option<&mut dyn Reviver>,
) -> Result<Value, DialectError> {
    let json: serde_json::Value = serde_json::from_str(text).map_err(DialectError::Syntax)?;
    Ok(revive("", Value::from(json), sentinels, &mut reviver))
}

fn revive(
    key: &str,
    value: Value,
    sentinels: Sentinels,
    reviver: &mut Option<&mut dyn Reviver>,
) -> Value {
    let value = match value {
        Value::Array(items) => {
            let mut revived = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                revived.push(revive(&i.to_string(), item, sentinels, reviver));
            }
            Value::Array(revived)
        }
        Value::Object(members) => {
            let mut revived = indexmap::IndexMap::with_capacity(members.len());
            for (k, member) in members {
                let member = revive(&k, member, sentinels, reviver);
                // An undefined member is deleted, as JSON.parse does
                if !member.is_undefined() {
                    revived.insert(k, member);
                }
            }
            Value::Object(revived)
        }
        other => other,
    };

    let value = sentinels.restore(value);
    match reviver {
        Some(r) => r.revive(key, value),
        None => value,
    }
}

/// Prints `value` as JSON text, with bare tokens for the values strict JSON
/// lacks.
pub fn to_strict_text(
    value: &Value,
    sentinels: Sentinels,
    mut replacer: Option<&mut dyn Replacer>,
    indent: Option<usize>,
) -> Result<String, DialectError> {
    let json = prepare("", value.clone(), sentinels, &mut replacer)
        .unwrap_or(serde_json::Value::Null);

    let mut out = Vec::new();
    match indent.map(|n| n.min(MAX_INDENT)) {
        Some(n) if n > 0 => {
            let indent = " ".repeat(n);
            let formatter = PrettyFormatter::with_indent(indent.as_bytes());
            let mut ser = Serializer::with_formatter(&mut out, formatter);
            json.serialize(&mut ser).map_err(DialectError::Serialize)?;
        }
        _ => serde_json::to_writer(&mut out, &json).map_err(DialectError::Serialize)?,
    }

    // serde_json only ever writes UTF-8
    let text = String::from_utf8_lossy(&out);
    Ok(sentinels.reveal(&text))
}

/// Applies the replacer and hides sentinel values. `None` means "omit".
fn prepare(
    key: &str,
    value: Value,
    sentinels: Sentinels,
    replacer: &mut Option<&mut dyn Replacer>,
) -> Option<serde_json::Value> {
    let value = match replacer {
        Some(r) => r.replace_value(key, value),
        None => value,
    };

    Some(match value {
        Value::Undefined if sentinels.undefined => serde_json::Value::String(UNDEFINED.into()),
        Value::Undefined => return None,
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(b),
        Value::Number(n) if n.is_nan() => serde_json::Value::String(NAN.into()),
        Value::Number(n) if n == f64::INFINITY => serde_json::Value::String(INFINITY.into()),
        Value::Number(n) if n == f64::NEG_INFINITY => {
            serde_json::Value::String(NEG_INFINITY.into())
        }
        Value::Number(n) => serde_json::Value::Number(json_number(n)?),
        Value::String(s) => serde_json::Value::String(s),
        Value::Array(items) => serde_json::Value::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    prepare(&i.to_string(), item, sentinels, replacer)
                        .unwrap_or(serde_json::Value::Null)
                })
                .collect(),
        ),
        Value::Object(members) => {
            let mut map = serde_json::Map::with_capacity(members.len());
            for (k, member) in members {
                if let Some(json) = prepare(&k, member, sentinels, replacer) {
                    map.insert(k, json);
                }
            }
            serde_json::Value::Object(map)
        }
    })
}

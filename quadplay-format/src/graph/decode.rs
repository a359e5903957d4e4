use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use num_bigint::BigInt;

use super::error::GraphError;
use super::function::{BuiltinRegistry, Function};
use super::node::{EncodedNode, NodeBody};
use super::value::{parse_number, GraphValue, TypedArray};

/// Hook called on every decoded node with the node's `custom_type`.
pub trait Untransform {
    fn untransform(&mut self, value: GraphValue, custom_type: Option<&str>) -> Result<GraphValue, GraphError>;
}

impl<F> Untransform for F
where
    F: FnMut(GraphValue, Option<&str>) -> Result<GraphValue, GraphError>,
{
    fn untransform(&mut self, value: GraphValue, custom_type: Option<&str>) -> Result<GraphValue, GraphError> {
        self(value, custom_type)
    }
}

/// Containers decoded so far, in the order the encoder emitted them.
#[derive(Debug, Default)]
pub struct DecodeMemory {
    slots: Vec<GraphValue>,
}

impl DecodeMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&GraphValue> {
        self.slots.get(index)
    }

    fn push(&mut self, value: GraphValue) -> usize {
        self.slots.push(value);
        self.slots.len() - 1
    }
}

/// Rebuilds a value graph from a node tree.
///
/// Containers enter `memory` before their children are decoded, so a child
/// can refer back to any ancestor. When the untransform hook replaces a
/// container, its memory slot is updated and later references resolve to
/// the replacement.
pub fn decode(
    node: &EncodedNode,
    memory: &mut DecodeMemory,
    untransform: Option<&mut dyn Untransform>,
) -> Result<GraphValue, GraphError> {
    Decoder { memory, untransform }.decode(node)
}

struct Decoder<'a, 't> {
    memory: &'a mut DecodeMemory,
    untransform: Option<&'a mut (dyn Untransform + 't)>,
}

impl Decoder<'_, '_> {
    fn decode(&mut self, node: &EncodedNode) -> Result<GraphValue, GraphError> {
        let mut slot = None;
        let value = match &node.body {
            NodeBody::Reference { index } => {
                // References are never untransformed
                return self.memory.get(*index).cloned().ok_or(GraphError::DanglingReference {
                    index: *index,
                    len: self.memory.len(),
                });
            }
            NodeBody::Undefined => GraphValue::Undefined,
            NodeBody::Null => GraphValue::Null,
            NodeBody::Boolean { value } => GraphValue::Bool(value == "true"),
            NodeBody::String { value } => GraphValue::String(value.clone()),
            NodeBody::Number { value } => GraphValue::Number(
                parse_number(value).ok_or_else(|| malformed("number", value))?,
            ),
            NodeBody::BigInt { value } => GraphValue::BigInt(
                value.parse::<BigInt>().map_err(|_| malformed("bigint", value))?,
            ),
            NodeBody::Symbol { value } => GraphValue::Symbol(value.clone()),
            NodeBody::Date { value } => GraphValue::Date(parse_date(value)?),
            NodeBody::Url { value } => GraphValue::Url(check_url(value)?),
            NodeBody::RegExp { value } => parse_regexp(value)?,
            NodeBody::Function { value } => GraphValue::Function(
                BuiltinRegistry::global()
                    .lookup(value)
                    .map(Function::Builtin)
                    .ok_or_else(|| GraphError::UnknownBuiltin(value.clone()))?,
            ),
            NodeBody::Array { value } => {
                let items = Rc::new(RefCell::new(Vec::with_capacity(value.len())));
                slot = Some(self.memory.push(GraphValue::Array(items.clone())));
                for child in value {
                    let child = self.decode(child)?;
                    items.borrow_mut().push(child);
                }
                GraphValue::Array(items)
            }
            NodeBody::Object { value } => {
                let members = Rc::new(RefCell::new(IndexMap::with_capacity(value.len())));
                slot = Some(self.memory.push(GraphValue::Object(members.clone())));
                for (key, child) in value {
                    let child = self.decode(child)?;
                    members.borrow_mut().insert(key.clone(), child);
                }
                GraphValue::Object(members)
            }
            NodeBody::Set { value } => {
                let items = Rc::new(RefCell::new(Vec::with_capacity(value.len())));
                slot = Some(self.memory.push(GraphValue::Set(items.clone())));
                for child in value {
                    let child = self.decode(child)?;
                    let mut items = items.borrow_mut();
                    // Set semantics: a container already present is not added twice
                    if !items.iter().any(|existing| existing.same(&child)) {
                        items.push(child);
                    }
                }
                GraphValue::Set(items)
            }
            NodeBody::Map { value } => {
                if value.key.len() != value.value.len() {
                    return Err(GraphError::Malformed(format!(
                        "map with {} keys but {} values",
                        value.key.len(),
                        value.value.len()
                    )));
                }
                let entries = Rc::new(RefCell::new(Vec::with_capacity(value.key.len())));
                slot = Some(self.memory.push(GraphValue::Map(entries.clone())));
                for (k, v) in value.key.iter().zip(&value.value) {
                    let k = self.decode(k)?;
                    let v = self.decode(v)?;
                    entries.borrow_mut().push((k, v));
                }
                GraphValue::Map(entries)
            }
            typed => {
                let (name, payload) = typed
                    .as_typed()
                    .ok_or_else(|| GraphError::Malformed(format!("unexpected node {typed:?}")))?;
                let array = GraphValue::typed_array(TypedArray::from_text(name, &payload.value)?);
                slot = Some(self.memory.push(array.clone()));
                array
            }
        };

        let value = match self.untransform.as_mut() {
            Some(hook) => hook.untransform(value, node.custom_type.as_deref())?,
            None => value,
        };
        if let Some(slot) = slot {
            self.memory.slots[slot] = value.clone();
        }
        Ok(value)
    }
}

fn malformed(kind: &str, text: &str) -> GraphError {
    GraphError::Malformed(format!("bad {kind} {text:?}"))
}

fn parse_date(text: &str) -> Result<DateTime<Utc>, GraphError> {
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_rfc2822(text))
        .map(|date| date.with_timezone(&Utc))
        .map_err(|_| malformed("date", text))
}

/// Accepts anything with a URL scheme.
fn check_url(text: &str) -> Result<String, GraphError> {
    let scheme = text.split_once(':').map(|(scheme, _)| scheme).unwrap_or_default();
    let valid = scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c));
    if valid { Ok(text.to_string()) } else { Err(malformed("URL", text)) }
}

fn parse_regexp(text: &str) -> Result<GraphValue, GraphError> {
    let body = text.strip_prefix('/').ok_or_else(|| malformed("regexp", text))?;
    let end = body.rfind('/').ok_or_else(|| malformed("regexp", text))?;
    Ok(GraphValue::regexp(&body[..end], &body[end + 1..]))
}

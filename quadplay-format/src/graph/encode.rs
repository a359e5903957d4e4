use std::collections::HashMap;

use indexmap::IndexMap;

use super::error::GraphError;
use super::function::Function;
use super::node::{EncodedNode, MapEntries, NodeBody, TypedPayload};
use super::value::{date_text, number_text, GraphValue};

/// What a [`Transform`] puts in place of a value.
#[derive(Debug, Clone)]
pub struct Substitution {
    pub value: GraphValue,
    /// Carried on the node so the decoder can reverse the substitution.
    pub custom_type: Option<String>,
}

/// Hook called on every value before it is encoded.
///
/// Returning `None` encodes the value unchanged.
pub trait Transform {
    fn transform(&mut self, value: &GraphValue) -> Option<Substitution>;
}

impl<F: FnMut(&GraphValue) -> Option<Substitution>> Transform for F {
    fn transform(&mut self, value: &GraphValue) -> Option<Substitution> {
        self(value)
    }
}

/// Containers already emitted during one encode, with their emission index.
#[derive(Debug, Default)]
pub struct MemoizationMap {
    indices: HashMap<usize, usize>,
    // Holds every keyed container so an address cannot be reused mid-encode
    keys: Vec<GraphValue>,
}

impl MemoizationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn lookup(&self, value: &GraphValue) -> Option<usize> {
        value.identity().and_then(|id| self.indices.get(&id).copied())
    }

    fn register(&mut self, value: &GraphValue) -> usize {
        let index = self.keys.len();
        if let Some(id) = value.identity() {
            self.indices.insert(id, index);
        }
        self.keys.push(value.clone());
        index
    }
}

/// Encodes a value graph into a node tree.
///
/// Containers are memoized by the identity of the value *before* the
/// transform ran, so a transform that builds a fresh substitute on every
/// call still produces references for repeated originals.
pub fn encode(
    value: &GraphValue,
    memo: &mut MemoizationMap,
    transform: Option<&mut dyn Transform>,
) -> Result<EncodedNode, GraphError> {
    Encoder { memo, transform }.encode(value)
}

struct Encoder<'a, 't> {
    memo: &'a mut MemoizationMap,
    transform: Option<&'a mut (dyn Transform + 't)>,
}

impl Encoder<'_, '_> {
    fn encode(&mut self, original: &GraphValue) -> Result<EncodedNode, GraphError> {
        let substitution = self.transform.as_mut().and_then(|t| t.transform(original));
        let (value, custom_type) = match substitution {
            Some(Substitution { value, custom_type }) => (value, custom_type),
            None => (original.clone(), None),
        };

        let body = match &value {
            GraphValue::Undefined => NodeBody::Undefined,
            GraphValue::Null => NodeBody::Null,
            GraphValue::Bool(b) => NodeBody::Boolean { value: b.to_string() },
            GraphValue::Number(n) => NodeBody::Number { value: number_text(*n) },
            GraphValue::BigInt(b) => NodeBody::BigInt { value: b.to_string() },
            GraphValue::String(s) => NodeBody::String { value: s.clone() },
            GraphValue::Symbol(s) => NodeBody::Symbol { value: s.clone() },
            GraphValue::Date(d) => NodeBody::Date { value: date_text(d) },
            GraphValue::Url(u) => NodeBody::Url { value: u.clone() },
            GraphValue::RegExp { source, flags } => NodeBody::RegExp {
                value: format!("/{source}/{flags}"),
            },
            GraphValue::Function(f) => NodeBody::Function { value: builtin_name(f)? },
            GraphValue::Array(_)
            | GraphValue::Object(_)
            | GraphValue::Set(_)
            | GraphValue::Map(_)
            | GraphValue::TypedArray(_) => {
                let key = if original.identity().is_some() { original } else { &value };
                match self.memo.lookup(key) {
                    Some(index) => NodeBody::Reference { index },
                    None => {
                        self.memo.register(key);
                        self.container(&value)?
                    }
                }
            }
        };

        Ok(EncodedNode { body, custom_type })
    }

    fn container(&mut self, value: &GraphValue) -> Result<NodeBody, GraphError> {
        // Children are cloned out first so hooks may borrow the container
        Ok(match value {
            GraphValue::Array(items) => {
                let items = items.borrow().clone();
                NodeBody::Array { value: self.encode_all(&items)? }
            }
            GraphValue::Set(items) => {
                let items = items.borrow().clone();
                NodeBody::Set { value: self.encode_all(&items)? }
            }
            GraphValue::Object(members) => {
                let members = members.borrow().clone();
                let mut value = IndexMap::with_capacity(members.len());
                for (key, member) in &members {
                    value.insert(key.clone(), self.encode(member)?);
                }
                NodeBody::Object { value }
            }
            GraphValue::Map(entries) => {
                let entries = entries.borrow().clone();
                let mut value = MapEntries {
                    key: Vec::with_capacity(entries.len()),
                    value: Vec::with_capacity(entries.len()),
                };
                for (k, v) in &entries {
                    value.key.push(self.encode(k)?);
                    value.value.push(self.encode(v)?);
                }
                NodeBody::Map { value }
            }
            GraphValue::TypedArray(array) => {
                let array = array.borrow();
                let name = array.type_name();
                let payload = TypedPayload {
                    arraytype: Some(name.to_string()),
                    value: array.to_text(),
                };
                NodeBody::typed(name, payload)
                    .ok_or_else(|| GraphError::Malformed(format!("unknown array type {name}")))?
            }
            other => {
                return Err(GraphError::Malformed(format!("{} is not a container", other.type_name())));
            }
        })
    }

    fn encode_all(&mut self, items: &[GraphValue]) -> Result<Vec<EncodedNode>, GraphError> {
        items.iter().map(|item| self.encode(item)).collect()
    }
}

fn builtin_name(f: &Function) -> Result<String, GraphError> {
    match f {
        Function::Builtin(b) => Ok(b.name().to_string()),
        Function::Closure { name, .. } => Err(GraphError::UnsupportedFunction(name.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TypedArray;

    fn encode_plain(value: &GraphValue) -> EncodedNode {
        encode(value, &mut MemoizationMap::new(), None).unwrap()
    }

    #[test]
    fn scalars_are_textual() {
        assert_eq!(
            encode_plain(&GraphValue::from(-0.0)).body,
            NodeBody::Number { value: "-0".into() }
        );
        assert_eq!(
            encode_plain(&GraphValue::Bool(true)).body,
            NodeBody::Boolean { value: "true".into() }
        );
        assert_eq!(
            encode_plain(&GraphValue::regexp("a/b", "gi")).body,
            NodeBody::RegExp { value: "/a/b/gi".into() }
        );
    }

    #[test]
    fn repeated_containers_become_references() {
        let shared = GraphValue::array(vec![]);
        let root: GraphValue = [("x", shared.clone()), ("y", shared)].into_iter().collect();

        let mut memo = MemoizationMap::new();
        let node = encode(&root, &mut memo, None).unwrap();
        let NodeBody::Object { value } = node.body else {
            panic!("expected object");
        };
        assert_eq!(value["x"].body, NodeBody::Array { value: vec![] });
        assert_eq!(value["y"].body, NodeBody::Reference { index: 1 });
        assert_eq!(memo.len(), 2);
    }

    #[test]
    fn equal_but_distinct_containers_are_not_merged() {
        let root = GraphValue::array(vec![GraphValue::array(vec![]), GraphValue::array(vec![])]);
        let node = encode_plain(&root);
        let NodeBody::Array { value } = node.body else {
            panic!("expected array");
        };
        assert!(value.iter().all(|n| matches!(n.body, NodeBody::Array { .. })));
    }

    #[test]
    fn typed_arrays_are_memoized() {
        let bytes = GraphValue::typed_array(TypedArray::Uint8(vec![1, 2]));
        let node = encode_plain(&GraphValue::array(vec![bytes.clone(), bytes]));
        let NodeBody::Array { value } = node.body else {
            panic!("expected array");
        };
        assert_eq!(value[0].body.as_typed().unwrap().1.value, ["1", "2"]);
        assert_eq!(value[1].body, NodeBody::Reference { index: 1 });
    }

    #[test]
    fn closures_are_rejected() {
        let f = Function::closure("spin", |_| GraphValue::Null);
        let err = encode(&GraphValue::array(vec![f.into()]), &mut MemoizationMap::new(), None)
            .unwrap_err();
        assert!(matches!(err, GraphError::UnsupportedFunction(name) if name == "spin"));
    }

    #[test]
    fn builtins_travel_by_name() {
        let node = encode_plain(&Function::builtin("Math.floor").unwrap().into());
        assert_eq!(node.body, NodeBody::Function { value: "Math.floor".into() });
    }

    #[test]
    fn scalar_substitutes_are_not_memoized() {
        let original = GraphValue::array(vec![GraphValue::from(1.0)]);
        let mut transform = |value: &GraphValue| {
            value.as_array().map(|_| Substitution {
                value: GraphValue::from("stand-in"),
                custom_type: Some("tag".into()),
            })
        };
        let root = GraphValue::set(vec![original.clone(), original]);
        let node = encode(&root, &mut MemoizationMap::new(), Some(&mut transform)).unwrap();

        let NodeBody::Set { value } = node.body else {
            panic!("expected set");
        };
        assert_eq!(value[0].body, NodeBody::String { value: "stand-in".into() });
        assert_eq!(value[0].custom_type.as_deref(), Some("tag"));
        // The stand-in is a scalar, so each visit emits it again
        assert_eq!(value[1].body, NodeBody::String { value: "stand-in".into() });
    }

    #[test]
    fn substituted_containers_reference_by_original() {
        let resource = GraphValue::array(vec![]);
        let target = resource.clone();
        let mut transform = move |value: &GraphValue| {
            value.same(&target).then(|| Substitution {
                value: [("name", GraphValue::from("hero"))].into_iter().collect(),
                custom_type: Some("sprite".into()),
            })
        };
        let root = GraphValue::array(vec![resource.clone(), resource]);
        let node = encode(&root, &mut MemoizationMap::new(), Some(&mut transform)).unwrap();

        let NodeBody::Array { value } = node.body else {
            panic!("expected array");
        };
        assert!(matches!(value[0].body, NodeBody::Object { .. }));
        assert_eq!(value[1].body, NodeBody::Reference { index: 1 });
        assert_eq!(value[1].custom_type.as_deref(), Some("sprite"));
    }
}

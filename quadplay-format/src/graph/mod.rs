//! Graph serialization.
//!
//! Encodes a [`GraphValue`] graph as a tree of [`EncodedNode`]s. Containers
//! seen a second time are written as `reference` nodes pointing at the
//! pre-order index of their first emission, so shared substructure and cycles
//! survive a round trip.
//!
//! ```
//! use quadplay_format::{deserialize, serialize, GraphValue};
//!
//! let shared = GraphValue::array(vec![GraphValue::from(1.0)]);
//! let root = GraphValue::array(vec![shared.clone(), shared]);
//!
//! let text = serialize(&root, None).unwrap();
//! let decoded = deserialize(&text, None).unwrap();
//!
//! let items = decoded.as_array().unwrap().borrow().clone();
//! assert!(items[0].same(&items[1]));
//! ```

mod decode;
mod encode;
mod error;
mod function;
mod handles;
mod node;
mod value;

pub use decode::{decode, DecodeMemory, Untransform};
pub use encode::{encode, MemoizationMap, Substitution, Transform};
pub use error::GraphError;
pub use function::{Builtin, BuiltinRegistry, Function};
pub use handles::HandleRegistry;
pub use node::{EncodedNode, MapEntries, NodeBody, TypedPayload};
pub use value::{GraphValue, Shared, TypedArray};

/// Encodes `value` and prints the result as compact JSON.
pub fn serialize(value: &GraphValue, transform: Option<&mut dyn Transform>) -> Result<String, GraphError> {
    let node = encode(value, &mut MemoizationMap::new(), transform)?;
    Ok(serde_json::to_string(&node)?)
}

/// Parses JSON text produced by [`serialize`] and decodes it.
pub fn deserialize(text: &str, untransform: Option<&mut dyn Untransform>) -> Result<GraphValue, GraphError> {
    let node: EncodedNode = serde_json::from_str(text)?;
    decode(&node, &mut DecodeMemory::new(), untransform)
}

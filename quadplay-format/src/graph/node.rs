use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One node of the wire format.
///
/// Serialized as a JSON object whose `type` member names the kind, e.g.
/// `{"type":"number","value":"-0"}` or `{"type":"reference","index":0}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedNode {
    #[serde(flatten)]
    pub body: NodeBody,
    /// Tag chosen by the transform hook, handed back to the untransform hook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_type: Option<String>,
}

impl EncodedNode {
    pub fn new(body: NodeBody) -> Self {
        EncodedNode {
            body,
            custom_type: None,
        }
    }
}

/// Keys and values of a `Map`, in entry order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEntries {
    pub key: Vec<EncodedNode>,
    pub value: Vec<EncodedNode>,
}

/// Elements of a typed array, as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arraytype: Option<String>,
    pub value: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeBody {
    #[serde(rename = "undefined")]
    Undefined,
    #[serde(rename = "null")]
    Null,
    #[serde(rename = "boolean")]
    Boolean { value: String },
    #[serde(rename = "string")]
    String { value: String },
    #[serde(rename = "number")]
    Number { value: String },
    #[serde(rename = "bigint")]
    BigInt { value: String },
    #[serde(rename = "symbol")]
    Symbol { value: String },
    Array { value: Vec<EncodedNode> },
    #[serde(rename = "object")]
    Object { value: IndexMap<String, EncodedNode> },
    Set { value: Vec<EncodedNode> },
    Map { value: MapEntries },
    Date { value: String },
    #[serde(rename = "URL")]
    Url { value: String },
    RegExp { value: String },
    Uint32Array(TypedPayload),
    Int32Array(TypedPayload),
    Uint16Array(TypedPayload),
    Int16Array(TypedPayload),
    Uint8Array(TypedPayload),
    Uint8ClampedArray(TypedPayload),
    Int8Array(TypedPayload),
    Float64Array(TypedPayload),
    Float32Array(TypedPayload),
    BigUint64Array(TypedPayload),
    BigInt64Array(TypedPayload),
    #[serde(rename = "function")]
    Function { value: String },
    #[serde(rename = "reference")]
    Reference { index: usize },
}

impl NodeBody {
    /// Typed array body for the array kind named `name`.
    pub(crate) fn typed(name: &str, payload: TypedPayload) -> Option<NodeBody> {
        Some(match name {
            "Uint32Array" => NodeBody::Uint32Array(payload),
            "Int32Array" => NodeBody::Int32Array(payload),
            "Uint16Array" => NodeBody::Uint16Array(payload),
            "Int16Array" => NodeBody::Int16Array(payload),
            "Uint8Array" => NodeBody::Uint8Array(payload),
            "Uint8ClampedArray" => NodeBody::Uint8ClampedArray(payload),
            "Int8Array" => NodeBody::Int8Array(payload),
            "Float64Array" => NodeBody::Float64Array(payload),
            "Float32Array" => NodeBody::Float32Array(payload),
            "BigUint64Array" => NodeBody::BigUint64Array(payload),
            "BigInt64Array" => NodeBody::BigInt64Array(payload),
            _ => return None,
        })
    }

    /// Array kind name and payload, if this is a typed array body.
    pub(crate) fn as_typed(&self) -> Option<(&'static str, &TypedPayload)> {
        Some(match self {
            NodeBody::Uint32Array(p) => ("Uint32Array", p),
            NodeBody::Int32Array(p) => ("Int32Array", p),
            NodeBody::Uint16Array(p) => ("Uint16Array", p),
            NodeBody::Int16Array(p) => ("Int16Array", p),
            NodeBody::Uint8Array(p) => ("Uint8Array", p),
            NodeBody::Uint8ClampedArray(p) => ("Uint8ClampedArray", p),
            NodeBody::Int8Array(p) => ("Int8Array", p),
            NodeBody::Float64Array(p) => ("Float64Array", p),
            NodeBody::Float32Array(p) => ("Float32Array", p),
            NodeBody::BigUint64Array(p) => ("BigUint64Array", p),
            NodeBody::BigInt64Array(p) => ("BigInt64Array", p),
            _ => return None,
        })
    }
}

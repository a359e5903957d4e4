//! Text formats used by the quadplay console.
//!
//! Two independent pieces live here:
//! - **Dialects**: BetterJSON and WorkJSON, relaxed JSON supersets that are
//!   rewritten into strict JSON and handed to `serde_json`
//! - **Graph serialization**: a tagged JSON encoding of arbitrary value graphs
//!   that keeps shared and cyclic references intact
//!
//! # Example
//!
//! ```
//! use quadplay_format::{Dialect, Value};
//!
//! let text = "{ width: 0x40, scale: .5, // half size\n name: `hero`, }";
//! let value = Dialect::Work.parse(text).unwrap();
//!
//! assert_eq!(value["width"], Value::Number(64.0));
//! assert_eq!(value["scale"], Value::Number(0.5));
//! assert_eq!(Dialect::Work.stringify(&value, None).unwrap(),
//!            r#"{"width":64,"scale":0.5,"name":"hero"}"#);
//! ```
//!
//! # Reserved code points
//!
//! Parsing borrows the Unicode private use area (U+E000..U+F8FF and plane 15)
//! for placeholders. Input that already contains those code points is not
//! supported.

mod dialect;
mod error;
pub mod graph;
mod protect;
mod strict;
mod value;

pub use dialect::Dialect;
pub use error::DialectError;
pub use graph::{
    decode, deserialize, encode, serialize, DecodeMemory, EncodedNode, Function, GraphError,
    GraphValue, HandleRegistry, MemoizationMap, Substitution, Transform, TypedArray,
    Untransform,
};
pub use protect::{protect, protect_into, unprotect, Protected, ProtectionMap};
pub use strict::{parse_strict, to_strict_text, Replacer, Reviver, Sentinels};
pub use value::Value;

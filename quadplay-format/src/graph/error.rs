use thiserror::Error;

/// Error type for graph encoding and decoding.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Only registered builtins can be encoded.
    #[error("cannot serialize function {0}")]
    UnsupportedFunction(String),
    #[error("unknown builtin function {0}")]
    UnknownBuiltin(String),
    /// A `reference` node pointed past the nodes decoded so far.
    #[error("reference to node {index} but only {len} nodes decoded")]
    DanglingReference { index: usize, len: usize },
    #[error("malformed node: {0}")]
    Malformed(String),
    /// The graph has a cycle and the target format has no way to express it.
    #[error("cyclic value cannot be converted to a document")]
    Cycle,
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("untransform failed: {0}")]
    Untransform(String),
}

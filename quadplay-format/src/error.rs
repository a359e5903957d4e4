use thiserror::Error;

/// Error type for dialect parsing and printing.
#[derive(Debug, Error)]
pub enum DialectError {
    /// The rewritten text was rejected by the strict JSON parser.
    #[error("syntax error: {0}")]
    Syntax(#[source] serde_json::Error),
    /// More string literals than there are placeholder code points.
    #[error("too many string literals to protect ({0})")]
    TooManyStrings(usize),
    /// A non-finite number reached a context that only accepts strict JSON.
    #[error("non-finite number {0} has no strict JSON form")]
    NonFinite(f64),
    #[error("failed to write JSON: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DialectError {
    /// One-based line of a syntax error, if known.
    pub fn line(&self) -> Option<usize> {
        match self {
            DialectError::Syntax(e) => Some(e.line()),
            _ => None,
        }
    }

    /// One-based column of a syntax error, if known.
    pub fn column(&self) -> Option<usize> {
        match self {
            DialectError::Syntax(e) => Some(e.column()),
            _ => None,
        }
    }
}

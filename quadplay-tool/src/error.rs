use quadplay_format::{DialectError, GraphError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QpError {
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{path}{}: {source}", position(.source))]
    Parse { path: String, source: DialectError },

    #[error("{0}")]
    Dialect(#[from] DialectError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cannot rewrite standard input in place")]
    InPlaceStdin,

    #[error("Unknown dialect: {0}")]
    UnknownDialect(String),
}

fn position(err: &DialectError) -> String {
    match (err.line(), err.column()) {
        (Some(line), Some(column)) => format!(":{line}:{column}"),
        (Some(line), None) => format!(":{line}"),
        _ => String::new(),
    }
}

use std::io::Read;
use std::path::Path;

use quadplay_format::{Dialect, GraphValue, deserialize, serialize};
use serde::Serialize;
use tracing::debug;

use crate::error::QpError;

/// Reads a file, or standard input for `-`.
pub fn read_input(path: &Path) -> Result<String, QpError> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        Ok(text)
    } else {
        Ok(std::fs::read_to_string(path)?)
    }
}

/// Dialect document to strict JSON. Fails on values strict JSON cannot
/// hold.
pub fn normalize(text: &str, dialect: Dialect, indent: Option<usize>) -> Result<String, QpError> {
    let json = dialect.parse(text)?.to_json()?;
    match indent {
        None | Some(0) => Ok(serde_json::to_string(&json)?),
        Some(n) => {
            let pad = " ".repeat(n.min(10));
            let mut out = Vec::new();
            let formatter = serde_json::ser::PrettyFormatter::with_indent(pad.as_bytes());
            let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
            json.serialize(&mut serializer)?;
            Ok(String::from_utf8_lossy(&out).into_owned())
        }
    }
}

/// Re-prints a document in its own dialect.
pub fn format(text: &str, dialect: Dialect, indent: Option<usize>, sort_keys: bool) -> Result<String, QpError> {
    let mut value = dialect.parse(text)?;
    if sort_keys {
        value.sort_keys();
    }
    Ok(dialect.stringify(&value, indent)?)
}

pub fn check(path: &Path, dialect: Dialect) -> Result<(), QpError> {
    let text = read_input(path)?;
    dialect.parse(&text).map_err(|source| QpError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    debug!(path = %path.display(), "ok");
    Ok(())
}

/// Dialect document to the graph wire format.
pub fn pack(text: &str, dialect: Dialect) -> Result<String, QpError> {
    let value = dialect.parse(text)?;
    Ok(serialize(&GraphValue::from(value), None)?)
}

/// Graph wire format back to a dialect document.
pub fn unpack(text: &str, dialect: Dialect, indent: Option<usize>) -> Result<String, QpError> {
    let value = deserialize(text, None)?.to_value()?;
    Ok(dialect.stringify(&value, indent)?)
}

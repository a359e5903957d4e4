//! Hiding string literals from the dialect rewrites.
//!
//! Every `"..."` literal is swapped for a single private-use placeholder so
//! that the regex passes in [`crate::Dialect`] cannot match inside string
//! payloads. The raw literal contents are kept in a [`ProtectionMap`] and put
//! back by [`unprotect`].

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::DialectError;

/// Stands in for an escaped double quote (`\"`) while strings are protected.
pub(crate) const DOUBLE_QUOTE_PROTECTION: char = '\u{E000}';
const ESCAPED_ESCAPE: char = '\u{E009}';

// Placeholder ranges: the rest of the BMP private use area, then plane 15.
const BLOCK_START: u32 = 0xE010;
const BLOCK_END: u32 = 0xF8FF;
const PLANE_START: u32 = 0xF0000;
const PLANE_END: u32 = 0xFFFFD;
const BLOCK_LEN: usize = (BLOCK_END - BLOCK_START + 1) as usize;
const CAPACITY: usize = BLOCK_LEN + (PLANE_END - PLANE_START + 1) as usize;

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""((?:[^"\\]|\\.)*)""#).expect("static regex"));

/// Original string literal contents, indexed by placeholder number.
///
/// The Nth placeholder in protected text always refers to the Nth entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectionMap {
    entries: Vec<String>,
}

impl ProtectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw contents of the literal behind placeholder `i`, escapes intact.
    pub fn get(&self, i: usize) -> Option<&str> {
        self.entries.get(i).map(String::as_str)
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    fn push(&mut self, content: &str) -> Result<char, DialectError> {
        let i = self.entries.len();
        let c = placeholder(i).ok_or(DialectError::TooManyStrings(i + 1))?;
        self.entries.push(content.to_string());
        Ok(c)
    }
}

/// Protected text together with the map needed to restore it.
#[derive(Debug, Clone)]
pub struct Protected {
    pub text: String,
    pub map: ProtectionMap,
}

fn placeholder(i: usize) -> Option<char> {
    if i >= CAPACITY {
        return None;
    }
    let code = if i < BLOCK_LEN {
        BLOCK_START + i as u32
    } else {
        PLANE_START + (i - BLOCK_LEN) as u32
    };
    char::from_u32(code)
}

fn placeholder_index(c: char) -> Option<usize> {
    let code = c as u32;
    if (BLOCK_START..=BLOCK_END).contains(&code) {
        Some((code - BLOCK_START) as usize)
    } else if (PLANE_START..=PLANE_END).contains(&code) {
        Some(BLOCK_LEN + (code - PLANE_START) as usize)
    } else {
        None
    }
}

/// Protects every string literal in `src` with a fresh map.
pub fn protect(src: &str) -> Result<Protected, DialectError> {
    let mut map = ProtectionMap::new();
    let text = protect_into(src, &mut map)?;
    Ok(Protected { text, map })
}

/// Protects every string literal in `src`, appending to an existing map.
pub fn protect_into(src: &str, map: &mut ProtectionMap) -> Result<String, DialectError> {
    // `\\` must not be read as the start of `\"`
    let src = src
        .replace("\\\\", &ESCAPED_ESCAPE.to_string())
        .replace("\\\"", &DOUBLE_QUOTE_PROTECTION.to_string())
        .replace(ESCAPED_ESCAPE, "\\\\");

    let mut failure = None;
    let text = QUOTED.replace_all(&src, |caps: &Captures| match map.push(&caps[1]) {
        Ok(c) => format!("\"{c}\""),
        Err(e) => {
            failure.get_or_insert(e);
            String::new()
        }
    });

    match failure {
        Some(e) => Err(e),
        None => Ok(text.into_owned()),
    }
}

/// Restores the literals hidden by [`protect`].
pub fn unprotect(text: &str, map: &ProtectionMap) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match placeholder_index(c).and_then(|i| map.get(i)) {
            Some(content) => out.push_str(content),
            None => out.push(c),
        }
    }
    out.replace(DOUBLE_QUOTE_PROTECTION, "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(src: &str) {
        let protected = protect(src).unwrap();
        assert_eq!(unprotect(&protected.text, &protected.map), src);
    }

    #[test]
    fn replaces_each_literal_with_one_placeholder() {
        let protected = protect(r#"{"a": "b c", "d": 1}"#).unwrap();
        assert_eq!(protected.text, "{\"\u{E010}\": \"\u{E011}\", \"\u{E012}\": 1}");
        assert_eq!(protected.map.entries(), ["a", "b c", "d"]);
    }

    #[test]
    fn keeps_escapes_in_map_entries() {
        let protected = protect(r#"["say \"hi\"", "tab\there"]"#).unwrap();
        assert_eq!(protected.map.len(), 2);
        assert_eq!(protected.map.get(1), Some(r"tab\there"));
        round_trip(r#"["say \"hi\"", "tab\there"]"#);
    }

    #[test]
    fn escaped_backslash_before_closing_quote() {
        let src = r#"["dir\\", "next"]"#;
        let protected = protect(src).unwrap();
        assert_eq!(protected.map.entries(), [r"dir\\", "next"]);
        round_trip(src);
    }

    #[test]
    fn escaped_backslash_then_escaped_quote() {
        round_trip(r#"{"k": "a\\\"b"}"#);
    }

    #[test]
    fn comment_like_text_inside_strings_is_hidden() {
        let protected = protect(r#"{"url": "http://x/*y*/"}"#).unwrap();
        assert!(!protected.text.contains("//"));
        assert!(!protected.text.contains("/*"));
    }

    #[test]
    fn protect_into_extends_numbering() {
        let mut map = ProtectionMap::new();
        protect_into(r#""one""#, &mut map).unwrap();
        let text = protect_into(r#""two""#, &mut map).unwrap();
        assert_eq!(text, "\"\u{E011}\"");
        assert_eq!(map.entries(), ["one", "two"]);
    }

    #[test]
    fn overflows_into_plane_fifteen() {
        let src: String = (0..BLOCK_LEN + 2).map(|i| format!("\"{i}\",")).collect();
        let protected = protect(&src).unwrap();
        assert!(protected.text.contains('\u{F0000}'));
        assert!(protected.text.contains('\u{F0001}'));
        assert_eq!(unprotect(&protected.text, &protected.map), src);
    }

    #[test]
    fn text_without_strings_is_unchanged() {
        round_trip("[1, 2, {}]");
        round_trip("");
    }
}

use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::{debug, instrument};

use crate::error::DialectError;
use crate::protect::{protect, protect_into, unprotect};
use crate::strict::{parse_strict, to_strict_text, Replacer, Reviver, Sentinels};
use crate::value::Value;

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static regex")
}

static EMPTY_BACKTICKS: LazyLock<Regex> = LazyLock::new(|| re(r"(^|[^\\])``"));
static BACKTICK_STRING: LazyLock<Regex> = LazyLock::new(|| re(r"(?s)`(.*?[^\\])`"));
static BLOCK_COMMENT: LazyLock<Regex> = LazyLock::new(|| re(r"(?s)/\*.*?\*/"));
static LINE_COMMENT: LazyLock<Regex> = LazyLock::new(|| re(r"//[^\n]*"));
static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| re(r",(\s*[\]})])"));
static PLUS_SIGN: LazyLock<Regex> = LazyLock::new(|| re(r"([\[:\s,])\+\s*(\.?\d)"));
static HEX: LazyLock<Regex> = LazyLock::new(|| re(r"0x([\da-fA-F]+)"));
static LEADING_DOT: LazyLock<Regex> = LazyLock::new(|| re(r"([\[:\s,-])\.(\d)"));
static TRAILING_DOT: LazyLock<Regex> = LazyLock::new(|| re(r"(\d)\.([\]}\s,])"));
static NAN: LazyLock<Regex> = LazyLock::new(|| re(r"\bNaN\b(\s*:)?"));
static NEG_INFINITY: LazyLock<Regex> = LazyLock::new(|| re(r"-\s*Infinity\b"));
static INFINITY: LazyLock<Regex> = LazyLock::new(|| re(r"\bInfinity\b(\s*:)?"));
static UNDEFINED: LazyLock<Regex> = LazyLock::new(|| re(r"\bundefined\b(\s*:)?"));
static BARE_KEY: LazyLock<Regex> = LazyLock::new(|| re(r"\b([A-Za-z_][A-Za-z_0-9]*)(\s*:)"));

/// The relaxed JSON dialects.
///
/// Both accept comments, trailing commas, backtick strings (which may span
/// lines), hex integers, `+` signs, bare leading or trailing decimal points
/// and the IEEE constants `NaN`, `Infinity` and `-Infinity`. WorkJSON also
/// accepts unquoted keys and `undefined`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// BetterJSON.
    Better,
    /// WorkJSON.
    Work,
}

impl Dialect {
    fn sentinels(self) -> Sentinels {
        match self {
            Dialect::Better => Sentinels::IEEE,
            Dialect::Work => Sentinels::IEEE_AND_UNDEFINED,
        }
    }

    /// Rewrites dialect text into strict JSON.
    ///
    /// Values strict JSON cannot spell are left as sentinel strings that only
    /// [`parse_strict`] with this dialect's sentinels understands.
    pub fn normalize(self, text: &str) -> Result<String, DialectError> {
        // Padding lets `\b` and the delimiter classes match at both ends
        let text = format!(" {text} ");

        let mut protected = protect(&text)?;
        let text = protected.text.replace("\r\n", "\n").replace('\r', "\n");

        let text = EMPTY_BACKTICKS.replace_all(&text, r#"${1}"""#);
        let text = BACKTICK_STRING.replace_all(&text, |caps: &Captures| {
            let inside = caps[1]
                .replace('\n', "\\n")
                .replace("\\`", "`")
                .replace('"', "\\\"");
            format!("\"{inside}\"")
        });

        // The converted backtick strings need protecting too
        let restored = unprotect(&text, &protected.map);
        protected.map = Default::default();
        let text = protect_into(&restored, &mut protected.map)?;

        let text = BLOCK_COMMENT.replace_all(&text, |caps: &Captures| {
            caps[0].chars().filter(|&c| c == '\n').collect::<String>()
        });
        let text = LINE_COMMENT.replace_all(&text, "");

        let text = TRAILING_COMMA.replace_all(&text, "$1");
        let text = PLUS_SIGN.replace_all(&text, "$1$2");
        let text = HEX.replace_all(&text, |caps: &Captures| {
            // Literals wider than 32 bits stay as written so the strict parse rejects them
            u32::from_str_radix(&caps[1], 16)
                .map(|n| n.to_string())
                .unwrap_or_else(|_| caps[0].to_string())
        });
        let text = LEADING_DOT.replace_all(&text, "${1}0.$2");
        let text = TRAILING_DOT.replace_all(&text, "$1$2");

        let text = replace_token(&NAN, &text, &Sentinels::quoted_nan());
        let text = NEG_INFINITY.replace_all(&text, Sentinels::quoted_neg_infinity().as_str());
        let text = replace_token(&INFINITY, &text, &Sentinels::quoted_infinity());

        let text = match self {
            Dialect::Better => text.into_owned(),
            Dialect::Work => {
                let text = replace_token(&UNDEFINED, &text, &Sentinels::quoted_undefined());
                BARE_KEY.replace_all(&text, "\"$1\"$2").into_owned()
            }
        };

        Ok(unprotect(&text, &protected.map))
    }

    /// Parses dialect text.
    pub fn parse(self, text: &str) -> Result<Value, DialectError> {
        parse_strict(&self.normalize(text)?, self.sentinels(), None)
    }

    /// Parses dialect text, passing every value through `reviver`.
    pub fn parse_with(self, text: &str, reviver: &mut dyn Reviver) -> Result<Value, DialectError> {
        parse_strict(&self.normalize(text)?, self.sentinels(), Some(reviver))
    }

    /// Prints `value`; `indent` is the number of spaces per level, `None`
    /// for compact output.
    pub fn stringify(self, value: &Value, indent: Option<usize>) -> Result<String, DialectError> {
        to_strict_text(value, self.sentinels(), None, indent)
    }

    pub fn stringify_with(
        self,
        value: &Value,
        replacer: &mut dyn Replacer,
        indent: Option<usize>,
    ) -> Result<String, DialectError> {
        to_strict_text(value, self.sentinels(), Some(replacer), indent)
    }

    #[instrument(skip(self), fields(dialect = ?self))]
    pub fn load(self, path: &Path) -> Result<Value, DialectError> {
        let text = std::fs::read_to_string(path)?;
        debug!(bytes = text.len(), "read document");
        self.parse(&text)
    }

    #[instrument(skip(self, value), fields(dialect = ?self))]
    pub fn dump(self, path: &Path, value: &Value, indent: Option<usize>) -> Result<(), DialectError> {
        let text = self.stringify(value, indent)?;
        std::fs::write(path, &text)?;
        debug!(bytes = text.len(), "wrote document");
        Ok(())
    }
}

/// Replaces a bare token with its sentinel unless it is used as a key.
fn replace_token<'t>(pattern: &Regex, text: &'t str, sentinel: &str) -> std::borrow::Cow<'t, str> {
    pattern.replace_all(text, |caps: &Captures| {
        if caps.get(1).is_some() {
            caps[0].to_string()
        } else {
            sentinel.to_string()
        }
    })
}

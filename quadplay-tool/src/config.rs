use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use quadplay_format::Dialect;
use serde::Deserialize;
use tracing::warn;

use crate::error::QpError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectChoice {
    Better,
    #[default]
    Work,
}

impl FromStr for DialectChoice {
    type Err = QpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "better" | "betterjson" => Ok(DialectChoice::Better),
            "work" | "workjson" => Ok(DialectChoice::Work),
            _ => Err(QpError::UnknownDialect(s.to_string())),
        }
    }
}

impl fmt::Display for DialectChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialectChoice::Better => write!(f, "better"),
            DialectChoice::Work => write!(f, "work"),
        }
    }
}

impl From<DialectChoice> for Dialect {
    fn from(choice: DialectChoice) -> Self {
        match choice {
            DialectChoice::Better => Dialect::Better,
            DialectChoice::Work => Dialect::Work,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dialect: DialectChoice,
    pub indent: Option<usize>,
}

impl Config {
    pub fn parse(text: &str) -> Result<Self, QpError> {
        Ok(toml::from_str(text)?)
    }
}

fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("quadplay").join("config.toml"))
}

pub fn load_config() -> Config {
    let Some(path) = config_path() else {
        return Config::default();
    };

    let Ok(content) = std::fs::read_to_string(&path) else {
        return Config::default();
    };

    Config::parse(&content).unwrap_or_else(|err| {
        warn!(path = %path.display(), %err, "ignoring unreadable config");
        Config::default()
    })
}

/// Command-line flags win over the config file.
pub fn resolve(config: &Config, cli_dialect: Option<DialectChoice>, cli_indent: Option<usize>) -> (Dialect, Option<usize>) {
    let dialect = cli_dialect.unwrap_or(config.dialect);
    let indent = cli_indent.or(config.indent);
    (dialect.into(), indent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config() {
        let config = Config::parse("dialect = \"better\"\nindent = 4\n").unwrap();
        assert_eq!(config.dialect, DialectChoice::Better);
        assert_eq!(config.indent, Some(4));

        let empty = Config::parse("").unwrap();
        assert_eq!(empty.dialect, DialectChoice::Work);
        assert_eq!(empty.indent, None);

        assert!(matches!(Config::parse("dialect = \"yaml\""), Err(QpError::Config(_))));
    }

    #[test]
    fn flags_override_config() {
        let config = Config {
            dialect: DialectChoice::Better,
            indent: Some(2),
        };
        assert_eq!(resolve(&config, None, None), (Dialect::Better, Some(2)));
        assert_eq!(resolve(&config, Some(DialectChoice::Work), Some(0)), (Dialect::Work, Some(0)));
    }

    #[test]
    fn dialect_names() {
        assert_eq!("WorkJSON".parse::<DialectChoice>().unwrap(), DialectChoice::Work);
        assert_eq!("better".parse::<DialectChoice>().unwrap(), DialectChoice::Better);
        assert!("yaml".parse::<DialectChoice>().is_err());
        assert_eq!(DialectChoice::Better.to_string(), "better");
    }
}

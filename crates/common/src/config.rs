use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{FxqError, Result};

/// SQL dialect handed to the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    /// T-SQL (`TOP`, `WITH (NOLOCK)`, bracketed identifiers).
    #[default]
    MsSql,
    /// ANSI-ish generic dialect (`LIMIT`).
    Generic,
}

/// Knobs for a single compiler instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub dialect: SqlDialect,
    /// When false, double-quoted names in comparisons are string literals.
    pub quoted_identifiers: bool,
    pub optimize_plans: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            dialect: SqlDialect::MsSql,
            quoted_identifiers: true,
            optimize_plans: true,
        }
    }
}

impl CompilerConfig {
    /// Load configuration from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns [`FxqError::Io`] when the file cannot be read and
    /// [`FxqError::InvalidConfig`] when its content is not a valid config object.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            FxqError::InvalidConfig(format!("config file '{}': {e}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: CompilerConfig =
            serde_json::from_str(r#"{"dialect":"generic"}"#).expect("config");
        assert_eq!(cfg.dialect, SqlDialect::Generic);
        assert!(cfg.quoted_identifiers);
        assert!(cfg.optimize_plans);
    }

    #[test]
    fn unknown_dialect_is_rejected() {
        let err = serde_json::from_str::<CompilerConfig>(r#"{"dialect":"oracle"}"#)
            .expect_err("unknown dialect");
        assert!(err.to_string().contains("oracle"));
    }
}

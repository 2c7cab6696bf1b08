use std::fmt::Display;

use thiserror::Error;

/// Canonical fxq error taxonomy used across crates.
///
/// Classification guidance:
/// - [`FxqError::Parse`]: the SQL text could not be parsed; surfaced unchanged from the parser
/// - [`FxqError::Unsupported`]: valid SQL whose shape, clause or operator combination the
///   lowering/planning logic does not translate
/// - [`FxqError::Semantic`]: structurally valid SQL that references something invalid
///   (unknown table/column/attribute, ambiguous name, conversion failure, CTE rule violation)
/// - [`FxqError::Execution`]: evaluation-time guards in the expression engine
/// - [`FxqError::InvalidConfig`]: configuration/catalog contract violations
/// - [`FxqError::Io`] / [`FxqError::Json`]: raw std IO and JSON decoding failures
///
/// Every compile failure is atomic: a statement either compiles completely or
/// yields exactly one of these errors.
#[derive(Debug, Error)]
pub enum FxqError {
    /// Parser rejected the input text.
    #[error("parse error: {0}")]
    Parse(String),

    /// Construct outside the translatable SQL subset.
    ///
    /// Examples:
    /// - `TOP 10 PERCENT`
    /// - non-equality join predicates
    /// - `OFFSET` that is not a multiple of the fetch size
    #[error("unsupported: {message}: {fragment}")]
    Unsupported {
        /// Human readable construct name / reason.
        message: String,
        /// Canonical SQL text of the offending fragment.
        fragment: String,
    },

    /// Referentially invalid SQL.
    ///
    /// Examples:
    /// - unknown entity or attribute
    /// - ambiguous unqualified column
    /// - literal that does not convert to the target attribute type
    #[error("semantic error: {message}: {fragment}")]
    Semantic {
        /// Human readable reason.
        message: String,
        /// Canonical SQL text (or name) of the offending fragment.
        fragment: String,
    },

    /// Expression evaluation failures.
    #[error("execution error: {0}")]
    Execution(String),

    /// Invalid or inconsistent configuration/catalog state.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decode failures for catalogs and configuration files.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FxqError {
    /// Builds an [`FxqError::Unsupported`] for `fragment`.
    pub fn unsupported(message: impl Into<String>, fragment: impl Display) -> Self {
        Self::Unsupported {
            message: message.into(),
            fragment: fragment.to_string(),
        }
    }

    /// Builds an [`FxqError::Semantic`] for `fragment`.
    pub fn semantic(message: impl Into<String>, fragment: impl Display) -> Self {
        Self::Semantic {
            message: message.into(),
            fragment: fragment.to_string(),
        }
    }

    /// Offending source fragment, when the error carries one.
    pub fn fragment(&self) -> Option<&str> {
        match self {
            Self::Unsupported { fragment, .. } | Self::Semantic { fragment, .. } => Some(fragment),
            _ => None,
        }
    }
}

/// Standard fxq result alias.
pub type Result<T> = std::result::Result<T, FxqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_carries_fragment() {
        let err = FxqError::unsupported("Unhandled TOP clause", "TOP 10 PERCENT");
        assert_eq!(err.fragment(), Some("TOP 10 PERCENT"));
        assert_eq!(
            err.to_string(),
            "unsupported: Unhandled TOP clause: TOP 10 PERCENT"
        );
    }

    #[test]
    fn io_errors_have_no_fragment() {
        let err = FxqError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(err.fragment().is_none());
        assert!(err.to_string().contains("gone"));
    }
}

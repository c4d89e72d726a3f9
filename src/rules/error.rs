use crate::data::accessor::AccessorError;

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Unknown rule kind: {0}")]
    UnknownRuleKind(String),

    #[error("Malformed arguments for {kind}: {reason}")]
    MalformedArguments { kind: String, reason: String },

    #[error("Type mismatch: expected {expected}, got {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Ambiguous resolution: {0} top-level value rules without a combinator")]
    AmbiguousResolution(usize),

    #[error("Accessor failure: {0}")]
    AccessorFailure(#[from] AccessorError),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid market: {0}")]
    InvalidMarket(String),
}

impl RuleError {
    pub fn malformed(kind: &str, reason: impl Into<String>) -> Self {
        RuleError::MalformedArguments {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }

    pub fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        RuleError::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

//! Error types for parsing and evaluating domain expressions.

use crate::span::{offset_to_line_col, Span};
use crate::value::{RecordId, ValueKind};
use thiserror::Error;

/// A domain expression could not be parsed.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct ParseError {
    /// The error message.
    pub message: String,
    /// Source span where the error occurred.
    pub span: Span,
    /// Optional hint for fixing the error.
    pub hint: Option<String>,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl ParseError {
    /// Create a new parse error.
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            hint: None,
        }
    }

    /// Add a hint to the error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Format the error with source context.
    pub fn format_with_source(&self, source: &str) -> String {
        let (line, col) = offset_to_line_col(source, self.span.start);
        let mut result = format!("error: {}\n", self.message);
        result.push_str(&format!("  --> line {}:{}\n", line, col));

        if let Some(source_line) = source.lines().nth(line - 1) {
            result.push_str(&format!("   |\n{:3}| {}\n   |", line, source_line));

            for _ in 0..col {
                result.push(' ');
            }
            result.push('^');

            let span_len = self.span.len();
            if span_len > 1 {
                let room = (source_line.len() + 1).saturating_sub(col);
                for _ in 1..span_len.min(room) {
                    result.push('~');
                }
            }
            result.push('\n');
        }

        if let Some(hint) = &self.hint {
            result.push_str(&format!("   = hint: {}\n", hint));
        }

        result
    }
}

/// Two values of incompatible semantic types were compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot compare {left} with {right}")]
pub struct TypeMismatch {
    /// Kind of the field value.
    pub left: ValueKind,
    /// Kind of the literal.
    pub right: ValueKind,
}

impl TypeMismatch {
    pub fn new(left: ValueKind, right: ValueKind) -> Self {
        Self { left, right }
    }
}

/// Errors raised by a record provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The record does not exist.
    #[error("record {0} not found")]
    UnknownRecord(RecordId),

    /// The record has no such field.
    #[error("record {record} has no field '{field}'")]
    UnknownField { record: RecordId, field: String },

    /// The field exists but is not a relation.
    #[error("field '{field}' on record {record} is not a relation")]
    NotRelational { record: RecordId, field: String },

    /// Backend-specific failure.
    #[error("record provider failure: {0}")]
    Backend(String),
}

/// Errors raised while evaluating a domain expression against a record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// A field path could not be resolved on the record.
    #[error("unknown field '{path}' on record {record}")]
    UnknownField { path: String, record: RecordId },

    /// A leaf compared values of incompatible types.
    #[error("type mismatch in '{path}' {operator}: {mismatch}")]
    TypeMismatch {
        path: String,
        operator: &'static str,
        mismatch: TypeMismatch,
    },

    /// The record provider failed for a reason other than a missing field.
    #[error(transparent)]
    Provider(ProviderError),
}

impl EvalError {
    /// Lift a provider error raised while resolving `path` on `record`.
    pub fn from_provider(err: ProviderError, path: &str, record: RecordId) -> Self {
        match err {
            ProviderError::UnknownField { .. } | ProviderError::NotRelational { .. } => {
                EvalError::UnknownField {
                    path: path.to_string(),
                    record,
                }
            }
            other => EvalError::Provider(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_formatting() {
        let source = "[('owner', '=~', 42)]";
        let err = ParseError::new("unknown operator '=~'", Span::new(11, 15))
            .with_hint("use one of =, !=, >, >=, <, <=, in, not in, like, ilike, child_of");

        let formatted = err.format_with_source(source);
        assert!(formatted.contains("line 1:12"));
        assert!(formatted.contains("unknown operator '=~'"));
        assert!(formatted.contains("^~~~"));
        assert!(formatted.contains("hint: use one of"));
    }

    #[test]
    fn test_provider_unknown_field_becomes_eval_unknown_field() {
        let err = ProviderError::UnknownField {
            record: RecordId(3),
            field: "phone".into(),
        };
        let lifted = EvalError::from_provider(err, "owner.phone", RecordId(1));
        assert_eq!(
            lifted,
            EvalError::UnknownField {
                path: "owner.phone".into(),
                record: RecordId(1),
            }
        );

        let backend = ProviderError::Backend("connection reset".into());
        assert!(matches!(
            EvalError::from_provider(backend, "owner", RecordId(1)),
            EvalError::Provider(_)
        ));
    }

    #[test]
    fn test_type_mismatch_display() {
        let err = TypeMismatch::new(ValueKind::Int, ValueKind::String);
        assert_eq!(err.to_string(), "cannot compare integer with string");
    }
}

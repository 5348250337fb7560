//! Policy error types.

use rowguard_domain::{EvalError, ParseError, ProviderError, RecordId};
use thiserror::Error;

use crate::operation::Operation;

/// Errors raised while loading policy or enforcing access.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A rule or grant names a model the catalog does not declare.
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    /// A field or field path cannot be resolved on a model.
    #[error("unknown field '{field}' on model '{model}'")]
    UnknownField { model: String, field: String },

    /// A record rule carries a domain that does not parse.
    #[error("malformed domain expression in rule '{rule}': {source}")]
    MalformedDomain {
        rule: String,
        #[source]
        source: ParseError,
    },

    /// A rule row is structurally invalid.
    #[error("malformed rule: {0}")]
    MalformedRule(String),

    /// A comparison between values of incompatible types.
    #[error("type mismatch on '{model}.{field}': {detail}")]
    TypeMismatch {
        model: String,
        field: String,
        detail: String,
    },

    /// A field being written is restricted to groups the principal lacks.
    #[error("write access to '{model}.{field}' denied")]
    FieldWriteDenied { model: String, field: String },

    /// No access rule grants the operation on the model.
    #[error("{operation} access to model '{model}' denied")]
    NoAccess { model: String, operation: Operation },

    /// The record does not pass the record rules for the operation.
    #[error("{operation} access to record {record} of model '{model}' denied by record rules")]
    RowDenied {
        model: String,
        record: RecordId,
        operation: Operation,
    },

    /// The record provider failed.
    #[error("record provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Archive storage error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Archive contents that cannot be decoded.
    #[error("corrupt policy archive: {0}")]
    CorruptArchive(String),

    /// Reading a bundle file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Bundle (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

impl PolicyError {
    /// Lift an evaluation error raised while checking a record of `model`.
    pub fn from_eval(err: EvalError, model: &str) -> Self {
        match err {
            EvalError::UnknownField { path, .. } => PolicyError::UnknownField {
                model: model.to_string(),
                field: path,
            },
            EvalError::TypeMismatch {
                path,
                operator,
                mismatch,
            } => PolicyError::TypeMismatch {
                model: model.to_string(),
                field: path,
                detail: format!("operator '{}': {}", operator, mismatch),
            },
            EvalError::Provider(e) => PolicyError::Provider(e),
        }
    }

    /// Whether this error is an access denial rather than a failure.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            PolicyError::NoAccess { .. }
                | PolicyError::RowDenied { .. }
                | PolicyError::FieldWriteDenied { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowguard_domain::{TypeMismatch, ValueKind};

    #[test]
    fn test_error_display() {
        let err = PolicyError::NoAccess {
            model: "doc".into(),
            operation: Operation::Write,
        };
        assert_eq!(err.to_string(), "write access to model 'doc' denied");

        let err = PolicyError::FieldWriteDenied {
            model: "employee".into(),
            field: "salary".into(),
        };
        assert!(err.to_string().contains("employee.salary"));
        assert!(err.is_denial());
    }

    #[test]
    fn test_from_eval_keeps_model_context() {
        let err = PolicyError::from_eval(
            EvalError::TypeMismatch {
                path: "price".into(),
                operator: ">",
                mismatch: TypeMismatch::new(ValueKind::Float, ValueKind::String),
            },
            "product",
        );
        match err {
            PolicyError::TypeMismatch { model, field, detail } => {
                assert_eq!(model, "product");
                assert_eq!(field, "price");
                assert!(detail.contains("cannot compare float with string"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = PolicyError::from_eval(
            EvalError::UnknownField {
                path: "owner.phone".into(),
                record: RecordId(1),
            },
            "doc",
        );
        assert!(matches!(err, PolicyError::UnknownField { .. }));
        assert!(!err.is_denial());
    }
}

//! Evaluation of domain expressions against a single record.
//!
//! This module provides the [`DomainEvaluator`] that walks a normalized
//! [`DomainExpr`] and resolves leaf field paths through a [`RecordView`].

use std::cmp::Ordering;

use tracing::trace;

use crate::ast::{DomainExpr, Leaf, Operator};
use crate::error::{EvalError, TypeMismatch};
use crate::provider::{RecordView, Resolved};
use crate::value::{RecordId, Value, ValueKind};

/// Evaluates domain expressions against record views.
pub struct DomainEvaluator;

impl DomainEvaluator {
    /// Evaluate an expression against one record.
    ///
    /// `And` stops at the first false operand and `Or` at the first true one.
    /// Resolution and type errors are returned, never folded into `false`.
    pub fn evaluate(expr: &DomainExpr, record: &RecordView<'_>) -> Result<bool, EvalError> {
        match expr {
            DomainExpr::Leaf(leaf) => Self::evaluate_leaf(leaf, record),
            DomainExpr::And(exprs) => {
                for e in exprs {
                    if !Self::evaluate(e, record)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            DomainExpr::Or(exprs) => {
                for e in exprs {
                    if Self::evaluate(e, record)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            DomainExpr::Not(inner) => Ok(!Self::evaluate(inner, record)?),
        }
    }

    fn evaluate_leaf(leaf: &Leaf, record: &RecordView<'_>) -> Result<bool, EvalError> {
        let resolved = record.resolve(&leaf.path)?;
        let (target, field_value) = match resolved {
            Resolved::Field { record, value } => (Some(record), value),
            // An empty relation along the path reads as an absent value.
            Resolved::Broken => (None, Value::Null),
        };

        let mismatch = |m: TypeMismatch| EvalError::TypeMismatch {
            path: leaf.path.to_string(),
            operator: leaf.operator.as_str(),
            mismatch: m,
        };
        let literals = leaf.operand.values();

        let result = match leaf.operator {
            Operator::Eq => Self::any_equal(&field_value, literals).map_err(mismatch)?,
            Operator::Ne => !Self::any_equal(&field_value, literals).map_err(mismatch)?,
            Operator::Gt => Self::ordered(&field_value, literals, Ordering::is_gt).map_err(mismatch)?,
            Operator::Ge => Self::ordered(&field_value, literals, Ordering::is_ge).map_err(mismatch)?,
            Operator::Lt => Self::ordered(&field_value, literals, Ordering::is_lt).map_err(mismatch)?,
            Operator::Le => Self::ordered(&field_value, literals, Ordering::is_le).map_err(mismatch)?,
            Operator::In => Self::any_equal(&field_value, literals).map_err(mismatch)?,
            Operator::NotIn => !Self::any_equal(&field_value, literals).map_err(mismatch)?,
            Operator::Like => Self::contains(&field_value, literals, false).map_err(mismatch)?,
            Operator::Ilike => Self::contains(&field_value, literals, true).map_err(mismatch)?,
            Operator::NotLike => !Self::contains(&field_value, literals, false).map_err(mismatch)?,
            Operator::NotIlike => !Self::contains(&field_value, literals, true).map_err(mismatch)?,
            Operator::ChildOf => Self::child_of(leaf, record, target, &field_value)?,
        };

        trace!(
            record = %record.id(),
            path = %leaf.path,
            operator = leaf.operator.as_str(),
            result,
            "evaluated leaf"
        );
        Ok(result)
    }

    fn any_equal(field_value: &Value, literals: &[Value]) -> Result<bool, TypeMismatch> {
        for literal in literals {
            if field_value.equals(literal)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn ordered(
        field_value: &Value,
        literals: &[Value],
        test: fn(Ordering) -> bool,
    ) -> Result<bool, TypeMismatch> {
        // Scalar operators always carry exactly one literal.
        let Some(literal) = literals.first() else {
            return Ok(false);
        };
        Ok(field_value.compare(literal)?.map(test).unwrap_or(false))
    }

    fn contains(
        field_value: &Value,
        literals: &[Value],
        case_insensitive: bool,
    ) -> Result<bool, TypeMismatch> {
        let Some(literal) = literals.first() else {
            return Ok(false);
        };
        let needle = literal
            .as_str()
            .ok_or_else(|| TypeMismatch::new(field_value.kind(), literal.kind()))?;

        match field_value {
            Value::Null => Ok(false),
            Value::String(haystack) if case_insensitive => {
                Ok(haystack.to_lowercase().contains(&needle.to_lowercase()))
            }
            Value::String(haystack) => Ok(haystack.contains(needle)),
            other => Err(TypeMismatch::new(other.kind(), ValueKind::String)),
        }
    }

    fn child_of(
        leaf: &Leaf,
        record: &RecordView<'_>,
        target: Option<RecordId>,
        field_value: &Value,
    ) -> Result<bool, EvalError> {
        let mismatch = |left: ValueKind, right: ValueKind| EvalError::TypeMismatch {
            path: leaf.path.to_string(),
            operator: leaf.operator.as_str(),
            mismatch: TypeMismatch::new(left, right),
        };

        let mut wanted = Vec::with_capacity(leaf.operand.values().len());
        for literal in leaf.operand.values() {
            let id = literal
                .as_record_id()
                .ok_or_else(|| mismatch(ValueKind::Ref, literal.kind()))?;
            wanted.push(id);
        }

        let (Some(owner), Value::Ref(referenced)) = (target, field_value) else {
            return match field_value {
                Value::Null => Ok(false),
                other => Err(mismatch(other.kind(), ValueKind::Ref)),
            };
        };

        if wanted.contains(referenced) {
            return Ok(true);
        }

        let ancestors = record
            .provider()
            .ancestors_of(owner, leaf.path.last())
            .map_err(|e| EvalError::from_provider(e, &leaf.path.to_string(), record.id()))?;
        Ok(ancestors.iter().any(|id| wanted.contains(id)))
    }
}

/// Evaluate `expr` against one record. Shorthand for [`DomainEvaluator::evaluate`].
pub fn evaluate(expr: &DomainExpr, record: &RecordView<'_>) -> Result<bool, EvalError> {
    DomainEvaluator::evaluate(expr, record)
}

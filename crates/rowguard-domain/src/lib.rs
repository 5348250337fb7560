//! Rowguard Domain Expressions
//!
//! This crate provides the predicate language used by record rules: a
//! parser for Polish-notation domains, a normalizer and serializer for the
//! resulting AST, and an evaluator that resolves field paths through an
//! external record provider.
//!
//! # Syntax
//!
//! ```text
//! [('owner', '=', 42)]
//! [('state', 'in', ['draft', 'open']), ('price', '>', 0)]
//! ['|', ('owner', '=', 42), ('public', '=', True)]
//! ['!', ('company', 'child_of', [1])]
//! [('owner.phone', '!=', '')]
//! [(1, '=', 1)]
//! ```
//!
//! Markers `'&'` and `'|'` take the next two expressions, `'!'` takes one.
//! Top-level expressions not consumed by a marker are joined with AND.
//!
//! # Usage
//!
//! ```rust
//! use rowguard_domain::{parse, evaluate, MemoryRecord, MemoryRecords, RecordId, RecordView};
//!
//! let records = MemoryRecords::new().with(MemoryRecord::new(1).with_field("owner", 42));
//! let domain = parse("[('owner', '=', 42)]").unwrap();
//! let view = RecordView::new(RecordId(1), &records);
//! assert!(evaluate(&domain, &view).unwrap());
//! ```

pub mod ast;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod provider;
pub mod span;
pub mod value;

// Re-export main types
pub use ast::{DomainExpr, FieldPath, Leaf, Operand, Operator};
pub use error::{EvalError, ParseError, ProviderError, TypeMismatch};
pub use eval::{evaluate, DomainEvaluator};
pub use provider::{MemoryRecord, MemoryRecords, RecordProvider, RecordView, Resolved};
pub use span::Span;
pub use value::{RecordId, Value, ValueKind};

/// Parse a source string into a normalized domain expression.
///
/// # Example
///
/// ```rust
/// use rowguard_domain::parse;
///
/// let domain = parse("['|', ('a', '=', 1), ('b', '=', 2)]").unwrap();
/// assert_eq!(domain.to_string(), "['|', ('a', '=', 1), ('b', '=', 2)]");
/// ```
pub fn parse(source: &str) -> Result<DomainExpr, ParseError> {
    parser::parse(source)
}

/// Tokenize a source string (for debugging/testing).
pub fn tokenize(source: &str) -> Result<Vec<lexer::SpannedToken>, ParseError> {
    lexer::tokenize(source)
}

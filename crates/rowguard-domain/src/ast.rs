//! Abstract syntax tree for domain expressions.
//!
//! `And` and `Or` are n-ary. An empty `And` is the constant true and an empty
//! `Or` the constant false; both serialize to the conventional constant
//! leaves `(1, '=', 1)` and `(0, '=', 1)` when nested.

use std::fmt;
use std::str::FromStr;

use crate::value::{write_quoted, RecordId, Value};

/// Field path: one or more names joined by dots (`owner.phone`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Build a path from dotted text. Empty segments are rejected.
    pub fn parse(text: &str) -> Option<Self> {
        let segments: Vec<String> = text.split('.').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return None;
        }
        Some(Self { segments })
    }

    /// Path segments, first hop first.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The relational hops (all but the final segment).
    pub fn hops(&self) -> &[String] {
        &self.segments[..self.segments.len() - 1]
    }

    /// The field read on the final record.
    pub fn last(&self) -> &str {
        &self.segments[self.segments.len() - 1]
    }

    /// Number of relational hops.
    pub fn depth(&self) -> usize {
        self.segments.len() - 1
    }
}

impl From<&str> for FieldPath {
    /// Split on dots without validation; use [`FieldPath::parse`] for input.
    fn from(text: &str) -> Self {
        Self {
            segments: text.split('.').map(str::to_string).collect(),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// Leaf comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    NotIn,
    Like,
    Ilike,
    NotLike,
    NotIlike,
    ChildOf,
}

impl Operator {
    /// All operators, for hints and exhaustive tests.
    pub const ALL: [Operator; 13] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Ge,
        Operator::Lt,
        Operator::Le,
        Operator::In,
        Operator::NotIn,
        Operator::Like,
        Operator::Ilike,
        Operator::NotLike,
        Operator::NotIlike,
        Operator::ChildOf,
    ];

    /// Canonical token text.
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::In => "in",
            Operator::NotIn => "not in",
            Operator::Like => "like",
            Operator::Ilike => "ilike",
            Operator::NotLike => "not like",
            Operator::NotIlike => "not ilike",
            Operator::ChildOf => "child_of",
        }
    }

    /// Whether the operand may be a sequence of values.
    pub fn accepts_list(self) -> bool {
        matches!(self, Operator::In | Operator::NotIn | Operator::ChildOf)
    }
}

impl FromStr for Operator {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "=" | "==" => Operator::Eq,
            "!=" | "<>" => Operator::Ne,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            "in" => Operator::In,
            "not in" | "not_in" => Operator::NotIn,
            "like" => Operator::Like,
            "ilike" => Operator::Ilike,
            "not like" | "not_like" => Operator::NotLike,
            "not ilike" | "not_ilike" => Operator::NotIlike,
            "child_of" => Operator::ChildOf,
            _ => return Err(()),
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Right-hand side of a leaf.
///
/// Holds literals only: build it through the `From` impls, which turn
/// references and temporal values into their literal form.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A single literal.
    Scalar(Value),
    /// An ordered sequence of literals.
    List(Vec<Value>),
}

impl Operand {
    /// Iterate over the literal values, treating a scalar as a one-element list.
    pub fn values(&self) -> &[Value] {
        match self {
            Operand::Scalar(v) => std::slice::from_ref(v),
            Operand::List(vs) => vs,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Scalar(v) => write!(f, "{}", v),
            Operand::List(vs) => {
                f.write_str("[")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// A single `(field, operator, value)` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub path: FieldPath,
    pub operator: Operator,
    pub operand: Operand,
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        write_quoted(f, &self.path.to_string())?;
        f.write_str(", ")?;
        write_quoted(f, self.operator.as_str())?;
        write!(f, ", {})", self.operand)
    }
}

/// An immutable domain expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainExpr {
    Leaf(Leaf),
    And(Vec<DomainExpr>),
    Or(Vec<DomainExpr>),
    Not(Box<DomainExpr>),
}

impl DomainExpr {
    /// Build a leaf from a dotted path.
    pub fn leaf(path: &str, operator: Operator, operand: impl Into<Operand>) -> Self {
        DomainExpr::Leaf(Leaf {
            path: FieldPath::from(path),
            operator,
            operand: operand.into(),
        })
    }

    /// The constant true expression.
    pub fn always() -> Self {
        DomainExpr::And(Vec::new())
    }

    /// The constant false expression.
    pub fn never() -> Self {
        DomainExpr::Or(Vec::new())
    }

    /// Conjunction of `exprs`, normalized.
    pub fn and(exprs: Vec<DomainExpr>) -> Self {
        DomainExpr::And(exprs).normalize()
    }

    /// Disjunction of `exprs`, normalized.
    pub fn or(exprs: Vec<DomainExpr>) -> Self {
        DomainExpr::Or(exprs).normalize()
    }

    /// Negation of `expr`.
    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: DomainExpr) -> Self {
        DomainExpr::Not(Box::new(expr.normalize()))
    }

    /// Flatten nested conjunctions/disjunctions, drop identity elements and
    /// unwrap single-child nodes.
    pub fn normalize(self) -> Self {
        match self {
            DomainExpr::Leaf(_) => self,
            DomainExpr::Not(inner) => DomainExpr::Not(Box::new(inner.normalize())),
            DomainExpr::And(children) => {
                let mut flat = Vec::with_capacity(children.len());
                for child in children {
                    match child.normalize() {
                        DomainExpr::And(grand) => flat.extend(grand),
                        other => flat.push(other),
                    }
                }
                if flat.len() == 1 {
                    flat.pop().unwrap_or_else(DomainExpr::always)
                } else {
                    DomainExpr::And(flat)
                }
            }
            DomainExpr::Or(children) => {
                let mut flat = Vec::with_capacity(children.len());
                for child in children {
                    match child.normalize() {
                        DomainExpr::Or(grand) => flat.extend(grand),
                        other => flat.push(other),
                    }
                }
                if flat.len() == 1 {
                    flat.pop().unwrap_or_else(DomainExpr::never)
                } else {
                    DomainExpr::Or(flat)
                }
            }
        }
    }

    /// All field paths referenced by leaves, in source order.
    pub fn fields(&self) -> Vec<&FieldPath> {
        let mut out = Vec::new();
        self.collect_leaves(&mut |leaf| out.push(&leaf.path));
        out
    }

    /// All leaves, in source order.
    pub fn leaves(&self) -> Vec<&Leaf> {
        let mut out = Vec::new();
        self.collect_leaves(&mut |leaf| out.push(leaf));
        out
    }

    fn collect_leaves<'a>(&'a self, visit: &mut dyn FnMut(&'a Leaf)) {
        match self {
            DomainExpr::Leaf(leaf) => visit(leaf),
            DomainExpr::And(children) | DomainExpr::Or(children) => {
                for child in children {
                    child.collect_leaves(visit);
                }
            }
            DomainExpr::Not(inner) => inner.collect_leaves(visit),
        }
    }

    /// Write the prefix-notation elements of this node (without brackets).
    fn write_elements(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainExpr::Leaf(leaf) => write!(f, "{}", leaf),
            DomainExpr::And(children) if children.is_empty() => f.write_str("(1, '=', 1)"),
            DomainExpr::Or(children) if children.is_empty() => f.write_str("(0, '=', 1)"),
            DomainExpr::And(children) => write_nary(f, "'&'", children),
            DomainExpr::Or(children) => write_nary(f, "'|'", children),
            DomainExpr::Not(inner) => {
                f.write_str("'!', ")?;
                inner.write_elements(f)
            }
        }
    }
}

fn write_nary(f: &mut fmt::Formatter<'_>, marker: &str, children: &[DomainExpr]) -> fmt::Result {
    for _ in 1..children.len() {
        write!(f, "{}, ", marker)?;
    }
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        child.write_elements(f)?;
    }
    Ok(())
}

impl fmt::Display for DomainExpr {
    /// Render in the textual list form accepted by the parser.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainExpr::And(children) if children.is_empty() => f.write_str("[]"),
            _ => {
                f.write_str("[")?;
                self.write_elements(f)?;
                f.write_str("]")
            }
        }
    }
}

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Operand::Scalar(v.into_literal())
    }
}

impl From<Vec<Value>> for Operand {
    fn from(vs: Vec<Value>) -> Self {
        Operand::List(vs.into_iter().map(Value::into_literal).collect())
    }
}

impl From<RecordId> for Operand {
    fn from(id: RecordId) -> Self {
        Operand::Scalar(Value::Int(id.0))
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Operand::Scalar(Value::Int(v))
    }
}

impl From<i32> for Operand {
    fn from(v: i32) -> Self {
        Operand::Scalar(Value::Int(v as i64))
    }
}

impl From<f64> for Operand {
    fn from(v: f64) -> Self {
        Operand::Scalar(Value::Float(v))
    }
}

impl From<&str> for Operand {
    fn from(v: &str) -> Self {
        Operand::Scalar(Value::from(v))
    }
}

impl From<bool> for Operand {
    fn from(v: bool) -> Self {
        Operand::Scalar(Value::Bool(v))
    }
}

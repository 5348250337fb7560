//! Parser for domain expressions.
//!
//! A domain is a bracketed list whose elements are either leaf tuples
//! `('field', 'op', value)` or the logical markers `'&'`, `'|'` (two operands)
//! and `'!'` (one operand) written ahead of their operands. Consecutive
//! top-level expressions are joined with an implicit AND.

use crate::ast::{DomainExpr, FieldPath, Leaf, Operand, Operator};
use crate::error::ParseError;
use crate::lexer::{Lexer, SpannedToken, Token};
use crate::span::Span;
use crate::value::Value;

const OPERATOR_HINT: &str =
    "use one of =, !=, >, >=, <, <=, in, not in, like, ilike, not like, not ilike, child_of";

/// A flat list element before the prefix tree is assembled.
#[derive(Debug)]
enum Element {
    Marker(Marker, Span),
    Expr(DomainExpr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    And,
    Or,
    Not,
}

impl Marker {
    fn arity(self) -> usize {
        match self {
            Marker::And | Marker::Or => 2,
            Marker::Not => 1,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Marker::And => "&",
            Marker::Or => "|",
            Marker::Not => "!",
        }
    }
}

/// Parser for the domain expression syntax.
pub struct Parser<'source> {
    lexer: Lexer<'source>,
    source: &'source str,
}

impl<'source> Parser<'source> {
    /// Create a new parser for the given source.
    pub fn new(source: &'source str) -> Self {
        Self {
            lexer: Lexer::new(source),
            source,
        }
    }

    /// Parse a complete domain and normalize it.
    pub fn parse_domain(&mut self) -> Result<DomainExpr, ParseError> {
        let elements = self.parse_element_list()?;

        if let Some(tok) = self.lexer.next_token() {
            let tok = tok?;
            return Err(ParseError::new(
                format!("unexpected {} after end of domain", tok.token.describe()),
                tok.span,
            ));
        }

        let mut cursor = elements.into_iter().peekable();
        let mut roots = Vec::new();
        while cursor.peek().is_some() {
            roots.push(Self::build_tree(&mut cursor, None)?);
        }

        Ok(DomainExpr::And(roots).normalize())
    }

    /// Parse `[ element, ... ]` into flat elements.
    fn parse_element_list(&mut self) -> Result<Vec<Element>, ParseError> {
        let open = self.expect_token(Token::LBracket)?;
        let mut elements = Vec::new();

        loop {
            let tok = self.next_token_or_unterminated(open.span)?;
            match tok.token {
                Token::RBracket => break,
                Token::String(s) | Token::StringSingle(s) => {
                    let marker = match s.as_str() {
                        "&" => Marker::And,
                        "|" => Marker::Or,
                        "!" => Marker::Not,
                        _ => {
                            return Err(ParseError::new(
                                format!("unknown logical marker '{}'", s),
                                tok.span,
                            )
                            .with_hint("markers are '&', '|' and '!'; leaves are tuples"))
                        }
                    };
                    elements.push(Element::Marker(marker, tok.span));
                }
                Token::LParen => {
                    let expr = self.parse_leaf(tok.span)?;
                    elements.push(Element::Expr(expr));
                }
                other => {
                    return Err(ParseError::new(
                        format!("expected a leaf tuple or a marker, found {}", other.describe()),
                        tok.span,
                    ))
                }
            }

            let sep = self.next_token_or_unterminated(open.span)?;
            match sep.token {
                Token::Comma => continue,
                Token::RBracket => break,
                other => {
                    return Err(ParseError::new(
                        format!("expected ',' or ']', found {}", other.describe()),
                        sep.span,
                    ))
                }
            }
        }

        Ok(elements)
    }

    /// Parse the remainder of a leaf tuple after its opening parenthesis.
    fn parse_leaf(&mut self, open: Span) -> Result<DomainExpr, ParseError> {
        let head = self.next_token_or_unterminated(open)?;
        self.expect_token(Token::Comma)?;
        let op_tok = self.next_token_or_unterminated(open)?;
        self.expect_token(Token::Comma)?;
        let operand = self.parse_operand(open)?;

        // Optional trailing comma before ')'.
        let mut close = self.next_token_or_unterminated(open)?;
        if close.token == Token::Comma {
            close = self.next_token_or_unterminated(open)?;
        }
        if close.token != Token::RParen {
            return Err(ParseError::new(
                format!("leaf tuples take exactly three items, found {}", close.token.describe()),
                close.span,
            )
            .with_hint("write leaves as ('field', 'operator', value)"));
        }
        let op_text = match op_tok.token {
            Token::String(s) | Token::StringSingle(s) => s,
            other => {
                return Err(ParseError::new(
                    format!("expected operator string, found {}", other.describe()),
                    op_tok.span,
                ))
            }
        };
        let operator: Operator = op_text.parse().map_err(|_| {
            ParseError::new(format!("unknown operator '{}'", op_text), op_tok.span)
                .with_hint(OPERATOR_HINT)
        })?;

        if matches!(operand, Operand::List(_)) && !operator.accepts_list() {
            return Err(ParseError::new(
                format!("operator '{}' expects a single value, found a list", operator),
                op_tok.span,
            )
            .with_hint("only in, not in and child_of take a list of values"));
        }

        match head.token {
            Token::String(name) | Token::StringSingle(name) => {
                let path = FieldPath::parse(&name).ok_or_else(|| {
                    ParseError::new(format!("invalid field path '{}'", name), head.span)
                })?;
                let leaf = Leaf {
                    path,
                    operator,
                    operand,
                };
                Ok(DomainExpr::Leaf(leaf))
            }
            Token::Int(flag @ (0 | 1))
                if operator == Operator::Eq && operand == Operand::Scalar(Value::Int(1)) =>
            {
                Ok(if flag == 1 {
                    DomainExpr::always()
                } else {
                    DomainExpr::never()
                })
            }
            other => Err(ParseError::new(
                format!("expected field name, found {}", other.describe()),
                head.span,
            )
            .with_hint("constant leaves are written (1, '=', 1) and (0, '=', 1)")),
        }
    }

    /// Parse a scalar literal or a list/tuple of literals.
    fn parse_operand(&mut self, open: Span) -> Result<Operand, ParseError> {
        let tok = self.next_token_or_unterminated(open)?;
        let close = match tok.token {
            Token::LBracket => Token::RBracket,
            Token::LParen => Token::RParen,
            _ => return Ok(Operand::Scalar(Self::literal(tok)?)),
        };

        let mut values = Vec::new();
        loop {
            let tok = self.next_token_or_unterminated(open)?;
            if tok.token == close {
                break;
            }
            values.push(Self::literal(tok)?);

            let sep = self.next_token_or_unterminated(open)?;
            if sep.token == close {
                break;
            }
            if sep.token != Token::Comma {
                return Err(ParseError::new(
                    format!("expected ',' in value list, found {}", sep.token.describe()),
                    sep.span,
                ));
            }
        }

        Ok(Operand::List(values))
    }

    fn literal(tok: SpannedToken) -> Result<Value, ParseError> {
        Ok(match tok.token {
            Token::None => Value::Null,
            Token::True => Value::Bool(true),
            Token::False => Value::Bool(false),
            Token::Int(i) => Value::Int(i),
            Token::Float(f) => Value::Float(f),
            Token::String(s) | Token::StringSingle(s) => Value::String(s),
            other => {
                return Err(ParseError::new(
                    format!("expected literal value, found {}", other.describe()),
                    tok.span,
                ))
            }
        })
    }

    /// Assemble one prefix-notation expression from the element stream.
    fn build_tree(
        cursor: &mut impl Iterator<Item = Element>,
        parent: Option<(Marker, Span)>,
    ) -> Result<DomainExpr, ParseError> {
        match cursor.next() {
            Some(Element::Expr(expr)) => Ok(expr),
            Some(Element::Marker(marker, span)) => {
                let mut operands = Vec::with_capacity(marker.arity());
                for _ in 0..marker.arity() {
                    operands.push(Self::build_tree(cursor, Some((marker, span)))?);
                }
                Ok(match marker {
                    Marker::And => DomainExpr::And(operands),
                    Marker::Or => DomainExpr::Or(operands),
                    Marker::Not => DomainExpr::Not(Box::new(operands.remove(0))),
                })
            }
            None => {
                // Only reachable while filling a marker's operands.
                let (marker, span) = parent.unwrap_or((Marker::And, Span::default()));
                Err(ParseError::new(
                    format!(
                        "'{}' expects {} operand(s) but the domain ended",
                        marker.symbol(),
                        marker.arity()
                    ),
                    span,
                ))
            }
        }
    }

    /// Expect and consume a specific token.
    fn expect_token(&mut self, expected: Token) -> Result<SpannedToken, ParseError> {
        let tok = self.next_token()?;
        if std::mem::discriminant(&tok.token) == std::mem::discriminant(&expected) {
            Ok(tok)
        } else {
            Err(ParseError::new(
                format!("expected {}, found {}", expected.describe(), tok.token.describe()),
                tok.span,
            ))
        }
    }

    /// Get the next token or error if EOF.
    fn next_token(&mut self) -> Result<SpannedToken, ParseError> {
        match self.lexer.next_token() {
            Some(tok) => tok,
            None => Err(ParseError::new(
                "unexpected end of input",
                Span::new(self.source.len(), self.source.len()),
            )),
        }
    }

    /// Like [`Self::next_token`], pointing EOF errors at the unclosed opener.
    fn next_token_or_unterminated(&mut self, open: Span) -> Result<SpannedToken, ParseError> {
        match self.lexer.next_token() {
            Some(tok) => tok,
            None => Err(ParseError::new("unterminated domain expression", open)
                .with_hint("a bracket or parenthesis opened here is never closed")),
        }
    }
}

/// Parse a source string into a normalized domain expression.
pub fn parse(source: &str) -> Result<DomainExpr, ParseError> {
    let mut parser = Parser::new(source);
    parser.parse_domain()
}

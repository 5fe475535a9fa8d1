// auditflow-engine/src/executors/expression.rs
// ============================================================================
// Module: Gate Expressions
// Description: Small typed expression language for config-driven gates.
// Purpose: Evaluate boolean/string-producing conditions over row fields.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! Config gates evaluate one expression per row. The language is small and
//! closed: dotted field access, literals, comparisons, equality, `and`,
//! `or`, `not`, and parentheses. Anything richer belongs in a plugin gate.
//!
//! Grammar (precedence low to high):
//!
//! ```text
//! expr  := or
//! or    := and ("or" and)*
//! and   := unary ("and" unary)*
//! unary := "not" unary | cmp
//! cmp   := operand (("=="|"!="|"<="|">="|"<"|">") operand)?
//! operand := literal | field | "(" expr ")"
//! ```

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Expression parse and evaluation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    /// The expression text failed to parse.
    #[error("expression parse error at {position}: {message}")]
    Parse {
        /// Byte offset of the failure.
        position: usize,
        /// What went wrong.
        message: String,
    },
    /// The expression failed against this row.
    #[error("expression evaluation error: {0}")]
    Eval(String),
}

// ============================================================================
// SECTION: Tokens
// ============================================================================

/// Lexical token.
#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// Identifier or dotted field path.
    Field(String),
    /// String literal.
    Str(String),
    /// Numeric literal.
    Number(f64),
    /// Boolean literal.
    Bool(bool),
    /// Null literal.
    Null,
    /// `and` keyword.
    And,
    /// `or` keyword.
    Or,
    /// `not` keyword.
    Not,
    /// Comparison operator.
    Op(CompareOp),
    /// Opening parenthesis.
    LParen,
    /// Closing parenthesis.
    RParen,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// Tokenizes an expression.
fn tokenize(text: &str) -> Result<Vec<Token>, ExpressionError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut index = 0;
    while index < bytes.len() {
        let byte = bytes[index];
        match byte {
            b' ' | b'\t' | b'\n' | b'\r' => index += 1,
            b'(' => {
                tokens.push(Token::LParen);
                index += 1;
            }
            b')' => {
                tokens.push(Token::RParen);
                index += 1;
            }
            b'=' if bytes.get(index + 1) == Some(&b'=') => {
                tokens.push(Token::Op(CompareOp::Eq));
                index += 2;
            }
            b'!' if bytes.get(index + 1) == Some(&b'=') => {
                tokens.push(Token::Op(CompareOp::Ne));
                index += 2;
            }
            b'<' => {
                if bytes.get(index + 1) == Some(&b'=') {
                    tokens.push(Token::Op(CompareOp::Le));
                    index += 2;
                } else {
                    tokens.push(Token::Op(CompareOp::Lt));
                    index += 1;
                }
            }
            b'>' => {
                if bytes.get(index + 1) == Some(&b'=') {
                    tokens.push(Token::Op(CompareOp::Ge));
                    index += 2;
                } else {
                    tokens.push(Token::Op(CompareOp::Gt));
                    index += 1;
                }
            }
            b'\'' | b'"' => {
                let quote = byte;
                let start = index + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end] != quote {
                    end += 1;
                }
                if end >= bytes.len() {
                    return Err(ExpressionError::Parse {
                        position: index,
                        message: "unterminated string literal".to_string(),
                    });
                }
                tokens.push(Token::Str(text[start..end].to_string()));
                index = end + 1;
            }
            b'0'..=b'9' | b'-' => {
                let start = index;
                index += 1;
                while index < bytes.len()
                    && (bytes[index].is_ascii_digit() || bytes[index] == b'.')
                {
                    index += 1;
                }
                let literal = &text[start..index];
                let number = literal.parse::<f64>().map_err(|_| ExpressionError::Parse {
                    position: start,
                    message: format!("invalid number: {literal}"),
                })?;
                tokens.push(Token::Number(number));
            }
            _ if byte.is_ascii_alphabetic() || byte == b'_' => {
                let start = index;
                while index < bytes.len()
                    && (bytes[index].is_ascii_alphanumeric()
                        || bytes[index] == b'_'
                        || bytes[index] == b'.')
                {
                    index += 1;
                }
                let word = &text[start..index];
                tokens.push(match word {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    "null" => Token::Null,
                    _ => Token::Field(word.to_string()),
                });
            }
            other => {
                return Err(ExpressionError::Parse {
                    position: index,
                    message: format!("unexpected character: {}", other as char),
                });
            }
        }
    }
    Ok(tokens)
}

// ============================================================================
// SECTION: Ast
// ============================================================================

/// Parsed expression node.
#[derive(Debug, Clone, PartialEq)]
enum Node {
    /// Literal value.
    Literal(Value),
    /// Dotted field lookup.
    Field(String),
    /// Comparison.
    Compare(Box<Node>, CompareOp, Box<Node>),
    /// Conjunction.
    And(Box<Node>, Box<Node>),
    /// Disjunction.
    Or(Box<Node>, Box<Node>),
    /// Negation.
    Not(Box<Node>),
}

/// Recursive-descent parser over the token stream.
struct Parser {
    /// Tokens.
    tokens: Vec<Token>,
    /// Cursor.
    position: usize,
}

impl Parser {
    /// Peeks the next token.
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    /// Consumes the next token.
    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    /// Parses the full expression.
    fn parse(&mut self) -> Result<Node, ExpressionError> {
        let node = self.parse_or()?;
        if self.position != self.tokens.len() {
            return Err(ExpressionError::Parse {
                position: self.position,
                message: "trailing tokens after expression".to_string(),
            });
        }
        Ok(node)
    }

    /// Parses an `or` chain.
    fn parse_or(&mut self) -> Result<Node, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.position += 1;
            let right = self.parse_and()?;
            left = Node::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    /// Parses an `and` chain.
    fn parse_and(&mut self) -> Result<Node, ExpressionError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.position += 1;
            let right = self.parse_unary()?;
            left = Node::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    /// Parses a `not` prefix or a comparison.
    fn parse_unary(&mut self) -> Result<Node, ExpressionError> {
        if self.peek() == Some(&Token::Not) {
            self.position += 1;
            let inner = self.parse_unary()?;
            return Ok(Node::Not(Box::new(inner)));
        }
        self.parse_compare()
    }

    /// Parses an optional comparison.
    fn parse_compare(&mut self) -> Result<Node, ExpressionError> {
        let left = self.parse_operand()?;
        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.position += 1;
            let right = self.parse_operand()?;
            return Ok(Node::Compare(Box::new(left), op, Box::new(right)));
        }
        Ok(left)
    }

    /// Parses a literal, field, or parenthesized expression.
    fn parse_operand(&mut self) -> Result<Node, ExpressionError> {
        match self.next() {
            Some(Token::Field(path)) => Ok(Node::Field(path)),
            Some(Token::Str(value)) => Ok(Node::Literal(Value::String(value))),
            Some(Token::Number(value)) => serde_json::Number::from_f64(value)
                .map(|number| Node::Literal(Value::Number(number)))
                .ok_or_else(|| ExpressionError::Parse {
                    position: self.position,
                    message: "non-finite numeric literal".to_string(),
                }),
            Some(Token::Bool(value)) => Ok(Node::Literal(Value::Bool(value))),
            Some(Token::Null) => Ok(Node::Literal(Value::Null)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                if self.next() != Some(Token::RParen) {
                    return Err(ExpressionError::Parse {
                        position: self.position,
                        message: "expected closing parenthesis".to_string(),
                    });
                }
                Ok(inner)
            }
            other => Err(ExpressionError::Parse {
                position: self.position,
                message: format!("unexpected token: {other:?}"),
            }),
        }
    }
}

// ============================================================================
// SECTION: Expression
// ============================================================================

/// Compiled gate expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    /// Parsed root node.
    root: Node,
}

impl Expression {
    /// Parses an expression from its text form.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError::Parse`] for malformed text.
    pub fn parse(text: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(text)?;
        let mut parser = Parser {
            tokens,
            position: 0,
        };
        Ok(Self {
            root: parser.parse()?,
        })
    }

    /// Evaluates the expression against a row object.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError::Eval`] for type mismatches.
    pub fn evaluate(&self, row: &Value) -> Result<Value, ExpressionError> {
        eval(&self.root, row)
    }
}

// ============================================================================
// SECTION: Evaluation
// ============================================================================

/// Evaluates one node.
fn eval(node: &Node, row: &Value) -> Result<Value, ExpressionError> {
    match node {
        Node::Literal(value) => Ok(value.clone()),
        Node::Field(path) => Ok(lookup(row, path)),
        Node::Compare(left, op, right) => {
            let left = eval(left, row)?;
            let right = eval(right, row)?;
            Ok(Value::Bool(compare(&left, *op, &right)?))
        }
        Node::And(left, right) => {
            Ok(Value::Bool(truthy(&eval(left, row)?) && truthy(&eval(right, row)?)))
        }
        Node::Or(left, right) => {
            Ok(Value::Bool(truthy(&eval(left, row)?) || truthy(&eval(right, row)?)))
        }
        Node::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, row)?))),
    }
}

/// Resolves a dotted path against the row; missing fields are null.
fn lookup(row: &Value, path: &str) -> Value {
    let mut current = row;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// Truthiness: null and false are false; zero and empty string are false.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Applies a comparison operator.
fn compare(left: &Value, op: CompareOp, right: &Value) -> Result<bool, ExpressionError> {
    match op {
        CompareOp::Eq => Ok(loose_eq(left, right)),
        CompareOp::Ne => Ok(!loose_eq(left, right)),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let ordering = order(left, right)?;
            Ok(match op {
                CompareOp::Lt => ordering.is_lt(),
                CompareOp::Le => ordering.is_le(),
                CompareOp::Gt => ordering.is_gt(),
                CompareOp::Ge => ordering.is_ge(),
                CompareOp::Eq | CompareOp::Ne => false,
            })
        }
    }
}

/// Equality with numeric coercion (1 == 1.0).
fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON || a == b,
        _ => left == right,
    }
}

/// Total order for comparable operands.
fn order(left: &Value, right: &Value) -> Result<std::cmp::Ordering, ExpressionError> {
    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
        return a.partial_cmp(&b).ok_or_else(|| {
            ExpressionError::Eval("non-finite operands are not comparable".to_string())
        });
    }
    if let (Some(a), Some(b)) = (left.as_str(), right.as_str()) {
        return Ok(a.cmp(b));
    }
    Err(ExpressionError::Eval(format!(
        "cannot order {left} against {right}"
    )))
}

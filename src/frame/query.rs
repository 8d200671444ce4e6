// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Row filter expressions
//!
//! `Table::query` expressions are parsed as SQL expressions with `sqlparser`
//! and lowered to comparisons of a name against a literal (`==`, `!=`, `<`,
//! `<=`, `>`, `>=`) combined with `and`, `or` and parentheses.
//!
//! Literals are integers, floats, quoted strings and `true`/`false`. The name
//! `index` (or the index's own name) refers to the index. References to
//! variables of the calling environment (`@name`) are not supported.

use std::cmp::Ordering;
use std::fmt;

use arrow::array::BooleanArray;
use sqlparser::ast::{BinaryOperator, Expr as SqlExpr, UnaryOperator, Value};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::error::{Code, FrameError, FrameResult};
use crate::frame::{Frame, DEFAULT_INDEX_NAME};
use crate::scalar::ScalarValue;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CmpOp {
    fn holds(&self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::NotEq => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::LtEq => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::GtEq => ord != Ordering::Less,
        }
    }

    /// The operator with its operands swapped
    fn flipped(&self) -> CmpOp {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::LtEq => CmpOp::GtEq,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::GtEq => CmpOp::LtEq,
            other => *other,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtEq => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtEq => ">=",
        }
    }
}

/// Parsed filter expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Compare {
        column: String,
        op: CmpOp,
        value: ScalarValue,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Compare { column, op, value } => write!(f, "{} {} {}", column, op.symbol(), value),
            Expr::And(a, b) => write!(f, "({} and {})", a, b),
            Expr::Or(a, b) => write!(f, "({} or {})", a, b),
        }
    }
}

impl Expr {
    /// Parse an expression string
    pub fn parse(input: &str) -> FrameResult<Expr> {
        let dialect = GenericDialect {};
        let tokens = Tokenizer::new(&dialect, input)
            .tokenize()
            .map_err(ParserError::from)?;
        check_environment_references(&tokens)?;
        let mut parser = Parser::new(&dialect).with_tokens(tokens);
        let expr = parser.parse_expr()?;
        if parser.peek_token().token != Token::EOF {
            return Err(FrameError::new(
                Code::Invalid,
                format!("unexpected trailing input in query '{}'", input),
            ));
        }
        lower(&expr)
    }

    /// Names referenced by the expression
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Expr::Compare { column, .. } => vec![column.as_str()],
            Expr::And(a, b) | Expr::Or(a, b) => {
                let mut out = a.columns();
                out.extend(b.columns());
                out
            }
        }
    }

    /// Evaluate to a row mask over `frame`
    pub fn evaluate(&self, frame: &Frame) -> FrameResult<BooleanArray> {
        match self {
            Expr::Compare { column, op, value } => {
                let values = if frame.column(column).is_ok() {
                    ScalarValue::collect(frame.column(column)?.as_ref())?
                } else if is_index_name(frame, column) {
                    frame.index_values()?
                } else {
                    return Err(FrameError::new(
                        Code::KeyError,
                        format!("name '{}' is not defined", column),
                    ));
                };
                Ok(values
                    .iter()
                    .map(|v| Some(compare(v, value).map(|o| op.holds(o)).unwrap_or(false)))
                    .collect())
            }
            Expr::And(a, b) => Ok(arrow::compute::and(&a.evaluate(frame)?, &b.evaluate(frame)?)?),
            Expr::Or(a, b) => Ok(arrow::compute::or(&a.evaluate(frame)?, &b.evaluate(frame)?)?),
        }
    }

    /// Check every referenced name exists in `frame` without evaluating
    pub fn validate(&self, frame: &Frame) -> FrameResult<()> {
        for name in self.columns() {
            if frame.column(name).is_err() && !is_index_name(frame, name) {
                return Err(FrameError::new(
                    Code::KeyError,
                    format!("name '{}' is not defined", name),
                ));
            }
        }
        Ok(())
    }
}

impl Frame {
    /// Keep rows matching a filter expression
    pub fn query(&self, expr: &Expr) -> FrameResult<Frame> {
        let mask = expr.evaluate(self)?;
        self.filter(&mask)
    }
}

fn is_index_name(frame: &Frame, name: &str) -> bool {
    name == DEFAULT_INDEX_NAME || frame.index_name() == Some(name)
}

/// Order two scalars, comparing numbers across integer and float types
fn compare(a: &ScalarValue, b: &ScalarValue) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    match (a, b) {
        (ScalarValue::Utf8(x), ScalarValue::Utf8(y)) => Some(x.cmp(y)),
        (ScalarValue::Utf8(_), _) | (_, ScalarValue::Utf8(_)) => None,
        (ScalarValue::Int64(x), ScalarValue::Int64(y)) => Some(x.cmp(y)),
        (ScalarValue::UInt64(x), ScalarValue::UInt64(y)) => Some(x.cmp(y)),
        (ScalarValue::Boolean(x), ScalarValue::Boolean(y)) => Some(x.cmp(y)),
        _ => a.to_f64()?.partial_cmp(&b.to_f64()?),
    }
}

/// Reject references to variables of the calling environment
fn check_environment_references(tokens: &[Token]) -> FrameResult<()> {
    let referenced = tokens.iter().any(|t| match t {
        Token::AtSign => true,
        Token::Placeholder(p) => p.starts_with('@'),
        Token::Word(w) => w.value.starts_with('@'),
        _ => false,
    });
    if referenced {
        return Err(FrameError::new(
            Code::NotImplemented,
            "Using variables from the calling environment",
        ));
    }
    Ok(())
}

fn lower(expr: &SqlExpr) -> FrameResult<Expr> {
    match expr {
        SqlExpr::Nested(inner) => lower(inner),
        SqlExpr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And => Ok(Expr::And(Box::new(lower(left)?), Box::new(lower(right)?))),
            BinaryOperator::Or => Ok(Expr::Or(Box::new(lower(left)?), Box::new(lower(right)?))),
            _ => {
                let op = comparison(op)?;
                match (name_of(left), name_of(right)) {
                    (Some(column), _) => Ok(Expr::Compare {
                        column,
                        op,
                        value: literal(right)?,
                    }),
                    (None, Some(column)) => Ok(Expr::Compare {
                        column,
                        op: op.flipped(),
                        value: literal(left)?,
                    }),
                    (None, None) => Err(FrameError::new(
                        Code::Invalid,
                        format!("comparison '{}' does not reference a column", expr),
                    )),
                }
            }
        },
        other => Err(FrameError::new(
            Code::Invalid,
            format!("unsupported query expression '{}'", other),
        )),
    }
}

fn comparison(op: &BinaryOperator) -> FrameResult<CmpOp> {
    match op {
        BinaryOperator::Eq => Ok(CmpOp::Eq),
        BinaryOperator::NotEq => Ok(CmpOp::NotEq),
        BinaryOperator::Lt => Ok(CmpOp::Lt),
        BinaryOperator::LtEq => Ok(CmpOp::LtEq),
        BinaryOperator::Gt => Ok(CmpOp::Gt),
        BinaryOperator::GtEq => Ok(CmpOp::GtEq),
        other => Err(FrameError::new(
            Code::Invalid,
            format!("unsupported operator '{}' in query", other),
        )),
    }
}

/// Unquoted identifiers name columns; double-quoted ones are string literals
fn name_of(expr: &SqlExpr) -> Option<String> {
    match expr {
        SqlExpr::Identifier(ident) if ident.quote_style.is_none() => Some(ident.value.clone()),
        _ => None,
    }
}

fn literal(expr: &SqlExpr) -> FrameResult<ScalarValue> {
    match expr {
        SqlExpr::Value(value) => scalar_of(value),
        SqlExpr::Identifier(ident) if ident.quote_style.is_some() => Ok(ScalarValue::Utf8(ident.value.clone())),
        SqlExpr::UnaryOp {
            op: UnaryOperator::Minus,
            expr: inner,
        } => match literal(inner)? {
            ScalarValue::Int64(v) => Ok(ScalarValue::Int64(-v)),
            ScalarValue::Float64(v) => Ok(ScalarValue::Float64(-v)),
            other => Err(FrameError::new(Code::Invalid, format!("cannot negate '{}'", other))),
        },
        other => Err(FrameError::new(Code::Invalid, format!("expected literal but found '{}'", other))),
    }
}

fn scalar_of(value: &Value) -> FrameResult<ScalarValue> {
    match value {
        Value::Number(text, _) => parse_number(text),
        Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => Ok(ScalarValue::Utf8(s.clone())),
        Value::Boolean(b) => Ok(ScalarValue::Boolean(*b)),
        Value::Null => Ok(ScalarValue::Null),
        Value::Placeholder(_) => Err(FrameError::new(
            Code::NotImplemented,
            "Using variables from the calling environment",
        )),
        other => Err(FrameError::new(Code::Invalid, format!("unsupported literal '{}'", other))),
    }
}

fn parse_number(text: &str) -> FrameResult<ScalarValue> {
    if let Ok(v) = text.parse::<i64>() {
        return Ok(ScalarValue::Int64(v));
    }
    text.parse::<f64>()
        .map(ScalarValue::Float64)
        .map_err(|_| FrameError::new(Code::Invalid, format!("invalid number '{}' in query", text)))
}

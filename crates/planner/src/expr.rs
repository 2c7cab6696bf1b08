//! Scalar/boolean expression tree used by the physical plan path.
//!
//! The parser's expression hierarchy is open-ended; planning only needs a
//! closed subset of it. [`Expr::from_sql`] maps the supported shapes and
//! rejects everything else as an unsupported construct.

use std::fmt;

use fxq_common::{FxqError, Result};
use serde::{Deserialize, Serialize};
use sqlparser::ast::{BinaryOperator, Expr as SqlExpr, UnaryOperator, Value as SqlValue};

/// Literal exactly as written; parsing happens on evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Guid(String),
    Integer(String),
    Money(String),
    Numeric(String),
    Real(String),
    String(String),
    Null,
}

impl Literal {
    /// Classify a numeric token: exponent → real, fraction or too wide for
    /// 32 bits → numeric, otherwise integer.
    pub fn from_number(text: &str) -> Self {
        if text.contains(['e', 'E']) {
            Self::Real(text.to_string())
        } else if text.contains('.') || text.parse::<i32>().is_err() {
            Self::Numeric(text.to_string())
        } else {
            Self::Integer(text.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl ComparisonOp {
    /// Operator with its operands swapped (`a < b` ⇔ `b > a`).
    pub fn mirrored(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::LtEq => Self::GtEq,
            Self::Gt => Self::Lt,
            Self::GtEq => Self::LtEq,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BooleanOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithmeticOp {
    Add,
    Multiply,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Possibly qualified column reference (`alias.attribute`).
    Column(String),
    Literal(Literal),
    Comparison {
        left: Box<Expr>,
        op: ComparisonOp,
        right: Box<Expr>,
    },
    Boolean {
        left: Box<Expr>,
        op: BooleanOp,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    /// Parenthesized expression.
    Nested(Box<Expr>),
    Arithmetic {
        left: Box<Expr>,
        op: ArithmeticOp,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Self::Column(name.into())
    }

    pub fn equals(left: Expr, right: Expr) -> Self {
        Self::Comparison {
            left: Box::new(left),
            op: ComparisonOp::Eq,
            right: Box::new(right),
        }
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Self::Boolean {
            left: Box::new(left),
            op: BooleanOp::And,
            right: Box::new(right),
        }
    }

    /// Convert a parser expression into the planning subset.
    pub fn from_sql(expr: &SqlExpr) -> Result<Self> {
        Ok(match expr {
            SqlExpr::Identifier(id) => Self::Column(id.value.clone()),
            SqlExpr::CompoundIdentifier(parts) => Self::Column(
                parts
                    .iter()
                    .map(|p| p.value.as_str())
                    .collect::<Vec<_>>()
                    .join("."),
            ),
            SqlExpr::Value(v) => Self::Literal(literal_from_sql(v, expr)?),
            SqlExpr::UnaryOp {
                op: UnaryOperator::Minus,
                expr: inner,
            } => match inner.as_ref() {
                SqlExpr::Value(SqlValue::Number(n, _)) => {
                    Self::Literal(Literal::from_number(&format!("-{n}")))
                }
                _ => return Err(FxqError::unsupported("Unhandled unary minus", expr)),
            },
            SqlExpr::UnaryOp {
                op: UnaryOperator::Plus,
                expr: inner,
            } => Self::from_sql(inner)?,
            SqlExpr::UnaryOp {
                op: UnaryOperator::Not,
                expr: inner,
            } => Self::Not(Box::new(Self::from_sql(inner)?)),
            SqlExpr::Nested(inner) => Self::Nested(Box::new(Self::from_sql(inner)?)),
            SqlExpr::IsNull(inner) => Self::IsNull {
                expr: Box::new(Self::from_sql(inner)?),
                negated: false,
            },
            SqlExpr::IsNotNull(inner) => Self::IsNull {
                expr: Box::new(Self::from_sql(inner)?),
                negated: true,
            },
            SqlExpr::BinaryOp { left, op, right } => {
                let left = Box::new(Self::from_sql(left)?);
                let right = Box::new(Self::from_sql(right)?);
                if let Some(op) = comparison_op(op) {
                    return Ok(Self::Comparison { left, op, right });
                }
                match op {
                    BinaryOperator::And => Self::Boolean {
                        left,
                        op: BooleanOp::And,
                        right,
                    },
                    BinaryOperator::Or => Self::Boolean {
                        left,
                        op: BooleanOp::Or,
                        right,
                    },
                    BinaryOperator::Plus => Self::Arithmetic {
                        left,
                        op: ArithmeticOp::Add,
                        right,
                    },
                    BinaryOperator::Multiply => Self::Arithmetic {
                        left,
                        op: ArithmeticOp::Multiply,
                        right,
                    },
                    other => {
                        return Err(FxqError::unsupported(
                            format!("Unhandled binary operator {other}"),
                            expr,
                        ))
                    }
                }
            }
            SqlExpr::Cast {
                expr: inner,
                data_type,
                ..
            } if data_type
                .to_string()
                .eq_ignore_ascii_case("uniqueidentifier") =>
            {
                match inner.as_ref() {
                    SqlExpr::Value(SqlValue::SingleQuotedString(s))
                    | SqlExpr::Value(SqlValue::NationalStringLiteral(s)) => {
                        Self::Literal(Literal::Guid(s.clone()))
                    }
                    _ => return Err(FxqError::unsupported("Unhandled CAST", expr)),
                }
            }
            other => return Err(FxqError::unsupported("Unhandled expression", other)),
        })
    }

    /// Copy of this boolean tree without the node `target`, which must be a
    /// reference into this tree (as returned by [`Expr::conditions`]). Nodes
    /// are matched by identity, so an equal condition elsewhere in the tree
    /// is kept. A boolean operator left with one operand collapses to it;
    /// `None` when nothing remains.
    pub fn remove_condition(&self, target: &Expr) -> Option<Expr> {
        remove_node(self, target)
    }

    /// Leaves of the AND/OR tree, looking through parentheses.
    pub fn conditions(&self) -> Vec<&Expr> {
        match self {
            Self::Boolean { left, right, .. } => {
                let mut out = left.conditions();
                out.extend(right.conditions());
                out
            }
            Self::Nested(inner) => inner.conditions(),
            leaf => vec![leaf],
        }
    }
}

/// Comparison operator for a parser binary operator, if it is one.
pub fn comparison_op(op: &BinaryOperator) -> Option<ComparisonOp> {
    Some(match op {
        BinaryOperator::Eq => ComparisonOp::Eq,
        BinaryOperator::NotEq => ComparisonOp::NotEq,
        BinaryOperator::Lt => ComparisonOp::Lt,
        BinaryOperator::LtEq => ComparisonOp::LtEq,
        BinaryOperator::Gt => ComparisonOp::Gt,
        BinaryOperator::GtEq => ComparisonOp::GtEq,
        _ => return None,
    })
}

fn literal_from_sql(value: &SqlValue, expr: &SqlExpr) -> Result<Literal> {
    match value {
        SqlValue::Number(n, _) => Ok(Literal::from_number(n)),
        SqlValue::SingleQuotedString(s) | SqlValue::NationalStringLiteral(s) => {
            Ok(Literal::String(s.clone()))
        }
        SqlValue::Null => Ok(Literal::Null),
        _ => Err(FxqError::unsupported("Unhandled literal type", expr)),
    }
}

fn remove_node(expr: &Expr, target: &Expr) -> Option<Expr> {
    if std::ptr::eq(expr, target) {
        return None;
    }
    match expr {
        Expr::Boolean { left, op, right } => {
            match (remove_node(left, target), remove_node(right, target)) {
                (Some(l), Some(r)) => Some(Expr::Boolean {
                    left: Box::new(l),
                    op: *op,
                    right: Box::new(r),
                }),
                (Some(e), None) | (None, Some(e)) => Some(e),
                (None, None) => None,
            }
        }
        Expr::Nested(inner) => remove_node(inner, target).map(|e| Expr::Nested(Box::new(e))),
        other => Some(other.clone()),
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guid(v) => write!(f, "CAST('{v}' AS UNIQUEIDENTIFIER)"),
            Self::Money(v) => write!(f, "${v}"),
            Self::Integer(v) | Self::Numeric(v) | Self::Real(v) => f.write_str(v),
            Self::String(v) => write!(f, "'{}'", v.replace('\'', "''")),
            Self::Null => f.write_str("NULL"),
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(name) => f.write_str(name),
            Self::Literal(lit) => write!(f, "{lit}"),
            Self::Comparison { left, op, right } => write!(f, "{left} {op} {right}"),
            Self::Boolean { left, op, right } => {
                let op = match op {
                    BooleanOp::And => "AND",
                    BooleanOp::Or => "OR",
                };
                write!(f, "{left} {op} {right}")
            }
            Self::Not(inner) => write!(f, "NOT {inner}"),
            Self::IsNull { expr, negated } => {
                write!(f, "{expr} IS {}NULL", if *negated { "NOT " } else { "" })
            }
            Self::Nested(inner) => write!(f, "({inner})"),
            Self::Arithmetic { left, op, right } => {
                let op = match op {
                    ArithmeticOp::Add => "+",
                    ArithmeticOp::Multiply => "*",
                };
                write!(f, "{left} {op} {right}")
            }
        }
    }
}

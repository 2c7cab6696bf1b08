//! Static typing and row evaluation for [`Expr`].
//!
//! Input contract:
//! - columns are resolved through a [`NodeSchema`]
//! - rows are keyed by the schema's normalized column names
//!
//! Output contract:
//! - [`type_of`] rejects shapes that cannot be evaluated with
//!   [`FxqError::Unsupported`]
//! - [`value_of`] never fails on a missing row value (it yields
//!   [`Value::Null`]), but still guards operator/type combinations that
//!   typing should have rejected

use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use fxq_common::{FxqError, Result};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::expr::{ArithmeticOp, BooleanOp, ComparisonOp, Expr, Literal};
use crate::schema::NodeSchema;
use crate::types::{consistent_type, ScalarType, TypeCategory, Value};

/// One row of values bound to a schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: HashMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: Value) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: &str, value: Value) {
        self.values.insert(column.to_lowercase(), value);
    }

    /// Value of `column`, or [`Value::Null`] when the row has none.
    pub fn get(&self, column: &str) -> &Value {
        self.values
            .get(&column.to_lowercase())
            .unwrap_or(&Value::Null)
    }
}

/// Static type of `expr` against `schema`.
pub fn type_of(expr: &Expr, schema: &NodeSchema) -> Result<ScalarType> {
    match expr {
        Expr::Literal(lit) => Ok(match lit {
            Literal::Guid(_) => ScalarType::Guid,
            Literal::Integer(_) => ScalarType::Int32,
            Literal::Money(_) | Literal::Numeric(_) => ScalarType::Decimal,
            Literal::Real(_) => ScalarType::Double,
            Literal::String(_) => ScalarType::Text,
            Literal::Null => ScalarType::Unknown,
        }),
        Expr::Column(name) => {
            let column = schema.resolve_column(name, expr)?;
            schema
                .column_type(&column)
                .ok_or_else(|| FxqError::semantic(format!("Unknown column '{name}'"), expr))
        }
        Expr::Comparison { left, right, .. } => {
            let lt = type_of(left, schema)?;
            let rt = type_of(right, schema)?;
            let common = consistent_type(lt, rt).ok_or_else(|| {
                FxqError::unsupported(format!("No implicit conversion from {lt} to {rt}"), expr)
            })?;
            if !common.is_orderable() {
                return Err(FxqError::unsupported(
                    format!("Values of type {common} cannot be compared"),
                    expr,
                ));
            }
            Ok(ScalarType::Boolean)
        }
        Expr::Boolean { left, right, .. } => {
            expect_boolean(left, schema)?;
            expect_boolean(right, schema)?;
            Ok(ScalarType::Boolean)
        }
        Expr::Not(inner) => {
            expect_boolean(inner, schema)?;
            Ok(ScalarType::Boolean)
        }
        Expr::IsNull { expr: inner, .. } => {
            type_of(inner, schema)?;
            Ok(ScalarType::Boolean)
        }
        Expr::Nested(inner) => type_of(inner, schema),
        Expr::Arithmetic { left, op, right } => {
            let lt = type_of(left, schema)?;
            let rt = type_of(right, schema)?;
            let common = consistent_type(lt, rt).ok_or_else(|| {
                FxqError::unsupported(format!("No implicit conversion from {lt} to {rt}"), expr)
            })?;
            let legal = match op {
                ArithmeticOp::Add => {
                    matches!(
                        common.category(),
                        TypeCategory::ExactNumeric | TypeCategory::ApproximateNumeric
                    ) && common != ScalarType::Boolean
                }
                ArithmeticOp::Multiply => common.is_numeric(),
            };
            if !legal {
                return Err(FxqError::unsupported(
                    format!("Operator {} is not defined for type {common}", op_symbol(*op)),
                    expr,
                ));
            }
            Ok(common)
        }
    }
}

fn expect_boolean(expr: &Expr, schema: &NodeSchema) -> Result<()> {
    match type_of(expr, schema)? {
        ScalarType::Boolean => Ok(()),
        other => Err(FxqError::unsupported(
            format!("Expected a boolean expression, found {other}"),
            expr,
        )),
    }
}

fn op_symbol(op: ArithmeticOp) -> &'static str {
    match op {
        ArithmeticOp::Add => "+",
        ArithmeticOp::Multiply => "*",
    }
}

/// Evaluate `expr` for one row.
pub fn value_of(expr: &Expr, row: &Row, schema: &NodeSchema) -> Result<Value> {
    match expr {
        Expr::Literal(lit) => literal_value(lit),
        Expr::Column(name) => {
            let column = schema.resolve_column(name, expr)?;
            Ok(row.get(&column).clone())
        }
        Expr::Comparison { left, op, right } => {
            let l = value_of(left, row, schema)?;
            let r = value_of(right, row, schema)?;
            if l.is_null() || r.is_null() {
                return Ok(Value::Boolean(false));
            }
            let (l, r) = coerce(&l, &r)?;
            let Some(ordering) = l.compare(&r) else {
                return Ok(Value::Boolean(false));
            };
            Ok(Value::Boolean(match op {
                ComparisonOp::Eq => ordering == Ordering::Equal,
                ComparisonOp::NotEq => ordering != Ordering::Equal,
                ComparisonOp::Lt => ordering == Ordering::Less,
                ComparisonOp::LtEq => ordering != Ordering::Greater,
                ComparisonOp::Gt => ordering == Ordering::Greater,
                ComparisonOp::GtEq => ordering != Ordering::Less,
            }))
        }
        Expr::Boolean { left, op, right } => {
            let l = as_bool(&value_of(left, row, schema)?)?;
            match op {
                BooleanOp::And if !l => return Ok(Value::Boolean(false)),
                BooleanOp::Or if l => return Ok(Value::Boolean(true)),
                _ => {}
            }
            Ok(Value::Boolean(as_bool(&value_of(right, row, schema)?)?))
        }
        Expr::Not(inner) => match value_of(inner, row, schema)? {
            Value::Null => Ok(Value::Null),
            v => Ok(Value::Boolean(!as_bool(&v)?)),
        },
        Expr::IsNull { expr: inner, negated } => {
            let v = value_of(inner, row, schema)?;
            Ok(Value::Boolean(v.is_null() != *negated))
        }
        Expr::Nested(inner) => value_of(inner, row, schema),
        Expr::Arithmetic { left, op, right } => {
            let l = value_of(left, row, schema)?;
            let r = value_of(right, row, schema)?;
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            let (l, r) = coerce(&l, &r)?;
            arithmetic(*op, l, r)
        }
    }
}

fn literal_value(lit: &Literal) -> Result<Value> {
    let bad = |text: &str, ty: &str| FxqError::Execution(format!("invalid {ty} literal '{text}'"));
    Ok(match lit {
        Literal::Guid(text) => Value::Guid(Uuid::parse_str(text).map_err(|_| bad(text, "guid"))?),
        Literal::Integer(text) => Value::Int32(text.parse().map_err(|_| bad(text, "integer"))?),
        Literal::Money(text) | Literal::Numeric(text) => Value::Decimal(
            Decimal::from_str(text)
                .or_else(|_| Decimal::from_scientific(text))
                .map_err(|_| bad(text, "decimal"))?,
        ),
        Literal::Real(text) => Value::Double(text.parse().map_err(|_| bad(text, "float"))?),
        Literal::String(text) => Value::Text(text.clone()),
        Literal::Null => Value::Null,
    })
}

fn coerce(l: &Value, r: &Value) -> Result<(Value, Value)> {
    let (lt, rt) = (l.data_type(), r.data_type());
    let common = consistent_type(lt, rt).ok_or_else(|| {
        FxqError::Execution(format!("no implicit conversion from {lt} to {rt}"))
    })?;
    Ok((l.cast(common)?, r.cast(common)?))
}

fn as_bool(v: &Value) -> Result<bool> {
    match v {
        Value::Boolean(b) => Ok(*b),
        Value::Null => Ok(false),
        other => Err(FxqError::Execution(format!(
            "expected a boolean value, found {}",
            other.data_type()
        ))),
    }
}

fn arithmetic(op: ArithmeticOp, l: Value, r: Value) -> Result<Value> {
    let overflow = || FxqError::Execution("arithmetic overflow".to_string());
    Ok(match (op, l, r) {
        (ArithmeticOp::Add, Value::Int64(a), Value::Int64(b)) => {
            Value::Int64(a.checked_add(b).ok_or_else(overflow)?)
        }
        (ArithmeticOp::Add, Value::Int32(a), Value::Int32(b)) => {
            Value::Int32(a.checked_add(b).ok_or_else(overflow)?)
        }
        (ArithmeticOp::Add, Value::Decimal(a), Value::Decimal(b)) => {
            Value::Decimal(a.checked_add(b).ok_or_else(overflow)?)
        }
        (ArithmeticOp::Add, Value::Double(a), Value::Double(b)) => Value::Double(a + b),
        (ArithmeticOp::Add, Value::Float(a), Value::Float(b)) => Value::Float(a + b),
        (ArithmeticOp::Multiply, Value::Int64(a), Value::Int64(b)) => {
            Value::Int64(a.checked_mul(b).ok_or_else(overflow)?)
        }
        (ArithmeticOp::Multiply, Value::Int32(a), Value::Int32(b)) => {
            Value::Int32(a.checked_mul(b).ok_or_else(overflow)?)
        }
        (ArithmeticOp::Multiply, Value::Decimal(a), Value::Decimal(b)) => {
            Value::Decimal(a.checked_mul(b).ok_or_else(overflow)?)
        }
        (ArithmeticOp::Multiply, Value::Double(a), Value::Double(b)) => Value::Double(a * b),
        (ArithmeticOp::Multiply, Value::Float(a), Value::Float(b)) => Value::Float(a * b),
        (ArithmeticOp::Multiply, Value::Boolean(a), Value::Boolean(b)) => Value::Boolean(a && b),
        (op, l, _) => {
            return Err(FxqError::Execution(format!(
                "operator {} is not defined for type {}",
                op_symbol(op),
                l.data_type()
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::parse_date_time;

    fn schema() -> NodeSchema {
        let mut schema = NodeSchema::new();
        schema.add_qualified_column("c", "firstname", ScalarType::Text);
        schema.add_qualified_column("c", "age", ScalarType::Int32);
        schema.add_qualified_column("c", "revenue", ScalarType::Decimal);
        schema.add_qualified_column("c", "contactid", ScalarType::Guid);
        schema.add_qualified_column("c", "donotemail", ScalarType::Boolean);
        schema.add_qualified_column("c", "createdon", ScalarType::DateTime);
        schema
    }

    fn col(name: &str) -> Expr {
        Expr::column(name)
    }

    fn lit(l: Literal) -> Expr {
        Expr::Literal(l)
    }

    fn cmp(left: Expr, op: ComparisonOp, right: Expr) -> Expr {
        Expr::Comparison {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    fn arith(left: Expr, op: ArithmeticOp, right: Expr) -> Expr {
        Expr::Arithmetic {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    #[test]
    fn literal_types_are_fixed() {
        let s = schema();
        assert_eq!(type_of(&lit(Literal::Integer("1".into())), &s).expect("int"), ScalarType::Int32);
        assert_eq!(type_of(&lit(Literal::Money("1".into())), &s).expect("money"), ScalarType::Decimal);
        assert_eq!(type_of(&lit(Literal::Real("1e1".into())), &s).expect("real"), ScalarType::Double);
        assert_eq!(type_of(&lit(Literal::Null), &s).expect("null"), ScalarType::Unknown);
    }

    #[test]
    fn unknown_column_fails_typing() {
        let err = type_of(&col("c.nope"), &schema()).expect_err("unknown");
        assert!(err.to_string().contains("Unknown column"), "{err}");
    }

    #[test]
    fn comparison_requires_consistent_type() {
        let s = schema();
        let ok = cmp(col("age"), ComparisonOp::Gt, lit(Literal::String("10".into())));
        assert_eq!(type_of(&ok, &s).expect("typed"), ScalarType::Boolean);
        let bad = cmp(col("contactid"), ComparisonOp::Eq, lit(Literal::Integer("1".into())));
        let err = type_of(&bad, &s).expect_err("guid vs int");
        assert!(matches!(err, FxqError::Unsupported { .. }), "got {err:?}");
    }

    #[test]
    fn addition_excludes_booleans_but_multiply_allows_them() {
        let s = schema();
        let add = arith(col("donotemail"), ArithmeticOp::Add, col("donotemail"));
        assert!(type_of(&add, &s).is_err());
        let mul = arith(col("donotemail"), ArithmeticOp::Multiply, col("donotemail"));
        assert_eq!(type_of(&mul, &s).expect("bool and"), ScalarType::Boolean);
        let widen = arith(col("age"), ArithmeticOp::Add, col("revenue"));
        assert_eq!(type_of(&widen, &s).expect("decimal"), ScalarType::Decimal);
        let text = arith(col("firstname"), ArithmeticOp::Add, col("firstname"));
        assert!(type_of(&text, &s).is_err());
    }

    #[test]
    fn comparisons_coerce_and_ignore_case() {
        let s = schema();
        let row = Row::new()
            .with("c.firstname", Value::Text("MARK".into()))
            .with("c.age", Value::Int32(40))
            .with("c.createdon", Value::DateTime(parse_date_time("2024-01-02").expect("dt")));
        let eq = cmp(col("firstname"), ComparisonOp::Eq, lit(Literal::String("mark".into())));
        assert_eq!(value_of(&eq, &row, &s).expect("eq"), Value::Boolean(true));
        let gt = cmp(col("age"), ComparisonOp::Gt, lit(Literal::Numeric("39.5".into())));
        assert_eq!(value_of(&gt, &row, &s).expect("gt"), Value::Boolean(true));
        let date = cmp(
            col("createdon"),
            ComparisonOp::GtEq,
            lit(Literal::String("2024-01-01".into())),
        );
        assert_eq!(value_of(&date, &row, &s).expect("date"), Value::Boolean(true));
    }

    #[test]
    fn missing_values_are_null_and_compare_false() {
        let s = schema();
        let row = Row::new();
        assert_eq!(value_of(&col("age"), &row, &s).expect("null"), Value::Null);
        let eq = cmp(col("age"), ComparisonOp::Eq, lit(Literal::Null));
        assert_eq!(value_of(&eq, &row, &s).expect("cmp"), Value::Boolean(false));
        let is_null = Expr::IsNull {
            expr: Box::new(col("age")),
            negated: false,
        };
        assert_eq!(value_of(&is_null, &row, &s).expect("is null"), Value::Boolean(true));
    }

    #[test]
    fn and_or_short_circuit() {
        let s = schema();
        let row = Row::new().with("c.age", Value::Int32(1));
        // Right side would fail to evaluate: the literal is not a valid integer.
        let poison = cmp(col("age"), ComparisonOp::Eq, lit(Literal::Integer("x".into())));
        let falsy = cmp(col("age"), ComparisonOp::Eq, lit(Literal::Integer("2".into())));
        let truthy = cmp(col("age"), ComparisonOp::Eq, lit(Literal::Integer("1".into())));
        assert!(value_of(&poison, &row, &s).is_err());

        let and = Expr::and(falsy, poison.clone());
        assert_eq!(value_of(&and, &row, &s).expect("and"), Value::Boolean(false));
        let or = Expr::Boolean {
            left: Box::new(truthy),
            op: BooleanOp::Or,
            right: Box::new(poison),
        };
        assert_eq!(value_of(&or, &row, &s).expect("or"), Value::Boolean(true));
    }

    #[test]
    fn arithmetic_dispatches_per_type() {
        let s = schema();
        let row = Row::new()
            .with("c.age", Value::Int32(20))
            .with("c.revenue", Value::Decimal(Decimal::new(150, 1)))
            .with("c.donotemail", Value::Boolean(true));
        let add = arith(col("age"), ArithmeticOp::Add, col("revenue"));
        assert_eq!(
            value_of(&add, &row, &s).expect("add"),
            Value::Decimal(Decimal::new(350, 1))
        );
        let mul = arith(col("donotemail"), ArithmeticOp::Multiply, col("donotemail"));
        assert_eq!(value_of(&mul, &row, &s).expect("mul"), Value::Boolean(true));
        let overflow = arith(
            lit(Literal::Integer(i32::MAX.to_string())),
            ArithmeticOp::Add,
            lit(Literal::Integer("1".into())),
        );
        assert!(value_of(&overflow, &row, &s).is_err());
    }

    #[test]
    fn evaluation_guards_untyped_combinations() {
        let s = schema();
        let row = Row::new().with("c.firstname", Value::Text("a".into()));
        let add = arith(col("firstname"), ArithmeticOp::Add, col("firstname"));
        let err = value_of(&add, &row, &s).expect_err("text add");
        assert!(err.to_string().contains("not defined"), "{err}");
    }
}

//! WHERE / ON lowering into FetchXML filter trees.
//!
//! A filter adopts its logical operator lazily: the first AND/OR met at a
//! nesting level fixes it, and a different operator at the same level opens a
//! nested sub-filter. Join conditions run through the same code with
//! [`FilterContext::join`], which additionally records the single
//! column-equals-column predicate that becomes the link's `from`/`to`.

use fxq_common::{FxqError, Result};
use sqlparser::ast::{BinaryOperator, Expr as SqlExpr, FunctionArg, FunctionArgExpr, UnaryOperator, Value};

use crate::entity_table::TableSet;
use crate::expr::{comparison_op, ComparisonOp, Literal};
use crate::fetch_xml::{ConditionOperator, FetchCondition, FetchFilter, FilterItem, FilterType};
use crate::sql_frontend::{column_parts, last_part, object_name_last, plain_function_args};

#[derive(Debug, Clone, Default)]
pub(crate) struct FilterContext {
    in_where: bool,
    in_or: bool,
    quoted_identifiers: bool,
    /// `(left, right)` identifier parts of the join equality, once found.
    pub join_columns: Option<(Vec<String>, Vec<String>)>,
}

impl FilterContext {
    pub fn where_clause(quoted_identifiers: bool) -> Self {
        Self {
            in_where: true,
            quoted_identifiers,
            ..Self::default()
        }
    }

    pub fn join(quoted_identifiers: bool) -> Self {
        Self {
            in_where: false,
            quoted_identifiers,
            ..Self::default()
        }
    }
}

/// One side of a comparison.
enum Operand<'e> {
    Column(Vec<String>),
    /// `None` is the NULL literal.
    Literal(Option<String>),
    Function(&'e sqlparser::ast::Function),
}

/// Lower `expr` into `criteria`. Conditions on tables other than `target` carry
/// that table's reference name as `entityname`.
pub(crate) fn lower_filter(
    expr: &SqlExpr,
    criteria: &mut FetchFilter,
    tables: &TableSet,
    target: usize,
    ctx: &mut FilterContext,
) -> Result<()> {
    match expr {
        SqlExpr::BinaryOp {
            left,
            op: op @ (BinaryOperator::And | BinaryOperator::Or),
            right,
        } => {
            let filter_type = if *op == BinaryOperator::And {
                FilterType::And
            } else {
                FilterType::Or
            };
            let was_or = ctx.in_or;
            ctx.in_or |= filter_type == FilterType::Or;
            if criteria.filter_type == FilterType::Unset || criteria.filter_type == filter_type {
                criteria.filter_type = filter_type;
                lower_filter(left, criteria, tables, target, ctx)?;
                lower_filter(right, criteria, tables, target, ctx)?;
            } else {
                let mut sub = FetchFilter::new(filter_type);
                lower_filter(left, &mut sub, tables, target, ctx)?;
                lower_filter(right, &mut sub, tables, target, ctx)?;
                criteria.items.push(FilterItem::Filter(sub));
            }
            ctx.in_or = was_or;
        }
        SqlExpr::Nested(inner) => {
            let mut sub = FetchFilter::new(FilterType::Unset);
            lower_filter(inner, &mut sub, tables, target, ctx)?;
            if sub.filter_type == FilterType::Unset {
                sub.filter_type = FilterType::And;
            }
            if !sub.items.is_empty() {
                criteria.items.push(FilterItem::Filter(sub));
            }
        }
        SqlExpr::BinaryOp { left, op, right } => {
            let Some(op) = comparison_op(op) else {
                return Err(FxqError::unsupported("Unhandled WHERE clause", expr));
            };
            lower_comparison(expr, left, op, right, criteria, tables, target, ctx)?;
        }
        SqlExpr::IsNull(inner) | SqlExpr::IsNotNull(inner) => {
            let parts = require_column(inner, expr)?;
            let operator = if matches!(expr, SqlExpr::IsNull(_)) {
                ConditionOperator::Null
            } else {
                ConditionOperator::NotNull
            };
            criteria.items.push(condition(tables, target, &parts, expr, operator, None, Vec::new())?);
        }
        SqlExpr::Like {
            negated,
            expr: inner,
            pattern,
            escape_char,
            ..
        } => {
            if escape_char.is_some() {
                return Err(FxqError::unsupported("Unhandled LIKE escape", expr));
            }
            let parts = require_column(inner, expr)?;
            let pattern = match operand(pattern, ctx)? {
                Operand::Literal(Some(text)) if is_string(pattern, ctx) => text,
                _ => return Err(FxqError::unsupported("LIKE pattern must be a string literal", expr)),
            };
            let operator = if *negated {
                ConditionOperator::NotLike
            } else {
                ConditionOperator::Like
            };
            criteria.items.push(condition(
                tables,
                target,
                &parts,
                expr,
                operator,
                Some(pattern),
                Vec::new(),
            )?);
        }
        SqlExpr::InList {
            expr: inner,
            list,
            negated,
        } => {
            let parts = require_column(inner, expr)?;
            let values = list
                .iter()
                .map(|item| match operand(item, ctx)? {
                    Operand::Literal(Some(v)) => Ok(v),
                    _ => Err(FxqError::unsupported("IN list must contain only literals", item)),
                })
                .collect::<Result<Vec<_>>>()?;
            let operator = if *negated {
                ConditionOperator::NotIn
            } else {
                ConditionOperator::In
            };
            criteria.items.push(condition(tables, target, &parts, expr, operator, None, values)?);
        }
        SqlExpr::InSubquery { .. } => {
            return Err(FxqError::unsupported(
                "Subquery in IN clause; rewrite the query as a join",
                expr,
            ))
        }
        SqlExpr::Between {
            expr: inner,
            negated,
            low,
            high,
        } => {
            let parts = require_column(inner, expr)?;
            let bounds = [low, high]
                .into_iter()
                .map(|bound| match operand(bound, ctx)? {
                    Operand::Literal(Some(v)) => Ok(v),
                    _ => Err(FxqError::unsupported("BETWEEN bounds must be literals", bound)),
                })
                .collect::<Result<Vec<_>>>()?;
            let operator = if *negated {
                ConditionOperator::NotBetween
            } else {
                ConditionOperator::Between
            };
            criteria.items.push(condition(tables, target, &parts, expr, operator, None, bounds)?);
        }
        other => return Err(FxqError::unsupported("Unhandled WHERE clause", other)),
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn lower_comparison(
    expr: &SqlExpr,
    left: &SqlExpr,
    op: ComparisonOp,
    right: &SqlExpr,
    criteria: &mut FetchFilter,
    tables: &TableSet,
    target: usize,
    ctx: &mut FilterContext,
) -> Result<()> {
    match (operand(left, ctx)?, operand(right, ctx)?) {
        (Operand::Column(l), Operand::Column(r)) => {
            if ctx.in_where {
                let message = if ctx.quoted_identifiers {
                    "Comparison between two columns; use single quotes for string literals"
                } else {
                    "Comparison between two columns"
                };
                return Err(FxqError::unsupported(message, expr));
            }
            if op != ComparisonOp::Eq || ctx.in_or || ctx.join_columns.is_some() {
                return Err(FxqError::unsupported("Unsupported join condition", expr));
            }
            ctx.join_columns = Some((l, r));
        }
        (Operand::Column(parts), Operand::Literal(value)) => {
            push_literal_condition(criteria, tables, target, &parts, expr, op, value)?
        }
        (Operand::Literal(value), Operand::Column(parts)) => {
            push_literal_condition(criteria, tables, target, &parts, expr, op.mirrored(), value)?
        }
        (Operand::Column(parts), Operand::Function(func))
        | (Operand::Function(func), Operand::Column(parts)) => {
            if op != ComparisonOp::Eq {
                return Err(FxqError::unsupported(
                    "Condition functions can only be compared with '='",
                    expr,
                ));
            }
            let name = object_name_last(&func.name);
            let operator = ConditionOperator::from_function_name(&name)
                .ok_or_else(|| FxqError::unsupported("Unknown condition function", func))?;
            let args = plain_function_args(func)?;
            let value = match args.args.as_slice() {
                [] => None,
                [FunctionArg::Unnamed(FunctionArgExpr::Expr(arg))] => match operand(arg, ctx)? {
                    Operand::Literal(v) => v,
                    _ => {
                        return Err(FxqError::unsupported(
                            "Condition function parameter must be a literal",
                            func,
                        ))
                    }
                },
                _ => {
                    return Err(FxqError::unsupported(
                        "Condition functions take at most one parameter",
                        func,
                    ))
                }
            };
            criteria
                .items
                .push(condition(tables, target, &parts, expr, operator, value, Vec::new())?);
        }
        _ => return Err(FxqError::unsupported("Unhandled comparison", expr)),
    }
    Ok(())
}

fn push_literal_condition(
    criteria: &mut FetchFilter,
    tables: &TableSet,
    target: usize,
    parts: &[String],
    expr: &SqlExpr,
    op: ComparisonOp,
    value: Option<String>,
) -> Result<()> {
    if value.is_none() {
        return Err(FxqError::unsupported(
            "Comparison with NULL; use IS [NOT] NULL",
            expr,
        ));
    }
    let operator = match op {
        ComparisonOp::Eq => ConditionOperator::Eq,
        ComparisonOp::NotEq => ConditionOperator::Ne,
        ComparisonOp::Gt => ConditionOperator::Gt,
        ComparisonOp::GtEq => ConditionOperator::Ge,
        ComparisonOp::Lt => ConditionOperator::Lt,
        ComparisonOp::LtEq => ConditionOperator::Le,
    };
    criteria
        .items
        .push(condition(tables, target, parts, expr, operator, value, Vec::new())?);
    Ok(())
}

fn condition(
    tables: &TableSet,
    target: usize,
    parts: &[String],
    fragment: &SqlExpr,
    operator: ConditionOperator,
    value: Option<String>,
    values: Vec<String>,
) -> Result<FilterItem> {
    let table = tables.column_table(parts, fragment)?;
    let entity_name = (table != target).then(|| tables.get(table).reference_name().to_string());
    Ok(FilterItem::Condition(FetchCondition {
        entity_name,
        attribute: last_part(parts),
        operator,
        value,
        values,
    }))
}

fn require_column(expr: &SqlExpr, fragment: &SqlExpr) -> Result<Vec<String>> {
    match expr {
        SqlExpr::Identifier(_) | SqlExpr::CompoundIdentifier(_) => column_parts(expr)
            .ok_or_else(|| FxqError::unsupported("Unhandled WHERE clause", fragment)),
        _ => Err(FxqError::unsupported(
            "Left operand must be a column",
            fragment,
        )),
    }
}

fn is_string(expr: &SqlExpr, ctx: &FilterContext) -> bool {
    match expr {
        SqlExpr::Value(Value::SingleQuotedString(_) | Value::NationalStringLiteral(_)) => true,
        SqlExpr::Identifier(id) => id.quote_style == Some('"') && !ctx.quoted_identifiers,
        _ => false,
    }
}

fn operand<'e>(expr: &'e SqlExpr, ctx: &FilterContext) -> Result<Operand<'e>> {
    Ok(match expr {
        SqlExpr::Identifier(id) if id.quote_style == Some('"') && !ctx.quoted_identifiers => {
            Operand::Literal(Some(id.value.clone()))
        }
        SqlExpr::Identifier(_) | SqlExpr::CompoundIdentifier(_) => {
            Operand::Column(column_parts(expr).unwrap_or_default())
        }
        SqlExpr::Value(Value::SingleQuotedString(s) | Value::NationalStringLiteral(s)) => {
            Operand::Literal(Some(s.clone()))
        }
        SqlExpr::Value(Value::Number(n, _)) => Operand::Literal(Some(number_text(n, expr)?)),
        SqlExpr::Value(Value::Null) => Operand::Literal(None),
        SqlExpr::UnaryOp {
            op: UnaryOperator::Minus,
            expr: inner,
        } => match inner.as_ref() {
            SqlExpr::Value(Value::Number(n, _)) => {
                Operand::Literal(Some(number_text(&format!("-{n}"), expr)?))
            }
            _ => return Err(FxqError::unsupported("Unhandled unary minus", expr)),
        },
        SqlExpr::Function(func) => Operand::Function(func),
        other => return Err(FxqError::unsupported("Unhandled WHERE clause", other)),
    })
}

/// Invariant (period-decimal) rendering of a numeric literal.
fn number_text(text: &str, expr: &SqlExpr) -> Result<String> {
    let rendered = match Literal::from_number(text) {
        Literal::Integer(t) => t.parse::<i32>().map(|v| v.to_string()).ok(),
        Literal::Numeric(t) | Literal::Real(t) => t.parse::<f64>().map(|v| v.to_string()).ok(),
        _ => None,
    };
    rendered.ok_or_else(|| FxqError::semantic("Invalid numeric literal", expr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_table::EntityTable;
    use fxq_metadata::{AttributeMetadata, AttributeType, Catalog, EntityMetadata};
    use sqlparser::dialect::MsSqlDialect;
    use sqlparser::parser::Parser;

    fn tables() -> TableSet {
        let mut cat = Catalog::new();
        cat.register_entity(
            EntityMetadata::new("contact", "contactid")
                .with_attribute(AttributeMetadata::new("contactid", AttributeType::Uniqueidentifier))
                .with_attribute(AttributeMetadata::new("firstname", AttributeType::String))
                .with_attribute(AttributeMetadata::new("age", AttributeType::Integer)),
        );
        let mut tables = TableSet::new();
        tables
            .add(EntityTable::root(&cat, "contact", None).expect("root"), "contact")
            .expect("add");
        tables
    }

    fn lower(sql: &str, quoted_identifiers: bool) -> Result<FetchFilter> {
        let expr = Parser::new(&MsSqlDialect {})
            .try_with_sql(sql)
            .expect("tokenize")
            .parse_expr()
            .expect("parse");
        let mut filter = FetchFilter::new(FilterType::Unset);
        let mut ctx = FilterContext::where_clause(quoted_identifiers);
        lower_filter(&expr, &mut filter, &tables(), 0, &mut ctx)?;
        Ok(filter)
    }

    #[test]
    fn mixed_operators_open_sub_filters() {
        let filter = lower("firstname = 'a' AND (age > 1 OR age < 0) AND age <> 5", true)
            .expect("lower");
        assert_eq!(filter.filter_type, FilterType::And);
        assert_eq!(filter.items.len(), 3);
        match &filter.items[1] {
            FilterItem::Filter(sub) => {
                assert_eq!(sub.filter_type, FilterType::Or);
                assert_eq!(sub.condition_count(), 2);
            }
            other => panic!("expected sub-filter, got {other:?}"),
        }
    }

    #[test]
    fn literal_on_left_mirrors_operator() {
        let filter = lower("10 < age", true).expect("lower");
        let cond = filter.conditions().next().expect("condition");
        assert_eq!(cond.operator, ConditionOperator::Gt);
        assert_eq!(cond.value.as_deref(), Some("10"));
    }

    #[test]
    fn numbers_render_invariantly() {
        let filter = lower("age = 1.50", true).expect("lower");
        let cond = filter.conditions().next().expect("condition");
        assert_eq!(cond.value.as_deref(), Some("1.5"));
    }

    #[test]
    fn condition_functions_become_native_operators() {
        let filter = lower("age = lastxdays(3)", true).expect("lower");
        let cond = filter.conditions().next().expect("condition");
        assert_eq!(cond.operator, ConditionOperator::LastXDays);
        assert_eq!(cond.value.as_deref(), Some("3"));
    }

    #[test]
    fn double_quotes_follow_quoted_identifier_setting() {
        let err = lower("firstname = \"Mark\"", true).expect_err("column compare");
        assert!(err.to_string().contains("single quotes"), "{err}");

        let filter = lower("firstname = \"Mark\"", false).expect("literal");
        let cond = filter.conditions().next().expect("condition");
        assert_eq!(cond.value.as_deref(), Some("Mark"));
    }

    #[test]
    fn in_subquery_suggests_join() {
        let err = lower("age IN (SELECT age FROM contact)", true).expect_err("subquery");
        assert!(err.to_string().contains("rewrite the query as a join"), "{err}");
    }
}

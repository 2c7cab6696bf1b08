//! Structural validation of common table expressions.
//!
//! A CTE is recursive once its definition references its own name. The
//! clause restrictions that apply to every CTE (ORDER BY without a row limit,
//! `FOR BROWSE`, `INTO`) are checked unconditionally; the remaining rules only
//! bind the recursive members of a recursive CTE.

use std::ops::ControlFlow;

use fxq_common::{FxqError, Result};
use sqlparser::ast::{
    visit_relations, Cte, Expr as SqlExpr, ForClause, GroupByExpr, JoinConstraint, JoinOperator,
    ObjectName, Query, Select, SelectItem, SetExpr, SetOperator, SetQuantifier, TableFactor,
    TableWithJoins, Visit, Visitor,
};
use tracing::debug;

const AGGREGATES: &[&str] = &[
    "avg", "count", "count_big", "max", "min", "stdev", "stdevp", "sum", "var", "varp",
];

/// Outcome of validating one CTE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CteInfo {
    pub name: String,
    pub is_recursive: bool,
}

/// Validate one CTE definition.
pub fn validate_cte(cte: &Cte) -> Result<CteInfo> {
    let name = cte.alias.name.value.clone();
    let is_recursive = references(cte.query.as_ref(), &name);
    let validator = CteValidator { name: &name };

    validator.check_query(&cte.query)?;
    if is_recursive {
        validator.check_recursive_body(&cte.query.body)?;
    }
    debug!(cte = %name, recursive = is_recursive, "validated common table expression");
    Ok(CteInfo { name, is_recursive })
}

fn references<V: Visit>(node: &V, name: &str) -> bool {
    visit_relations(node, |relation| {
        if is_named(relation, name) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })
    .is_break()
}

fn is_named(relation: &ObjectName, name: &str) -> bool {
    matches!(relation.0.as_slice(), [single] if single.value.eq_ignore_ascii_case(name))
}

struct CteValidator<'n> {
    name: &'n str,
}

impl CteValidator<'_> {
    fn error(&self, message: impl Into<String>, fragment: impl std::fmt::Display) -> FxqError {
        FxqError::semantic(message, fragment)
    }

    fn recursive_part(&self, what: &str, fragment: impl std::fmt::Display) -> FxqError {
        self.error(
            format!(
                "{what} is not allowed in the recursive part of a recursive common table expression '{}'",
                self.name
            ),
            fragment,
        )
    }

    // Rules for every CTE.

    fn check_query(&self, query: &Query) -> Result<()> {
        let limited = query.limit.is_some()
            || query.offset.is_some()
            || query.fetch.is_some()
            || matches!(query.body.as_ref(), SetExpr::Select(s) if s.top.is_some());
        if query.order_by.is_some() && !limited {
            return Err(self.error(
                format!(
                    "The ORDER BY clause is invalid in common table expression '{}' unless TOP, OFFSET or FETCH is also specified",
                    self.name
                ),
                query,
            ));
        }
        if matches!(query.for_clause, Some(ForClause::Browse)) {
            return Err(self.error("The FOR BROWSE clause is not allowed in common table expressions", query));
        }
        self.check_set_expr(&query.body)
    }

    fn check_set_expr(&self, body: &SetExpr) -> Result<()> {
        match body {
            SetExpr::Select(select) => {
                if select.into.is_some() {
                    return Err(self.error("SELECT INTO is not allowed in common table expressions", select));
                }
                Ok(())
            }
            SetExpr::Query(query) => self.check_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.check_set_expr(left)?;
                self.check_set_expr(right)
            }
            _ => Ok(()),
        }
    }

    // Rules for recursive CTEs.

    fn check_recursive_body(&self, body: &SetExpr) -> Result<()> {
        match body {
            SetExpr::SetOperation {
                op,
                set_quantifier,
                left,
                right,
            } => {
                if *op != SetOperator::Union || *set_quantifier != SetQuantifier::All {
                    return Err(self.missing_union_all(body));
                }
                self.check_member(left)?;
                self.check_member(right)
            }
            SetExpr::Query(query) => self.check_recursive_body(&query.body),
            other => Err(self.missing_union_all(other)),
        }
    }

    fn missing_union_all(&self, fragment: &SetExpr) -> FxqError {
        self.error(
            format!(
                "Recursive common table expression '{}' does not contain a top-level UNION ALL operator",
                self.name
            ),
            fragment,
        )
    }

    fn check_member(&self, member: &SetExpr) -> Result<()> {
        match member {
            SetExpr::SetOperation { .. } => self.check_recursive_body(member),
            SetExpr::Query(query) if references(query.as_ref(), self.name) => {
                if query.limit.is_some() || query.offset.is_some() || query.fetch.is_some() {
                    return Err(self.recursive_part("TOP or OFFSET", query));
                }
                self.check_member(&query.body)
            }
            SetExpr::Select(select) if references(select.as_ref(), self.name) => {
                self.check_recursive_select(select)
            }
            _ => Ok(()),
        }
    }

    fn check_recursive_select(&self, select: &Select) -> Result<()> {
        if select.distinct.is_some() {
            return Err(self.recursive_part("DISTINCT", select));
        }
        if select.top.is_some() {
            return Err(self.recursive_part("TOP", select));
        }
        let grouped = match &select.group_by {
            GroupByExpr::All(_) => true,
            GroupByExpr::Expressions(exprs, _) => !exprs.is_empty(),
        };
        if grouped {
            return Err(self.recursive_part("GROUP BY", select));
        }
        if select.having.is_some() {
            return Err(self.recursive_part("HAVING", select));
        }

        let mut scan = ExprScan::new(self.name);
        for item in &select.projection {
            if let SelectItem::UnnamedExpr(e) | SelectItem::ExprWithAlias { expr: e, .. } = item {
                scan.scan(e);
            }
        }
        if let Some(selection) = &select.selection {
            scan.scan(selection);
        }

        // Self-references are counted per FROM clause.
        let mut self_references = 0;
        for twj in &select.from {
            self.check_from(twj, &mut self_references, &mut scan)?;
        }
        if self_references > 1 {
            return Err(self.error(
                format!(
                    "Recursive member of a common table expression '{}' has multiple recursive references",
                    self.name
                ),
                select,
            ));
        }
        if scan.aggregate {
            return Err(self.recursive_part("A scalar aggregate", select));
        }
        if scan.recursive_subquery {
            return Err(self.error(
                format!(
                    "Recursive references to common table expression '{}' are not allowed in subqueries",
                    self.name
                ),
                select,
            ));
        }
        Ok(())
    }

    fn check_from(
        &self,
        twj: &TableWithJoins,
        self_references: &mut usize,
        scan: &mut ExprScan<'_>,
    ) -> Result<()> {
        self.check_factor(&twj.relation, self_references, scan)?;
        for join in &twj.joins {
            let constraint = match &join.join_operator {
                JoinOperator::Inner(c) => Some(c),
                JoinOperator::CrossJoin => None,
                _ => return Err(self.recursive_part("An outer join", join)),
            };
            if let Some(JoinConstraint::On(on)) = constraint {
                scan.scan(on);
            }
            self.check_factor(&join.relation, self_references, scan)?;
        }
        Ok(())
    }

    fn check_factor(
        &self,
        factor: &TableFactor,
        self_references: &mut usize,
        scan: &mut ExprScan<'_>,
    ) -> Result<()> {
        match factor {
            TableFactor::Table {
                name, with_hints, ..
            } if is_named(name, self.name) => {
                *self_references += 1;
                if !with_hints.is_empty() {
                    return Err(self.recursive_part("A table hint on the recursive reference", factor));
                }
            }
            TableFactor::Derived { subquery, .. } => {
                if references(subquery.as_ref(), self.name) {
                    scan.recursive_subquery = true;
                }
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.check_from(table_with_joins, self_references, scan)?,
            _ => {}
        }
        Ok(())
    }
}

/// Expression walk flagging top-level aggregates and self-referencing subqueries.
struct ExprScan<'n> {
    name: &'n str,
    depth: usize,
    aggregate: bool,
    recursive_subquery: bool,
}

impl<'n> ExprScan<'n> {
    fn new(name: &'n str) -> Self {
        Self {
            name,
            depth: 0,
            aggregate: false,
            recursive_subquery: false,
        }
    }

    fn scan(&mut self, expr: &SqlExpr) {
        let _ = expr.visit(self);
    }
}

impl Visitor for ExprScan<'_> {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if references(query, self.name) {
            self.recursive_subquery = true;
        }
        self.depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.depth = self.depth.saturating_sub(1);
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &SqlExpr) -> ControlFlow<Self::Break> {
        if self.depth == 0 {
            if let SqlExpr::Function(func) = expr {
                let name = func
                    .name
                    .0
                    .last()
                    .map(|i| i.value.to_ascii_lowercase())
                    .unwrap_or_default();
                if func.over.is_none() && AGGREGATES.contains(&name.as_str()) {
                    self.aggregate = true;
                }
            }
        }
        ControlFlow::Continue(())
    }
}

use std::collections::HashMap;

use fxq_common::{CompilerConfig, FxqError, Result};
use fxq_metadata::MetadataProvider;
use sqlparser::ast::{
    GroupByExpr, Join, JoinConstraint, JoinOperator, OrderBy, Query as SqlQuery, SelectItem,
    SetExpr, TableFactor, TableWithJoins,
};
use tracing::debug;

use crate::cte_validator::validate_cte;
use crate::evaluate::type_of;
use crate::expr::{BooleanOp, ComparisonOp, Expr};
use crate::fetch_xml::{FetchEntity, FetchItem, FetchXml};
use crate::optimizer::Optimizer;
use crate::physical_plan::{
    merge_schemas, FetchXmlScanExec, FilterExec, JoinType, MergeJoinExec, NestedLoopJoinExec,
    PhysicalPlan, SelectColumn, SelectExec, SortExec, SortKey, TableSpoolExec,
};
use crate::schema::NodeSchema;
use crate::sql_frontend::object_name_last;
use crate::types::ScalarType;

/// Builds physical operator trees for queries outside the single-document
/// subset.
///
/// Contracts:
/// - every table reference becomes a [`FetchXmlScanExec`] over all readable
///   attributes; projection pruning is left to the optimizer;
/// - an equi-join whose key is one side's primary key becomes a merge join
///   with the key side on the right, anything else a nested loop;
/// - non-recursive CTEs are inlined where referenced; recursive ones are
///   validated and then rejected.
pub struct ExecutionPlanBuilder<'a> {
    metadata: &'a dyn MetadataProvider,
    config: &'a CompilerConfig,
    optimizer: Option<&'a Optimizer>,
}

type CteScope = HashMap<String, PhysicalPlan>;

impl<'a> ExecutionPlanBuilder<'a> {
    pub fn new(metadata: &'a dyn MetadataProvider, config: &'a CompilerConfig) -> Self {
        Self {
            metadata,
            config,
            optimizer: None,
        }
    }

    /// Use `optimizer` (and its custom rules) instead of a default one.
    pub fn with_optimizer(mut self, optimizer: &'a Optimizer) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    pub fn build(&self, query: &SqlQuery) -> Result<PhysicalPlan> {
        let mut ctes = CteScope::new();
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                let info = validate_cte(cte)?;
                if info.is_recursive {
                    return Err(FxqError::unsupported(
                        format!(
                            "Recursive common table expression '{}' cannot be executed",
                            info.name
                        ),
                        cte,
                    ));
                }
                if cte.query.with.is_some() {
                    return Err(FxqError::unsupported("Nested WITH clause", cte));
                }
                let mut plan = self.build_query(&cte.query, &ctes)?;
                if let PhysicalPlan::Select(select) = &mut plan {
                    select.alias = Some(info.name.clone());
                    if !cte.alias.columns.is_empty() {
                        if cte.alias.columns.len() != select.columns.len() {
                            return Err(FxqError::semantic(
                                format!(
                                    "'{}' has fewer or more columns than were specified in the column list",
                                    info.name
                                ),
                                cte,
                            ));
                        }
                        for (column, name) in select.columns.iter_mut().zip(&cte.alias.columns) {
                            column.output_name = name.value.clone();
                        }
                    }
                }
                plan.schema(self.metadata)?;
                ctes.insert(info.name.to_lowercase(), plan);
            }
        }

        let plan = self.build_query(query, &ctes)?;
        if !self.config.optimize_plans {
            return Ok(plan);
        }
        match self.optimizer {
            Some(optimizer) => optimizer.optimize(plan, self.metadata),
            None => Optimizer::new().optimize(plan, self.metadata),
        }
    }

    fn build_query(&self, query: &SqlQuery, ctes: &CteScope) -> Result<PhysicalPlan> {
        if query.limit.is_some() || query.offset.is_some() || query.fetch.is_some() {
            return Err(FxqError::unsupported(
                "TOP/OFFSET are not supported in execution plans",
                query,
            ));
        }
        if query.for_clause.is_some() {
            return Err(FxqError::unsupported("Unhandled SELECT FOR clause", query));
        }
        let SetExpr::Select(select) = query.body.as_ref() else {
            return Err(FxqError::unsupported("Unhandled SELECT query expression", &query.body));
        };
        if select.top.is_some() {
            return Err(FxqError::unsupported(
                "TOP/OFFSET are not supported in execution plans",
                select,
            ));
        }
        if select.distinct.is_some() {
            return Err(FxqError::unsupported("DISTINCT is not supported in execution plans", select));
        }
        if select.into.is_some() {
            return Err(FxqError::unsupported("Unhandled SELECT INTO clause", select));
        }
        let grouped = match &select.group_by {
            GroupByExpr::All(_) => true,
            GroupByExpr::Expressions(exprs, _) => !exprs.is_empty(),
        };
        if grouped || select.having.is_some() {
            return Err(FxqError::unsupported(
                "GROUP BY/HAVING are not supported in execution plans",
                select,
            ));
        }

        // FROM + JOINs
        let mut from = select.from.iter();
        let Some(first) = from.next() else {
            return Err(FxqError::unsupported("No source entity specified", select));
        };
        let mut plan = self.table_with_joins(first, ctes)?;
        for twj in from {
            let right = self.table_with_joins(twj, ctes)?;
            plan = PhysicalPlan::NestedLoopJoin(NestedLoopJoinExec {
                left: Box::new(plan),
                right: Box::new(PhysicalPlan::TableSpool(TableSpoolExec {
                    input: Box::new(right),
                })),
                join_type: JoinType::Inner,
                condition: None,
            });
        }

        // WHERE
        if let Some(selection) = &select.selection {
            let schema = plan.schema(self.metadata)?;
            let predicate = bind(&Expr::from_sql(selection)?, &schema)?;
            if type_of(&predicate, &schema)? != ScalarType::Boolean {
                return Err(FxqError::unsupported(
                    "WHERE clause must be a boolean expression",
                    selection,
                ));
            }
            plan = PhysicalPlan::Filter(FilterExec {
                input: Box::new(plan),
                predicate,
            });
        }

        // ORDER BY
        if let Some(order_by) = &query.order_by {
            plan = self.sort(plan, order_by)?;
        }

        // SELECT
        let schema = plan.schema(self.metadata)?;
        let mut columns = Vec::new();
        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                    let Expr::Column(name) = Expr::from_sql(expr)? else {
                        return Err(FxqError::unsupported(
                            "Only column references are supported in execution plans",
                            expr,
                        ));
                    };
                    let source = schema.resolve_column(&name, expr)?;
                    let output_name = match item {
                        SelectItem::ExprWithAlias { alias, .. } => alias.value.clone(),
                        _ => unqualified(&name).to_string(),
                    };
                    columns.push(SelectColumn {
                        source,
                        output_name,
                    });
                }
                SelectItem::Wildcard(_) => {
                    columns.extend(schema.columns().map(|(name, _)| SelectColumn {
                        source: name.to_string(),
                        output_name: unqualified(name).to_string(),
                    }));
                }
                SelectItem::QualifiedWildcard(table, _) => {
                    let prefix = format!("{}.", object_name_last(table)).to_lowercase();
                    let before = columns.len();
                    columns.extend(
                        schema
                            .columns()
                            .filter(|(name, _)| name.to_lowercase().starts_with(&prefix))
                            .map(|(name, _)| SelectColumn {
                                source: name.to_string(),
                                output_name: unqualified(name).to_string(),
                            }),
                    );
                    if columns.len() == before {
                        return Err(FxqError::semantic(
                            format!("Unknown table '{}'", object_name_last(table)),
                            item,
                        ));
                    }
                }
            }
        }
        Ok(PhysicalPlan::Select(SelectExec {
            input: Box::new(plan),
            columns,
            alias: None,
        }))
    }

    fn sort(&self, input: PhysicalPlan, order_by: &OrderBy) -> Result<PhysicalPlan> {
        let schema = input.schema(self.metadata)?;
        let mut keys = Vec::new();
        for term in &order_by.exprs {
            if term.nulls_first.is_some() || term.with_fill.is_some() {
                return Err(FxqError::unsupported("Unhandled ORDER BY option", term));
            }
            let expr = bind(&Expr::from_sql(&term.expr)?, &schema)?;
            if !type_of(&expr, &schema)?.is_orderable() {
                return Err(FxqError::unsupported("ORDER BY expression is not orderable", term));
            }
            keys.push(SortKey {
                expr,
                descending: term.asc == Some(false),
            });
        }
        Ok(PhysicalPlan::Sort(SortExec {
            input: Box::new(input),
            keys,
            ignore_for_fetch_xml_folding: false,
        }))
    }

    fn table_with_joins(&self, twj: &TableWithJoins, ctes: &CteScope) -> Result<PhysicalPlan> {
        let mut plan = self.table_factor(&twj.relation, ctes)?;
        for join in &twj.joins {
            let right = self.table_factor(&join.relation, ctes)?;
            plan = self.join(plan, right, join)?;
        }
        Ok(plan)
    }

    fn table_factor(&self, factor: &TableFactor, ctes: &CteScope) -> Result<PhysicalPlan> {
        match factor {
            TableFactor::Table {
                name,
                alias,
                args,
                with_hints,
                ..
            } => {
                if args.is_some() {
                    return Err(FxqError::unsupported("Unhandled table-valued function", factor));
                }
                let table_name = object_name_last(name);
                let alias = alias.as_ref().map(|a| a.name.value.clone());

                if name.0.len() == 1 {
                    if let Some(cte) = ctes.get(&table_name.to_lowercase()) {
                        let mut plan = cte.clone();
                        if let (PhysicalPlan::Select(select), Some(alias)) = (&mut plan, alias) {
                            select.alias = Some(alias);
                        }
                        return Ok(plan);
                    }
                }

                let metadata = self.metadata.entity(&table_name)?;
                let mut no_lock = false;
                for hint in with_hints {
                    match hint {
                        sqlparser::ast::Expr::Identifier(id)
                            if id.value.eq_ignore_ascii_case("NOLOCK") =>
                        {
                            no_lock = true
                        }
                        other => return Err(FxqError::unsupported("Unsupported table hint", other)),
                    }
                }
                let mut entity = FetchEntity::new(metadata.logical_name.clone());
                entity.items.push(FetchItem::AllAttributes);
                let mut fetch = FetchXml::new(entity);
                fetch.no_lock = no_lock;
                Ok(PhysicalPlan::FetchXmlScan(FetchXmlScanExec {
                    alias: alias.unwrap_or(metadata.logical_name.clone()),
                    fetch,
                }))
            }
            TableFactor::Derived {
                subquery, alias, ..
            } => {
                let Some(alias) = alias else {
                    return Err(FxqError::semantic("Derived table requires an alias", factor));
                };
                if subquery.with.is_some() {
                    return Err(FxqError::unsupported("Nested WITH clause", factor));
                }
                let mut plan = self.build_query(subquery, ctes)?;
                if let PhysicalPlan::Select(select) = &mut plan {
                    select.alias = Some(alias.name.value.clone());
                }
                Ok(plan)
            }
            other => Err(FxqError::unsupported("Unhandled table reference", other)),
        }
    }

    fn join(&self, left: PhysicalPlan, right: PhysicalPlan, join: &Join) -> Result<PhysicalPlan> {
        let (join_type, constraint) = match &join.join_operator {
            JoinOperator::Inner(c) => (JoinType::Inner, c),
            JoinOperator::LeftOuter(c) => (JoinType::LeftOuter, c),
            _ => return Err(FxqError::unsupported("Unsupported join type", join)),
        };
        let JoinConstraint::On(on) = constraint else {
            return Err(FxqError::unsupported("Unsupported join constraint", join));
        };

        let left_schema = left.schema(self.metadata)?;
        let right_schema = right.schema(self.metadata)?;
        let combined = merge_schemas(&left_schema, &right_schema)?;
        let condition = bind(&Expr::from_sql(on)?, &combined)?;
        if type_of(&condition, &combined)? != ScalarType::Boolean {
            return Err(FxqError::unsupported("Join condition must be a boolean expression", on));
        }

        let key = and_leaves(&condition).into_iter().find_map(|leaf| {
            let Expr::Comparison {
                left: l,
                op: ComparisonOp::Eq,
                right: r,
            } = leaf
            else {
                return None;
            };
            let (Expr::Column(a), Expr::Column(b)) = (l.as_ref(), r.as_ref()) else {
                return None;
            };
            let on_left = |c: &str| left_schema.column_type(c).is_some();
            let on_right = |c: &str| right_schema.column_type(c).is_some();
            if on_left(a) && on_right(b) {
                Some((a.clone(), b.clone(), leaf))
            } else if on_left(b) && on_right(a) {
                Some((b.clone(), a.clone(), leaf))
            } else {
                None
            }
        });

        let is_pk = |schema: &NodeSchema, column: &str| {
            schema
                .primary_key()
                .is_some_and(|pk| pk.eq_ignore_ascii_case(column))
        };

        let merge = key.and_then(|(left_key, right_key, leaf)| {
            let residual = condition.remove_condition(leaf);
            if residual.is_some() && join_type != JoinType::Inner {
                return None;
            }
            if is_pk(&left_schema, left_key.as_str()) {
                Some((true, left_key, right_key, residual))
            } else if is_pk(&right_schema, right_key.as_str()) {
                Some((false, left_key, right_key, residual))
            } else {
                None
            }
        });

        let Some((swap, left_key, right_key, residual)) = merge else {
            debug!(condition = %condition, "planning nested loop join");
            return Ok(PhysicalPlan::NestedLoopJoin(NestedLoopJoinExec {
                left: Box::new(left),
                right: Box::new(right),
                join_type,
                condition: Some(condition),
            }));
        };

        // The side keyed on its primary key goes right.
        let (many, unique, many_key, unique_key, join_type) = if swap {
            (right, left, right_key, left_key, join_type.swapped())
        } else {
            (left, right, left_key, right_key, join_type)
        };
        debug!(
            left_key = %many_key,
            right_key = %unique_key,
            join_type = ?join_type,
            "planning merge join"
        );
        let mut plan = PhysicalPlan::MergeJoin(MergeJoinExec {
            left: Box::new(sorted_on(many, &many_key)),
            right: Box::new(sorted_on(unique, &unique_key)),
            left_key: many_key,
            right_key: unique_key,
            join_type,
        });
        if let Some(residual) = residual {
            plan = PhysicalPlan::Filter(FilterExec {
                input: Box::new(plan),
                predicate: residual,
            });
        }
        Ok(plan)
    }
}

fn sorted_on(input: PhysicalPlan, key: &str) -> PhysicalPlan {
    PhysicalPlan::Sort(SortExec {
        input: Box::new(input),
        keys: vec![SortKey {
            expr: Expr::column(key),
            descending: false,
        }],
        ignore_for_fetch_xml_folding: true,
    })
}

/// Conditions reachable through AND (and parentheses) only.
fn and_leaves(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::Boolean {
            left,
            op: BooleanOp::And,
            right,
        } => {
            let mut out = and_leaves(left);
            out.extend(and_leaves(right));
            out
        }
        Expr::Nested(inner) => and_leaves(inner),
        leaf => vec![leaf],
    }
}

/// Rewrite column references to the schema's normalized names.
fn bind(expr: &Expr, schema: &NodeSchema) -> Result<Expr> {
    Ok(match expr {
        Expr::Column(name) => Expr::Column(schema.resolve_column(name, name)?),
        Expr::Literal(_) => expr.clone(),
        Expr::Comparison { left, op, right } => Expr::Comparison {
            left: Box::new(bind(left, schema)?),
            op: *op,
            right: Box::new(bind(right, schema)?),
        },
        Expr::Boolean { left, op, right } => Expr::Boolean {
            left: Box::new(bind(left, schema)?),
            op: *op,
            right: Box::new(bind(right, schema)?),
        },
        Expr::Arithmetic { left, op, right } => Expr::Arithmetic {
            left: Box::new(bind(left, schema)?),
            op: *op,
            right: Box::new(bind(right, schema)?),
        },
        Expr::Not(inner) => Expr::Not(Box::new(bind(inner, schema)?)),
        Expr::Nested(inner) => Expr::Nested(Box::new(bind(inner, schema)?)),
        Expr::IsNull { expr: inner, negated } => Expr::IsNull {
            expr: Box::new(bind(inner, schema)?),
            negated: *negated,
        },
    })
}

fn unqualified(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

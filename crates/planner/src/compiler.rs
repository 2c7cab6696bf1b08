//! Statement routing between declarative lowering and the plan builder.

use fxq_common::{CompilerConfig, Result};
use fxq_metadata::MetadataProvider;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{Query as SqlQuery, SetExpr, Statement, TableFactor};
use tracing::{debug, info};

use crate::optimizer::Optimizer;
use crate::physical_plan::PhysicalPlan;
use crate::physical_planner::ExecutionPlanBuilder;
use crate::query::Query;
use crate::sql_frontend::Sql2FetchXml;

/// Outcome of compiling one statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompiledStatement {
    /// Expressible as a single FetchXML document.
    Fetch(Query),
    /// Needs in-memory operators over one or more documents.
    Plan(PlannedStatement),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStatement {
    /// Canonical SQL of the source statement.
    pub sql: String,
    pub plan: PhysicalPlan,
}

/// Parse `sql` once and compile every statement.
///
/// A failing statement aborts the batch with its error.
pub fn compile_sql(
    sql: &str,
    metadata: &dyn MetadataProvider,
    config: &CompilerConfig,
) -> Result<Vec<CompiledStatement>> {
    let statements = fxq_sql::parse_sql(sql, config.dialect)?;
    compile_batch(&statements, metadata, config, None)
}

/// Compile already-parsed statements, optionally with a caller-owned optimizer
/// carrying custom rules.
pub fn compile_batch(
    statements: &[Statement],
    metadata: &dyn MetadataProvider,
    config: &CompilerConfig,
    optimizer: Option<&Optimizer>,
) -> Result<Vec<CompiledStatement>> {
    let lowering = Sql2FetchXml::new(metadata, config);
    let mut builder = ExecutionPlanBuilder::new(metadata, config);
    if let Some(optimizer) = optimizer {
        builder = builder.with_optimizer(optimizer);
    }

    let mut out = Vec::with_capacity(statements.len());
    for stmt in statements {
        let compiled = match stmt {
            Statement::Query(q) if needs_plan(q) => {
                debug!(route = "plan", statement = %stmt, "routing statement");
                CompiledStatement::Plan(PlannedStatement {
                    sql: stmt.to_string(),
                    plan: builder.build(q)?,
                })
            }
            _ => {
                debug!(route = "fetch", statement = %stmt, "routing statement");
                CompiledStatement::Fetch(lowering.convert_statement(stmt)?)
            }
        };
        out.push(compiled);
    }
    info!(statements = out.len(), "compiled batch");
    Ok(out)
}

/// CTEs, comma-separated FROM lists and derived tables have no single-document form.
fn needs_plan(query: &SqlQuery) -> bool {
    if query.with.is_some() {
        return true;
    }
    let SetExpr::Select(select) = query.body.as_ref() else {
        return false;
    };
    select.from.len() > 1
        || select.from.iter().any(|t| {
            std::iter::once(&t.relation)
                .chain(t.joins.iter().map(|j| &j.relation))
                .any(|f| matches!(f, TableFactor::Derived { .. }))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxq_metadata::{AttributeMetadata, AttributeType, Catalog, EntityMetadata};

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.register_entity(
            EntityMetadata::new("account", "accountid")
                .with_attribute(AttributeMetadata::new("accountid", AttributeType::Uniqueidentifier))
                .with_attribute(AttributeMetadata::new("name", AttributeType::String)),
        );
        catalog
    }

    #[test]
    fn simple_select_routes_to_fetch_and_cte_to_plan() {
        let config = CompilerConfig::default();
        let out = compile_sql(
            "SELECT name FROM account; WITH a AS (SELECT name FROM account) SELECT name FROM a",
            &catalog(),
            &config,
        )
        .expect("compile");
        assert!(matches!(out[0], CompiledStatement::Fetch(Query::Select(_))));
        match &out[1] {
            CompiledStatement::Plan(p) => assert!(p.sql.starts_with("WITH a AS")),
            other => panic!("expected plan, got {other:?}"),
        }
    }

    #[test]
    fn failing_statement_fails_the_batch() {
        let err = compile_sql(
            "SELECT name FROM account; SELECT name FROM nosuchentity",
            &catalog(),
            &CompilerConfig::default(),
        )
        .expect_err("unknown entity");
        assert!(err.to_string().contains("nosuchentity"), "{err}");
    }
}

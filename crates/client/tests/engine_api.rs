use std::path::Path;
use std::sync::Arc;

use fxq_client::Engine;
use fxq_common::{CompilerConfig, FxqError};
use fxq_metadata::{Catalog, MetadataProvider};
use fxq_planner::{CompiledStatement, OptimizerRule, PhysicalPlan, Query};

const METADATA: &str = r#"[
    {
        "logical_name": "account",
        "primary_id_attribute": "accountid",
        "attributes": [
            { "logical_name": "accountid", "attribute_type": "uniqueidentifier" },
            { "logical_name": "name", "attribute_type": "string" }
        ]
    },
    {
        "logical_name": "contact",
        "primary_id_attribute": "contactid",
        "attributes": [
            { "logical_name": "contactid", "attribute_type": "uniqueidentifier" },
            { "logical_name": "fullname", "attribute_type": "string" },
            { "logical_name": "parentcustomerid", "attribute_type": "customer", "targets": ["account"] }
        ]
    }
]"#;

fn engine() -> Engine {
    Engine::new(
        CompilerConfig::default(),
        Catalog::from_json_str(METADATA).expect("catalog"),
    )
}

#[test]
fn compile_routes_each_statement() {
    let out = engine()
        .compile(
            "SELECT name FROM account; \
             SELECT c.fullname, a.name FROM contact c, account a WHERE c.parentcustomerid = a.accountid",
        )
        .expect("compile");
    assert_eq!(out.len(), 2);
    match &out[0] {
        CompiledStatement::Fetch(Query::Select(q)) => assert_eq!(q.columns, ["name"]),
        other => panic!("expected fetch, got {other:?}"),
    }
    assert!(matches!(out[1], CompiledStatement::Plan(_)));
}

#[test]
fn explain_renders_fetch_xml_and_plans() {
    let text = engine()
        .explain("SELECT name FROM account WHERE name = 'x'; WITH a AS (SELECT name FROM account) SELECT name FROM a")
        .expect("explain");
    assert!(text.contains("<condition attribute=\"name\" operator=\"eq\" value=\"x\" />"), "{text}");
    assert!(text.contains("FetchXmlScan alias="), "{text}");
}

#[test]
fn errors_surface_with_their_class() {
    let err = engine().compile("SELEC name").expect_err("parse");
    assert!(matches!(err, FxqError::Parse(_)), "{err:?}");

    let err = engine()
        .compile("SELECT name FROM account WHERE name = accountid")
        .expect_err("column comparison");
    assert!(matches!(err, FxqError::Unsupported { .. }), "{err:?}");
}

struct Passthrough;

impl OptimizerRule for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn rewrite(
        &self,
        plan: PhysicalPlan,
        _metadata: &dyn MetadataProvider,
    ) -> fxq_common::Result<PhysicalPlan> {
        Ok(plan)
    }
}

#[test]
fn optimizer_rules_are_shared_by_clones() {
    let engine = engine();
    let clone = engine.clone();
    assert!(!engine.register_optimizer_rule(Arc::new(Passthrough)));
    assert!(clone.deregister_optimizer_rule("passthrough"));
}

#[test]
fn missing_metadata_file_is_io_error() {
    let err = Engine::from_files(Path::new("/nonexistent/fxq-metadata.json"), None)
        .err()
        .expect("missing file");
    assert!(matches!(err, FxqError::Io(_)), "{err:?}");
}

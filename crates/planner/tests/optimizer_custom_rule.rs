mod common;

use std::sync::{Arc, Mutex};

use common::catalog;
use fxq_common::{CompilerConfig, SqlDialect};
use fxq_metadata::MetadataProvider;
use fxq_planner::{
    compile_batch, transform_up, CompiledStatement, Optimizer, OptimizerRule, PhysicalPlan,
};

/// Marks every scan as `no-lock`.
struct NoLockEverywhere;

impl OptimizerRule for NoLockEverywhere {
    fn name(&self) -> &str {
        "test_no_lock_everywhere"
    }

    fn rewrite(
        &self,
        plan: PhysicalPlan,
        _metadata: &dyn MetadataProvider,
    ) -> fxq_common::Result<PhysicalPlan> {
        Ok(transform_up(plan, &|node| match node {
            PhysicalPlan::FetchXmlScan(mut scan) => {
                scan.fetch.no_lock = true;
                PhysicalPlan::FetchXmlScan(scan)
            }
            other => other,
        }))
    }
}

struct Recorder {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl OptimizerRule for Recorder {
    fn name(&self) -> &str {
        self.name
    }

    fn rewrite(
        &self,
        plan: PhysicalPlan,
        _metadata: &dyn MetadataProvider,
    ) -> fxq_common::Result<PhysicalPlan> {
        self.log.lock().expect("log lock").push(self.name.to_string());
        Ok(plan)
    }
}

fn compile_with(optimizer: &Optimizer, sql: &str) -> PhysicalPlan {
    let statements = fxq_sql::parse_sql(sql, SqlDialect::MsSql).expect("parse");
    let mut out = compile_batch(
        &statements,
        &catalog(),
        &CompilerConfig::default(),
        Some(optimizer),
    )
    .expect("compile");
    match out.remove(0) {
        CompiledStatement::Plan(p) => p.plan,
        other => panic!("expected plan, got {other:?}"),
    }
}

fn scans(plan: &PhysicalPlan) -> Vec<&fxq_planner::FetchXmlScanExec> {
    match plan {
        PhysicalPlan::FetchXmlScan(scan) => vec![scan],
        other => other.children().into_iter().flat_map(scans).collect(),
    }
}

#[test]
fn custom_rule_runs_after_builtin_rules() {
    let optimizer = Optimizer::new();
    assert!(!optimizer.register_rule(Arc::new(NoLockEverywhere)));

    let plan = compile_with(
        &optimizer,
        "SELECT c.fullname, a.name FROM contact c, account a WHERE c.parentcustomerid = a.accountid",
    );
    let found = scans(&plan);
    assert_eq!(found.len(), 2);
    assert!(found.iter().all(|s| s.fetch.no_lock));

    // Select-over-select collapse happened before the custom rule saw the plan.
    let plan = compile_with(&optimizer, "WITH x AS (SELECT name FROM account) SELECT name FROM x");
    match &plan {
        PhysicalPlan::Select(select) => match select.input.as_ref() {
            PhysicalPlan::FetchXmlScan(scan) => assert!(scan.fetch.no_lock),
            other => panic!("expected scan, got {other:?}"),
        },
        other => panic!("expected select, got {other:?}"),
    }
}

#[test]
fn custom_rules_run_in_name_order_and_can_be_replaced() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let optimizer = Optimizer::new();
    for name in ["b_second", "a_first"] {
        optimizer.register_rule(Arc::new(Recorder {
            name,
            log: Arc::clone(&log),
        }));
    }
    assert!(optimizer.register_rule(Arc::new(Recorder {
        name: "a_first",
        log: Arc::clone(&log),
    })));

    compile_with(&optimizer, "WITH x AS (SELECT name FROM account) SELECT name FROM x");
    assert_eq!(*log.lock().expect("log lock"), ["a_first", "b_second"]);

    assert!(optimizer.deregister_rule("a_first"));
    assert!(!optimizer.deregister_rule("a_first"));
}

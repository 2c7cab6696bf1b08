use std::path::Path;
use std::sync::Arc;

use fxq_common::{CompilerConfig, Result};
use fxq_metadata::{Catalog, MetadataCache};
use fxq_planner::{
    compile_batch, explain_physical, explain_query, CompiledStatement, Optimizer, OptimizerRule,
};
use tracing::info;

#[derive(Clone)]
pub struct Engine {
    config: CompilerConfig,
    metadata: Arc<MetadataCache<Catalog>>,
    optimizer: Arc<Optimizer>,
}

impl Engine {
    pub fn new(config: CompilerConfig, catalog: Catalog) -> Self {
        Self {
            config,
            metadata: Arc::new(MetadataCache::new(catalog)),
            optimizer: Arc::new(Optimizer::new()),
        }
    }

    /// Load the metadata catalog and, optionally, a config file.
    pub fn from_files(metadata: impl AsRef<Path>, config: Option<&Path>) -> Result<Self> {
        let catalog = Catalog::load_from_json(metadata)?;
        let config = match config {
            Some(path) => CompilerConfig::from_json_file(path)?,
            None => CompilerConfig::default(),
        };
        info!(dialect = ?config.dialect, "engine ready");
        Ok(Self::new(config, catalog))
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compile every statement of `sql`.
    pub fn compile(&self, sql: &str) -> Result<Vec<CompiledStatement>> {
        let statements = fxq_sql::parse_sql(sql, self.config.dialect)?;
        compile_batch(
            &statements,
            self.metadata.as_ref(),
            &self.config,
            Some(self.optimizer.as_ref()),
        )
    }

    /// Human readable rendering of what `sql` compiles to.
    pub fn explain(&self, sql: &str) -> Result<String> {
        let rendered = self
            .compile(sql)?
            .iter()
            .map(|stmt| match stmt {
                CompiledStatement::Fetch(query) => explain_query(query),
                CompiledStatement::Plan(planned) => explain_physical(&planned.plan),
            })
            .collect::<Vec<_>>();
        Ok(rendered.join("\n"))
    }

    /// Register or replace a custom optimizer rule.
    ///
    /// Returns `true` when an existing rule with the same name was replaced.
    pub fn register_optimizer_rule(&self, rule: Arc<dyn OptimizerRule>) -> bool {
        self.optimizer.register_rule(rule)
    }

    /// Returns `true` when an existing rule was removed.
    pub fn deregister_optimizer_rule(&self, name: &str) -> bool {
        self.optimizer.deregister_rule(name)
    }
}

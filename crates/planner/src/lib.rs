//! SQL compiler core for fxq.
//!
//! Architecture role:
//! - lowers single statements to one FetchXML document ([`sql_frontend`], DML lowering)
//! - builds physical operator plans for queries one document cannot express
//!   ([`physical_planner`]) and rewrites them ([`optimizer`])
//! - routes each statement of a batch to one of the two ([`compiler`])
//!
//! Key modules:
//! - [`fetch_xml`]: native query document model and rendering
//! - [`schema`], [`types`], [`expr`], [`evaluate`]: column model and expression engine
//! - [`cte_validator`]: common table expression rules
//! - [`explain`]: text rendering of compiled output

pub mod compiler;
pub mod cte_validator;
mod dml;
pub mod entity_table;
pub mod evaluate;
pub mod explain;
pub mod expr;
pub mod fetch_xml;
pub mod optimizer;
pub mod physical_plan;
pub mod physical_planner;
pub mod query;
pub mod schema;
pub mod sql_frontend;
pub mod types;
mod where_clause;

pub use compiler::*;
pub use cte_validator::{validate_cte, CteInfo};
pub use dml::convert_attribute_value;
pub use explain::{explain_physical, explain_query};
pub use optimizer::*;
pub use physical_plan::*;
pub use physical_planner::ExecutionPlanBuilder;
pub use query::*;
pub use sql_frontend::Sql2FetchXml;

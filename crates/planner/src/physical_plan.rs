use fxq_common::{FxqError, Result};
use fxq_metadata::MetadataProvider;
use serde::{Deserialize, Serialize};

use crate::expr::Expr;
use crate::fetch_xml::{AggregateType, FetchItem, FetchItems, FetchXml};
use crate::schema::NodeSchema;
use crate::types::ScalarType;

/// The physical operator tree produced for queries the declarative lowering
/// cannot express on its own (CTEs, comma joins, multi-source joins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PhysicalPlan {
    /// Declarative document executed by the backend.
    FetchXmlScan(FetchXmlScanExec),
    /// Row-by-row join with an arbitrary condition.
    NestedLoopJoin(NestedLoopJoinExec),
    /// Equality join over inputs sorted on their keys.
    MergeJoin(MergeJoinExec),
    /// Sort.
    Sort(SortExec),
    /// Row filter.
    Filter(FilterExec),
    /// Materializes its input so it can be re-read.
    TableSpool(TableSpoolExec),
    /// Projection / renaming.
    Select(SelectExec),
}

impl PhysicalPlan {
    /// Returns direct child operators.
    pub fn children(&self) -> Vec<&PhysicalPlan> {
        match self {
            PhysicalPlan::FetchXmlScan(_) => vec![],
            PhysicalPlan::NestedLoopJoin(x) => vec![x.left.as_ref(), x.right.as_ref()],
            PhysicalPlan::MergeJoin(x) => vec![x.left.as_ref(), x.right.as_ref()],
            PhysicalPlan::Sort(x) => vec![x.input.as_ref()],
            PhysicalPlan::Filter(x) => vec![x.input.as_ref()],
            PhysicalPlan::TableSpool(x) => vec![x.input.as_ref()],
            PhysicalPlan::Select(x) => vec![x.input.as_ref()],
        }
    }

    /// Output columns of this node.
    ///
    /// Scan columns are qualified with the owning entity's alias
    /// (`alias.attribute`); a select node's columns are its output names,
    /// qualified with the select's alias when it has one.
    pub fn schema(&self, metadata: &dyn MetadataProvider) -> Result<NodeSchema> {
        match self {
            PhysicalPlan::FetchXmlScan(scan) => scan.schema(metadata),
            PhysicalPlan::NestedLoopJoin(join) => {
                let left = join.left.schema(metadata)?;
                let right = join.right.schema(metadata)?;
                let mut merged = merge_schemas(&left, &right)?;
                merged.set_primary_key(None);
                Ok(merged)
            }
            PhysicalPlan::MergeJoin(join) => {
                let left = join.left.schema(metadata)?;
                let right = join.right.schema(metadata)?;
                let mut merged = merge_schemas(&left, &right)?;
                let pk = match join.join_type {
                    JoinType::Inner | JoinType::LeftOuter => left.primary_key().map(str::to_string),
                    JoinType::RightOuter => None,
                };
                merged.set_primary_key(pk);
                Ok(merged)
            }
            PhysicalPlan::Sort(x) => x.input.schema(metadata),
            PhysicalPlan::Filter(x) => x.input.schema(metadata),
            PhysicalPlan::TableSpool(x) => x.input.schema(metadata),
            PhysicalPlan::Select(select) => select.schema(metadata),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
}

impl JoinType {
    /// Join type after swapping the two inputs.
    pub fn swapped(self) -> Self {
        match self {
            JoinType::Inner => JoinType::Inner,
            JoinType::LeftOuter => JoinType::RightOuter,
            JoinType::RightOuter => JoinType::LeftOuter,
        }
    }
}

/// Backend query over one entity and its link-entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchXmlScanExec {
    /// Alias qualifying the root entity's columns.
    pub alias: String,
    /// Document to execute.
    pub fetch: FetchXml,
}

impl FetchXmlScanExec {
    fn schema(&self, metadata: &dyn MetadataProvider) -> Result<NodeSchema> {
        let mut schema = NodeSchema::new();
        let entity = &self.fetch.entity;
        add_entity_columns(
            &mut schema,
            metadata,
            &self.alias,
            &entity.name,
            &entity.items,
        )?;
        if !self.fetch.aggregate {
            let root = metadata.entity(&entity.name)?;
            let pk = format!("{}.{}", self.alias, root.primary_id_attribute);
            if schema.column_type(&pk).is_some() {
                schema.set_primary_key(schema.contains_column(&pk));
            }
        }
        Ok(schema)
    }
}

fn add_entity_columns(
    schema: &mut NodeSchema,
    metadata: &dyn MetadataProvider,
    prefix: &str,
    entity_name: &str,
    items: &FetchItems,
) -> Result<()> {
    let entity = metadata.entity(entity_name)?;
    for item in items.iter() {
        match item {
            FetchItem::AllAttributes => {
                for attr in entity.readable_attributes() {
                    schema.add_qualified_column(
                        prefix,
                        &attr.logical_name,
                        ScalarType::for_attribute(attr.attribute_type),
                    );
                }
            }
            FetchItem::Attribute(attr) => {
                let base = entity
                    .attribute(&attr.name)
                    .map(|a| ScalarType::for_attribute(a.attribute_type))
                    .ok_or_else(|| {
                        FxqError::semantic(
                            format!("Unknown attribute '{}'", attr.name),
                            format!("{entity_name}.{}", attr.name),
                        )
                    })?;
                let data_type = match (attr.aggregate, attr.date_grouping) {
                    (Some(AggregateType::Count | AggregateType::CountColumn), _) => ScalarType::Int32,
                    (Some(AggregateType::Avg), _) => ScalarType::Decimal,
                    (Some(_), _) => base,
                    (None, Some(_)) => ScalarType::Int32,
                    (None, None) => base,
                };
                let name = attr.alias.as_deref().unwrap_or(&attr.name);
                schema.add_qualified_column(prefix, name, data_type);
            }
            FetchItem::LinkEntity(link) => {
                add_entity_columns(schema, metadata, &link.alias, &link.name, &link.items)?
            }
            FetchItem::Filter(_) | FetchItem::Order(_) => {}
        }
    }
    Ok(())
}

/// Union of two join inputs' columns; a column produced by both sides is an error.
pub(crate) fn merge_schemas(left: &NodeSchema, right: &NodeSchema) -> Result<NodeSchema> {
    let mut merged = left.clone();
    for (name, data_type) in right.columns() {
        if !merged.add_column(name, data_type) {
            return Err(FxqError::semantic(
                format!("Column '{name}' is produced by both join inputs"),
                name,
            ));
        }
    }
    for (alias, columns) in right.aliases() {
        for column in columns {
            merged.add_alias(alias, column.clone());
        }
    }
    merged.set_primary_key(left.primary_key().map(str::to_string));
    Ok(merged)
}

/// Joins every left row with every right row satisfying `condition`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedLoopJoinExec {
    /// Outer input.
    pub left: Box<PhysicalPlan>,
    /// Inner input, re-read once per outer row.
    pub right: Box<PhysicalPlan>,
    /// Join type.
    pub join_type: JoinType,
    /// Join condition; `None` is a cross join.
    pub condition: Option<Expr>,
}

/// Merge join on `left_key = right_key`. `right_key` is unique in the right input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeJoinExec {
    /// Left input sorted on `left_key`.
    pub left: Box<PhysicalPlan>,
    /// Right input sorted on `right_key`.
    pub right: Box<PhysicalPlan>,
    /// Normalized left key column.
    pub left_key: String,
    /// Normalized right key column.
    pub right_key: String,
    /// Join type.
    pub join_type: JoinType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub expr: Expr,
    pub descending: bool,
}

/// Sort operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortExec {
    /// Input plan.
    pub input: Box<PhysicalPlan>,
    /// Sort keys, most significant first.
    pub keys: Vec<SortKey>,
    /// Set on sorts that only feed a merge join; folding such a sort into a
    /// document's orders would be redundant.
    #[serde(default)]
    pub ignore_for_fetch_xml_folding: bool,
}

/// Row filter operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterExec {
    /// Input plan.
    pub input: Box<PhysicalPlan>,
    /// Boolean predicate over the input's normalized columns.
    pub predicate: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpoolExec {
    pub input: Box<PhysicalPlan>,
}

/// One output column of a select node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectColumn {
    /// Normalized input column.
    pub source: String,
    /// Output name.
    pub output_name: String,
}

/// Projection; with an alias it also acts as a derived table / CTE boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectExec {
    /// Input plan.
    pub input: Box<PhysicalPlan>,
    /// Output columns in order.
    pub columns: Vec<SelectColumn>,
    /// Table alias qualifying the outputs.
    pub alias: Option<String>,
}

impl SelectExec {
    fn schema(&self, metadata: &dyn MetadataProvider) -> Result<NodeSchema> {
        let input = self.input.schema(metadata)?;
        let mut schema = NodeSchema::new();
        for column in &self.columns {
            let data_type = input
                .column_type(&column.source)
                .ok_or_else(|| FxqError::semantic("Unknown column", &column.source))?;
            let added = match &self.alias {
                Some(alias) => schema.add_qualified_column(alias, &column.output_name, data_type),
                None => schema.add_column(column.output_name.clone(), data_type),
            };
            if !added && self.alias.is_some() {
                return Err(FxqError::semantic(
                    format!(
                        "The column '{}' was specified multiple times",
                        column.output_name
                    ),
                    self.alias.as_deref().unwrap_or_default(),
                ));
            }
            let is_pk = input
                .primary_key()
                .is_some_and(|pk| pk.eq_ignore_ascii_case(&column.source));
            if is_pk && schema.primary_key().is_none() {
                let output = match &self.alias {
                    Some(alias) => format!("{alias}.{}", column.output_name),
                    None => column.output_name.clone(),
                };
                schema.set_primary_key(Some(output));
            }
        }
        Ok(schema)
    }
}

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fetch_xml::FetchXml;

/// Result of lowering one statement to a FetchXML document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Query {
    Select(SelectQuery),
    InsertValues(InsertValuesQuery),
    InsertSelect(InsertSelectQuery),
    Update(UpdateQuery),
    Delete(DeleteQuery),
}

impl Query {
    /// Document the backend runs, if the statement reads data.
    pub fn fetch(&self) -> Option<&FetchXml> {
        match self {
            Self::Select(q) => Some(&q.fetch),
            Self::InsertSelect(q) => Some(&q.fetch),
            Self::Update(q) => Some(&q.fetch),
            Self::Delete(q) => Some(&q.fetch),
            Self::InsertValues(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectQuery {
    pub fetch: FetchXml,
    /// Output column names in projection order.
    pub columns: Vec<String>,
    /// True when the caller should keep paging until the result is exhausted.
    pub all_pages: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertValuesQuery {
    pub entity_name: String,
    pub rows: Vec<BTreeMap<String, AttributeValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertSelectQuery {
    pub entity_name: String,
    pub fetch: FetchXml,
    /// Source output column → target attribute.
    pub mappings: Vec<(String, String)>,
    pub all_pages: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateQuery {
    pub entity_name: String,
    pub fetch: FetchXml,
    /// Output column holding the id of each row to update.
    pub id_column: String,
    pub updates: BTreeMap<String, AttributeValue>,
    pub all_pages: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteQuery {
    pub entity_name: String,
    pub fetch: FetchXml,
    pub id_column: String,
    pub all_pages: bool,
}

/// Typed value destined for an attribute of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Null,
    BigInt(i64),
    Boolean(bool),
    DateTime(NaiveDateTime),
    Decimal(Decimal),
    Double(f64),
    Integer(i32),
    Money(Decimal),
    EntityReference { entity_name: String, id: Uuid },
    OptionSet(i32),
    String(String),
}

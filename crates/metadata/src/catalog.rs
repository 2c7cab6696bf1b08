use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use fxq_common::{FxqError, Result};
use serde::{Deserialize, Serialize};

use crate::provider::MetadataProvider;

/// Scalar category of an entity attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    BigInt,
    Boolean,
    Customer,
    DateTime,
    Decimal,
    Double,
    EntityName,
    Integer,
    Lookup,
    ManagedProperty,
    Memo,
    Money,
    Owner,
    PartyList,
    Picklist,
    State,
    Status,
    String,
    Uniqueidentifier,
    Virtual,
}

fn default_valid_for_read() -> bool {
    true
}

/// One attribute (column) of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeMetadata {
    pub logical_name: String,
    pub attribute_type: AttributeType,
    #[serde(default = "default_valid_for_read")]
    pub valid_for_read: bool,
    /// Target entities of a lookup attribute; empty otherwise.
    #[serde(default)]
    pub targets: Vec<String>,
}

impl AttributeMetadata {
    pub fn new(logical_name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            logical_name: logical_name.into(),
            attribute_type,
            valid_for_read: true,
            targets: Vec::new(),
        }
    }

    pub fn with_targets(mut self, targets: &[&str]) -> Self {
        self.targets = targets.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn write_only(mut self) -> Self {
        self.valid_for_read = false;
        self
    }
}

/// Entity (table) definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMetadata {
    pub logical_name: String,
    pub primary_id_attribute: String,
    #[serde(default)]
    pub attributes: Vec<AttributeMetadata>,
}

impl EntityMetadata {
    pub fn new(logical_name: impl Into<String>, primary_id_attribute: impl Into<String>) -> Self {
        Self {
            logical_name: logical_name.into(),
            primary_id_attribute: primary_id_attribute.into(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: AttributeMetadata) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Case-insensitive attribute lookup.
    pub fn attribute(&self, name: &str) -> Option<&AttributeMetadata> {
        self.attributes
            .iter()
            .find(|a| a.logical_name.eq_ignore_ascii_case(name))
    }

    /// Readable attributes sorted by logical name.
    pub fn readable_attributes(&self) -> Vec<&AttributeMetadata> {
        let mut attrs = self
            .attributes
            .iter()
            .filter(|a| a.valid_for_read)
            .collect::<Vec<_>>();
        attrs.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));
        attrs
    }
}

/// In-memory metadata catalog keyed by lowercase logical name.
#[derive(Debug, Default)]
pub struct Catalog {
    entities: HashMap<String, Arc<EntityMetadata>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
        }
    }

    pub fn register_entity(&mut self, entity: EntityMetadata) {
        self.entities
            .insert(entity.logical_name.to_ascii_lowercase(), Arc::new(entity));
    }

    pub fn entity_names(&self) -> Vec<String> {
        let mut names = self
            .entities
            .values()
            .map(|e| e.logical_name.clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Parse a JSON array of [`EntityMetadata`] objects.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let entities: Vec<EntityMetadata> =
            serde_json::from_str(json).map_err(|e| FxqError::InvalidConfig(e.to_string()))?;
        let mut cat = Catalog::new();
        for entity in entities {
            if entity.attribute(&entity.primary_id_attribute).is_none() {
                return Err(FxqError::InvalidConfig(format!(
                    "entity '{}' does not define its primary id attribute '{}'",
                    entity.logical_name, entity.primary_id_attribute
                )));
            }
            cat.register_entity(entity);
        }
        Ok(cat)
    }

    pub fn load_from_json(path: impl AsRef<Path>) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        Self::from_json_str(&s)
    }
}

impl MetadataProvider for Catalog {
    fn entity(&self, logical_name: &str) -> Result<Arc<EntityMetadata>> {
        self.entities
            .get(&logical_name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| FxqError::semantic("unknown entity", logical_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"[
        {
            "logical_name": "account",
            "primary_id_attribute": "accountid",
            "attributes": [
                { "logical_name": "name", "attribute_type": "string" },
                { "logical_name": "accountid", "attribute_type": "uniqueidentifier" },
                { "logical_name": "secret", "attribute_type": "string", "valid_for_read": false },
                { "logical_name": "primarycontactid", "attribute_type": "lookup", "targets": ["contact"] }
            ]
        }
    ]"#;

    #[test]
    fn loads_json_and_resolves_case_insensitively() {
        let cat = Catalog::from_json_str(JSON).expect("catalog");
        let account = cat.entity("Account").expect("account");
        assert_eq!(account.primary_id_attribute, "accountid");
        let lookup = account.attribute("PrimaryContactId").expect("lookup");
        assert_eq!(lookup.targets, vec!["contact".to_string()]);
    }

    #[test]
    fn readable_attributes_are_sorted_and_filtered() {
        let cat = Catalog::from_json_str(JSON).expect("catalog");
        let account = cat.entity("account").expect("account");
        let names = account
            .readable_attributes()
            .into_iter()
            .map(|a| a.logical_name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["accountid", "name", "primarycontactid"]);
    }

    #[test]
    fn unknown_entity_is_semantic_error() {
        let cat = Catalog::new();
        let err = cat.entity("nope").expect_err("unknown");
        assert!(matches!(err, FxqError::Semantic { .. }), "got {err:?}");
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn missing_primary_key_is_rejected() {
        let err = Catalog::from_json_str(
            r#"[{"logical_name":"x","primary_id_attribute":"xid","attributes":[]}]"#,
        )
        .expect_err("pk missing");
        assert!(matches!(err, FxqError::InvalidConfig(_)), "got {err:?}");
    }
}

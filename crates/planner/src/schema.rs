use std::collections::BTreeMap;

use fxq_common::{FxqError, Result};

use crate::types::ScalarType;

#[derive(Debug, Clone, PartialEq)]
struct ColumnEntry {
    name: String,
    data_type: ScalarType,
}

/// Columns produced by a plan node.
///
/// Column and alias lookups are case-insensitive. Columns are usually
/// qualified (`alias.attribute`); aliases map a bare attribute name to every
/// qualified column it could refer to. `Clone` produces an independent copy,
/// alias lists included.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeSchema {
    primary_key: Option<String>,
    columns: BTreeMap<String, ColumnEntry>,
    aliases: BTreeMap<String, Vec<String>>,
}

impl NodeSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn primary_key(&self) -> Option<&str> {
        self.primary_key.as_deref()
    }

    pub fn set_primary_key(&mut self, column: Option<String>) {
        self.primary_key = column;
    }

    /// Adds a column; returns false when a column of the same name already exists.
    pub fn add_column(&mut self, name: impl Into<String>, data_type: ScalarType) -> bool {
        let name = name.into();
        let key = name.to_lowercase();
        if self.columns.contains_key(&key) {
            return false;
        }
        self.columns.insert(key, ColumnEntry { name, data_type });
        true
    }

    /// Records `column` as a candidate for the alias `alias`.
    pub fn add_alias(&mut self, alias: &str, column: impl Into<String>) {
        let column = column.into();
        let candidates = self.aliases.entry(alias.to_lowercase()).or_default();
        if !candidates.iter().any(|c| c.eq_ignore_ascii_case(&column)) {
            candidates.push(column);
        }
    }

    /// Adds `alias.attribute` plus an alias from `attribute` to it.
    pub fn add_qualified_column(&mut self, alias: &str, attribute: &str, data_type: ScalarType) -> bool {
        let qualified = format!("{alias}.{attribute}");
        if !self.add_column(qualified.clone(), data_type) {
            return false;
        }
        self.add_alias(attribute, qualified);
        true
    }

    /// Column names in their original spelling, ordered case-insensitively.
    pub fn columns(&self) -> impl Iterator<Item = (&str, ScalarType)> {
        self.columns
            .values()
            .map(|c| (c.name.as_str(), c.data_type))
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.aliases.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Normalized column name for `name`.
    ///
    /// An exact column match wins; an alias only resolves when it has a
    /// single candidate.
    pub fn contains_column(&self, name: &str) -> Option<String> {
        match self.lookup(name) {
            Lookup::Found(column) => Some(column),
            Lookup::Ambiguous(_) | Lookup::Missing => None,
        }
    }

    /// Like [`Self::contains_column`] but reports why a lookup failed.
    ///
    /// `fragment` is the offending expression carried in the error.
    pub fn resolve_column(&self, name: &str, fragment: impl std::fmt::Display) -> Result<String> {
        match self.lookup(name) {
            Lookup::Found(column) => Ok(column),
            Lookup::Ambiguous(candidates) => Err(FxqError::semantic(
                format!(
                    "Ambiguous column name '{name}', could be {}",
                    candidates.join(" or ")
                ),
                fragment,
            )),
            Lookup::Missing => Err(FxqError::semantic(
                format!("Unknown column '{name}'"),
                fragment,
            )),
        }
    }

    /// Type of a column addressed by its normalized name.
    pub fn column_type(&self, normalized: &str) -> Option<ScalarType> {
        self.columns
            .get(&normalized.to_lowercase())
            .map(|c| c.data_type)
    }

    fn lookup(&self, name: &str) -> Lookup {
        let key = name.to_lowercase();
        if let Some(column) = self.columns.get(&key) {
            return Lookup::Found(column.name.clone());
        }
        match self.aliases.get(&key).map(Vec::as_slice) {
            Some([single]) => Lookup::Found(single.clone()),
            Some(many) if many.len() > 1 => Lookup::Ambiguous(many.to_vec()),
            _ => Lookup::Missing,
        }
    }
}

enum Lookup {
    Found(String),
    Ambiguous(Vec<String>),
    Missing,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined() -> NodeSchema {
        let mut schema = NodeSchema::new();
        schema.add_qualified_column("a", "name", ScalarType::Text);
        schema.add_qualified_column("a", "accountid", ScalarType::Guid);
        schema.add_qualified_column("c", "name", ScalarType::Text);
        schema.add_qualified_column("c", "parentcustomerid", ScalarType::Guid);
        schema.set_primary_key(Some("a.accountid".into()));
        schema
    }

    #[test]
    fn exact_match_is_case_insensitive_and_normalized() {
        let schema = joined();
        assert_eq!(schema.contains_column("A.Name").as_deref(), Some("a.name"));
        assert_eq!(schema.column_type("C.NAME"), Some(ScalarType::Text));
    }

    #[test]
    fn single_candidate_alias_resolves() {
        let schema = joined();
        assert_eq!(
            schema.contains_column("ParentCustomerId").as_deref(),
            Some("c.parentcustomerid")
        );
    }

    #[test]
    fn ambiguous_alias_is_reported() {
        let schema = joined();
        assert_eq!(schema.contains_column("name"), None);
        let err = schema.resolve_column("name", "name").expect_err("ambiguous");
        assert!(err.to_string().contains("Ambiguous column name"), "{err}");
        let err = schema.resolve_column("missing", "x.missing").expect_err("unknown");
        assert!(err.to_string().contains("Unknown column 'missing'"), "{err}");
    }

    #[test]
    fn exact_column_wins_over_alias() {
        let mut schema = joined();
        schema.add_column("name", ScalarType::Int32);
        assert_eq!(schema.contains_column("name").as_deref(), Some("name"));
    }

    #[test]
    fn clones_are_independent() {
        let original = joined();
        let mut copy = original.clone();
        copy.add_alias("accountid", "c.accountid");
        assert_eq!(original.contains_column("accountid").as_deref(), Some("a.accountid"));
        assert_eq!(copy.contains_column("accountid"), None);
        assert!(!copy.add_column("A.NAME", ScalarType::Text));
    }
}

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use fxq_common::{FxqError, Result};
use fxq_metadata::{EntityMetadata, MetadataProvider};

use crate::fetch_xml::{FetchEntity, FetchItem, FetchItems, FetchLinkEntity, LinkType};

/// Declaration owned by a table: the document root or one link-entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Root(FetchEntity),
    Link(FetchLinkEntity),
}

/// One table reference of a statement.
///
/// Child-declaration operations delegate to whichever declaration the table
/// owns. Link-entities are attached to their parent as a header-only stub;
/// [`TableSet::into_entity`] replaces each stub with the owning table's
/// declaration once lowering has finished.
#[derive(Debug, Clone)]
pub struct EntityTable {
    pub entity_name: String,
    pub alias: Option<String>,
    declaration: Declaration,
    metadata: Arc<EntityMetadata>,
}

impl EntityTable {
    /// Table owning the document's root entity.
    pub fn root(
        provider: &dyn MetadataProvider,
        entity_name: &str,
        alias: Option<String>,
    ) -> Result<Self> {
        let metadata = provider.entity(entity_name)?;
        Ok(Self {
            entity_name: entity_name.to_string(),
            alias,
            declaration: Declaration::Root(FetchEntity::new(entity_name)),
            metadata,
        })
    }

    /// Table owning a link-entity. Link-entities are always aliased; the
    /// entity name stands in when the query gives no alias.
    pub fn link(
        provider: &dyn MetadataProvider,
        entity_name: &str,
        alias: Option<String>,
        link_type: LinkType,
    ) -> Result<Self> {
        let metadata = provider.entity(entity_name)?;
        let alias = alias.unwrap_or_else(|| entity_name.to_string());
        Ok(Self {
            entity_name: entity_name.to_string(),
            alias: Some(alias.clone()),
            declaration: Declaration::Link(FetchLinkEntity {
                name: entity_name.to_string(),
                alias,
                from: String::new(),
                to: String::new(),
                link_type,
                items: FetchItems::default(),
            }),
            metadata,
        })
    }

    pub fn metadata(&self) -> &EntityMetadata {
        &self.metadata
    }

    pub fn is_root(&self) -> bool {
        matches!(self.declaration, Declaration::Root(_))
    }

    /// Name other clauses use to qualify this table's columns.
    pub fn reference_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.entity_name)
    }

    pub fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    pub fn link_entity_mut(&mut self) -> Option<&mut FetchLinkEntity> {
        match &mut self.declaration {
            Declaration::Link(link) => Some(link),
            Declaration::Root(_) => None,
        }
    }

    pub fn items(&self) -> &FetchItems {
        match &self.declaration {
            Declaration::Root(entity) => &entity.items,
            Declaration::Link(link) => &link.items,
        }
    }

    pub fn items_mut(&mut self) -> &mut FetchItems {
        match &mut self.declaration {
            Declaration::Root(entity) => &mut entity.items,
            Declaration::Link(link) => &mut link.items,
        }
    }

    pub fn add_item(&mut self, item: FetchItem) {
        self.items_mut().push(item);
    }

    pub fn remove_items(&mut self, pred: impl FnMut(&FetchItem) -> bool) -> usize {
        self.items_mut().remove_where(pred)
    }

    pub fn contains(&self, pred: impl Fn(&FetchItem) -> bool) -> bool {
        self.items().contains(pred)
    }

    /// Output column name for one of this table's attributes: bare on the
    /// root, qualified with the link alias otherwise.
    pub fn output_name(&self, attribute: &str) -> String {
        if self.is_root() {
            attribute.to_string()
        } else {
            format!("{}.{attribute}", self.reference_name())
        }
    }
}

/// Tables of one statement, root first.
#[derive(Debug, Default)]
pub struct TableSet {
    tables: Vec<EntityTable>,
}

impl TableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table, rejecting a reference name already in use. An unaliased
    /// table is referenced by its entity name, and so is a link-entity whose
    /// alias defaulted to it.
    pub fn add(&mut self, table: EntityTable, fragment: impl Display) -> Result<usize> {
        let name = table.reference_name();
        if self
            .tables
            .iter()
            .any(|t| t.reference_name().eq_ignore_ascii_case(name))
        {
            return Err(FxqError::semantic(
                format!("Duplicate table alias '{name}'"),
                fragment,
            ));
        }
        self.tables.push(table);
        Ok(self.tables.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn get(&self, index: usize) -> &EntityTable {
        &self.tables[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut EntityTable {
        &mut self.tables[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityTable> {
        self.tables.iter()
    }

    /// Table referenced by `name`: an alias, or the entity name of an unaliased table.
    pub fn find(&self, name: &str, fragment: impl Display) -> Result<Option<usize>> {
        if let Some(i) = self.tables.iter().position(|t| {
            t.alias
                .as_deref()
                .is_some_and(|a| a.eq_ignore_ascii_case(name))
        }) {
            return Ok(Some(i));
        }
        let matches = self
            .tables
            .iter()
            .enumerate()
            .filter(|(_, t)| t.alias.is_none() && t.entity_name.eq_ignore_ascii_case(name))
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        match matches.as_slice() {
            [] => Ok(None),
            [single] => Ok(Some(*single)),
            _ => Err(FxqError::semantic(
                format!("Ambiguous identifier '{name}'"),
                fragment,
            )),
        }
    }

    /// Table owning the column named by `parts` (`[attr]` or `[table, attr]`).
    pub fn column_table(&self, parts: &[String], fragment: impl Display) -> Result<usize> {
        match parts {
            [table, _] => self.find(table, &fragment)?.ok_or_else(|| {
                FxqError::semantic(format!("Unknown table '{table}'"), &fragment)
            }),
            [attribute] => {
                let by_metadata = self
                    .tables
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.metadata.attribute(attribute).is_some())
                    .map(|(i, _)| i)
                    .collect::<Vec<_>>();
                let candidates = if by_metadata.is_empty() {
                    self.tables
                        .iter()
                        .enumerate()
                        .filter(|(_, t)| {
                            t.items().attributes().any(|a| {
                                a.alias
                                    .as_deref()
                                    .is_some_and(|al| al.eq_ignore_ascii_case(attribute))
                            })
                        })
                        .map(|(i, _)| i)
                        .collect::<Vec<_>>()
                } else {
                    by_metadata
                };
                match candidates.as_slice() {
                    [single] => Ok(*single),
                    [] => Err(FxqError::semantic(
                        format!("Unknown attribute '{attribute}'"),
                        fragment,
                    )),
                    many => Err(FxqError::semantic(
                        format!(
                            "Ambiguous attribute '{attribute}' in tables {}",
                            many.iter()
                                .map(|i| self.tables[*i].reference_name())
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                        fragment,
                    )),
                }
            }
            _ => Err(FxqError::unsupported("Unsupported multi-part identifier", fragment)),
        }
    }

    fn link_index(&self, alias: &str) -> Option<usize> {
        self.tables.iter().position(|t| match &t.declaration {
            Declaration::Link(l) => l.alias.eq_ignore_ascii_case(alias),
            Declaration::Root(_) => false,
        })
    }

    /// Whether an entity visited after `order_table` in depth-first document
    /// order already carries an order.
    pub fn later_entity_has_order(&self, order_table: usize) -> bool {
        let mut passed = false;
        !self.tables.is_empty() && self.later_has_order(0, order_table, &mut passed)
    }

    fn later_has_order(&self, current: usize, order_table: usize, passed: &mut bool) -> bool {
        let items = self.tables[current].items();
        if *passed && items.orders().next().is_some() {
            return true;
        }
        if current == order_table {
            *passed = true;
        }
        for link in items.links() {
            if let Some(child) = self.link_index(&link.alias) {
                if self.later_has_order(child, order_table, passed) {
                    return true;
                }
            }
        }
        false
    }

    /// Assemble the document tree, moving each link table's declaration into
    /// the stub its parent holds.
    pub fn into_entity(self) -> Result<FetchEntity> {
        let mut tables = self.tables.into_iter();
        let Some(first) = tables.next() else {
            return Err(FxqError::unsupported("No source entity specified", "FROM"));
        };
        let Declaration::Root(mut root) = first.declaration else {
            return Err(FxqError::unsupported(
                "First table must be the root entity",
                first.entity_name,
            ));
        };
        let mut links = tables
            .filter_map(|t| match t.declaration {
                Declaration::Link(l) => Some((l.alias.to_lowercase(), l)),
                Declaration::Root(_) => None,
            })
            .collect::<HashMap<_, _>>();
        fill_links(&mut root.items, &mut links);
        Ok(root)
    }
}

fn fill_links(items: &mut FetchItems, links: &mut HashMap<String, FetchLinkEntity>) {
    for item in items.iter_mut() {
        if let FetchItem::LinkEntity(stub) = item {
            if let Some(mut full) = links.remove(&stub.alias.to_lowercase()) {
                fill_links(&mut full.items, links);
                *stub = full;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch_xml::{FetchAttribute, FetchOrder};
    use fxq_metadata::{AttributeMetadata, AttributeType, Catalog};

    fn catalog() -> Catalog {
        let mut cat = Catalog::new();
        cat.register_entity(
            EntityMetadata::new("contact", "contactid")
                .with_attribute(AttributeMetadata::new("contactid", AttributeType::Uniqueidentifier))
                .with_attribute(AttributeMetadata::new("name", AttributeType::String))
                .with_attribute(AttributeMetadata::new("parentcustomerid", AttributeType::Customer)),
        );
        cat.register_entity(
            EntityMetadata::new("account", "accountid")
                .with_attribute(AttributeMetadata::new("accountid", AttributeType::Uniqueidentifier))
                .with_attribute(AttributeMetadata::new("name", AttributeType::String))
                .with_attribute(AttributeMetadata::new("revenue", AttributeType::Money)),
        );
        cat
    }

    fn order(attr: &str) -> FetchItem {
        FetchItem::Order(FetchOrder {
            attribute: Some(attr.to_string()),
            alias: None,
            descending: false,
        })
    }

    fn linked(tables: &mut TableSet, parent: usize, entity: &str, alias: &str) -> usize {
        let cat = catalog();
        let mut table =
            EntityTable::link(&cat, entity, Some(alias.to_string()), LinkType::Inner).expect("link");
        let stub = table.link_entity_mut().expect("link decl").clone();
        tables.get_mut(parent).add_item(FetchItem::LinkEntity(stub));
        tables.add(table, alias).expect("add")
    }

    #[test]
    fn unknown_entity_fails_fast() {
        let err = EntityTable::root(&catalog(), "lead", None).expect_err("unknown");
        assert!(matches!(err, FxqError::Semantic { .. }), "got {err:?}");
    }

    #[test]
    fn defaulted_link_alias_collides_with_unaliased_root() {
        let cat = catalog();
        let mut tables = TableSet::new();
        tables
            .add(EntityTable::root(&cat, "account", None).expect("root"), "account")
            .expect("add");
        let link = EntityTable::link(&cat, "account", None, LinkType::Inner).expect("link");
        let err = tables.add(link, "account").expect_err("duplicate");
        assert!(err.to_string().contains("Duplicate table alias 'account'"), "{err}");

        let aliased = EntityTable::link(&cat, "account", Some("p".into()), LinkType::Inner)
            .expect("link");
        assert_eq!(tables.add(aliased, "account p").expect("aliased"), 1);
    }

    #[test]
    fn resolves_columns_and_reports_ambiguity() {
        let cat = catalog();
        let mut tables = TableSet::new();
        tables
            .add(EntityTable::root(&cat, "contact", Some("c".into())).expect("root"), "contact")
            .expect("add");
        let a = linked(&mut tables, 0, "account", "a");

        assert_eq!(tables.column_table(&["revenue".into()], "revenue").expect("revenue"), a);
        assert_eq!(tables.column_table(&["c".into(), "name".into()], "c.name").expect("c"), 0);
        let err = tables.column_table(&["name".into()], "name").expect_err("ambiguous");
        assert!(err.to_string().contains("Ambiguous attribute"), "{err}");
        let err = tables.column_table(&["x".into(), "name".into()], "x.name").expect_err("table");
        assert!(err.to_string().contains("Unknown table 'x'"), "{err}");
        let err = tables
            .add(EntityTable::link(&cat, "account", Some("A".into()), LinkType::Inner).expect("t"), "A")
            .expect_err("dup");
        assert!(err.to_string().contains("Duplicate table alias"), "{err}");
    }

    #[test]
    fn attribute_aliases_resolve_unqualified_names() {
        let cat = catalog();
        let mut tables = TableSet::new();
        let root = tables
            .add(EntityTable::root(&cat, "account", None).expect("root"), "account")
            .expect("add");
        tables.get_mut(root).add_item(FetchItem::Attribute(FetchAttribute {
            alias: Some("total".into()),
            ..FetchAttribute::new("revenue")
        }));
        assert_eq!(tables.column_table(&["total".into()], "total").expect("alias"), root);
    }

    #[test]
    fn order_legality_follows_depth_first_order() {
        let cat = catalog();
        let mut tables = TableSet::new();
        tables
            .add(EntityTable::root(&cat, "contact", None).expect("root"), "contact")
            .expect("add");
        let a = linked(&mut tables, 0, "account", "a");

        assert!(!tables.later_entity_has_order(0));
        tables.get_mut(a).add_item(order("name"));
        assert!(tables.later_entity_has_order(0));
        assert!(!tables.later_entity_has_order(a));
    }

    #[test]
    fn assembly_moves_link_declarations_into_stubs() {
        let cat = catalog();
        let mut tables = TableSet::new();
        tables
            .add(EntityTable::root(&cat, "contact", None).expect("root"), "contact")
            .expect("add");
        let a = linked(&mut tables, 0, "account", "a");
        tables
            .get_mut(a)
            .add_item(FetchItem::Attribute(FetchAttribute::new("name")));

        let entity = tables.into_entity().expect("assemble");
        let link = entity.items.links().next().expect("link");
        assert_eq!(link.alias, "a");
        assert_eq!(link.items.attributes().count(), 1);
    }
}

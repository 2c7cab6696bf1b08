#![allow(dead_code)]

use fxq_common::{CompilerConfig, Result};
use fxq_metadata::{AttributeMetadata, AttributeType, Catalog, EntityMetadata};
use fxq_planner::{Query, SelectQuery, Sql2FetchXml};

pub fn catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog.register_entity(
        EntityMetadata::new("account", "accountid")
            .with_attribute(AttributeMetadata::new("accountid", AttributeType::Uniqueidentifier))
            .with_attribute(AttributeMetadata::new("name", AttributeType::String))
            .with_attribute(AttributeMetadata::new("revenue", AttributeType::Money))
            .with_attribute(AttributeMetadata::new("createdon", AttributeType::DateTime))
            .with_attribute(AttributeMetadata::new("statecode", AttributeType::State))
            .with_attribute(
                AttributeMetadata::new("primarycontactid", AttributeType::Lookup)
                    .with_targets(&["contact"]),
            )
            .with_attribute(
                AttributeMetadata::new("parentaccountid", AttributeType::Lookup)
                    .with_targets(&["account"]),
            ),
    );
    catalog.register_entity(
        EntityMetadata::new("contact", "contactid")
            .with_attribute(AttributeMetadata::new("contactid", AttributeType::Uniqueidentifier))
            .with_attribute(AttributeMetadata::new("firstname", AttributeType::String))
            .with_attribute(AttributeMetadata::new("lastname", AttributeType::String))
            .with_attribute(AttributeMetadata::new("fullname", AttributeType::String))
            .with_attribute(AttributeMetadata::new("numberofchildren", AttributeType::Integer))
            .with_attribute(AttributeMetadata::new("donotemail", AttributeType::Boolean))
            .with_attribute(
                AttributeMetadata::new("parentcustomerid", AttributeType::Customer)
                    .with_targets(&["account"]),
            ),
    );
    catalog
}

pub fn convert(sql: &str) -> Result<Query> {
    let catalog = catalog();
    let config = CompilerConfig::default();
    let mut out = Sql2FetchXml::new(&catalog, &config).convert(sql)?;
    assert_eq!(out.len(), 1, "expected a single statement");
    Ok(out.remove(0))
}

pub fn select(sql: &str) -> SelectQuery {
    match convert(sql).expect("convert") {
        Query::Select(q) => q,
        other => panic!("expected select, got {other:?}"),
    }
}

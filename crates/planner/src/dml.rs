use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use fxq_common::{FxqError, Result};
use fxq_metadata::{AttributeMetadata, AttributeType, EntityMetadata};
use rust_decimal::Decimal;
use sqlparser::ast::{
    Assignment, AssignmentTarget, Delete, Expr as SqlExpr, FromTable, Insert, SetExpr,
    Statement, TableWithJoins, UnaryOperator, Value,
};
use tracing::debug;
use uuid::Uuid;

use crate::fetch_xml::{FetchAttribute, FetchItem};
use crate::query::{
    AttributeValue, DeleteQuery, InsertSelectQuery, InsertValuesQuery, Query, UpdateQuery,
};
use crate::sql_frontend::{integer_literal, object_name_last, Lowering, Sql2FetchXml};
use crate::types::parse_date_time;

pub(crate) fn convert_insert(
    conv: &Sql2FetchXml<'_>,
    stmt: &Statement,
    insert: &Insert,
) -> Result<Query> {
    if insert.on.is_some() {
        return Err(FxqError::unsupported("Unhandled INSERT ON clause", stmt));
    }
    if insert.returning.is_some() {
        return Err(FxqError::unsupported("Unhandled OUTPUT clause", stmt));
    }
    if insert.columns.is_empty() {
        return Err(FxqError::unsupported("INSERT requires a column list", stmt));
    }
    let Some(source) = &insert.source else {
        return Err(FxqError::unsupported("INSERT requires VALUES or SELECT", stmt));
    };

    let entity_name = object_name_last(&insert.table_name);
    let metadata = conv.metadata.entity(&entity_name)?;
    let targets = insert
        .columns
        .iter()
        .map(|c| {
            metadata
                .attribute(&c.value)
                .ok_or_else(|| FxqError::semantic(format!("Unknown attribute '{}'", c.value), c))
        })
        .collect::<Result<Vec<_>>>()?;

    match source.body.as_ref() {
        SetExpr::Values(values) => {
            let rows = values
                .rows
                .iter()
                .map(|row| {
                    if row.len() != targets.len() {
                        return Err(FxqError::semantic(
                            "Number of values does not match number of columns",
                            row.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
                        ));
                    }
                    targets
                        .iter()
                        .zip(row)
                        .map(|(attr, value)| {
                            let text = literal_text(value)?;
                            let converted = convert_attribute_value(attr, text.as_deref(), value)?;
                            Ok((attr.logical_name.clone(), converted))
                        })
                        .collect::<Result<BTreeMap<_, _>>>()
                })
                .collect::<Result<Vec<_>>>()?;
            debug!(entity = %entity_name, rows = rows.len(), "lowered INSERT VALUES");
            Ok(Query::InsertValues(InsertValuesQuery { entity_name, rows }))
        }
        SetExpr::Select(_) => {
            let select = conv.convert_select(source)?;
            if select.columns.len() != targets.len() {
                return Err(FxqError::semantic(
                    "Number of selected columns does not match number of insert columns",
                    source,
                ));
            }
            let mappings = select
                .columns
                .into_iter()
                .zip(targets.iter().map(|a| a.logical_name.clone()))
                .collect();
            Ok(Query::InsertSelect(InsertSelectQuery {
                entity_name,
                fetch: select.fetch,
                mappings,
                all_pages: select.all_pages,
            }))
        }
        other => Err(FxqError::unsupported("Unhandled INSERT source", other)),
    }
}

/// `UPDATE TOP (n)` has no form in the parser's `Update` statement; such
/// input never reaches this function as a row limit.
pub(crate) fn convert_update(
    conv: &Sql2FetchXml<'_>,
    table: &TableWithJoins,
    assignments: &[Assignment],
    selection: Option<&SqlExpr>,
) -> Result<Query> {
    let mut st = Lowering::default();
    conv.handle_from(std::slice::from_ref(table), &mut st)?;
    conv.handle_where(selection, &mut st)?;

    let target = 0;
    let metadata = st.tables.get(target).metadata().clone();
    let mut updates = BTreeMap::new();
    for assignment in assignments {
        let AssignmentTarget::ColumnName(name) = &assignment.target else {
            return Err(FxqError::unsupported("Unhandled SET target", assignment));
        };
        let parts = name.0.iter().map(|i| i.value.clone()).collect::<Vec<_>>();
        if st.tables.column_table(&parts, assignment)? != target {
            return Err(FxqError::unsupported(
                "SET can only target columns of the updated table",
                assignment,
            ));
        }
        let attr = attribute(&metadata, &object_name_last(name), assignment)?;
        let text = literal_text(&assignment.value)?;
        let value = convert_attribute_value(attr, text.as_deref(), &assignment.value)?;
        updates.insert(attr.logical_name.clone(), value);
    }

    let entity_name = st.tables.get(target).entity_name.clone();
    let id_column = add_primary_key(&mut st, target);
    st.distinct = true;
    let (fetch, _) = st.finish()?;
    let all_pages = fetch.page.is_none() && fetch.top.is_none();
    debug!(entity = %entity_name, updates = updates.len(), "lowered UPDATE");
    Ok(Query::Update(UpdateQuery {
        entity_name,
        fetch,
        id_column,
        updates,
        all_pages,
    }))
}

/// The parser's `Delete` carries no `TOP`; `LIMIT n` is the row limit
/// lowered here.
pub(crate) fn convert_delete(
    conv: &Sql2FetchXml<'_>,
    stmt: &Statement,
    delete: &Delete,
) -> Result<Query> {
    if delete.using.is_some() {
        return Err(FxqError::unsupported("Unhandled DELETE USING clause", stmt));
    }
    if delete.returning.is_some() {
        return Err(FxqError::unsupported("Unhandled OUTPUT clause", stmt));
    }
    if !delete.order_by.is_empty() {
        return Err(FxqError::unsupported("Unhandled DELETE ORDER BY clause", stmt));
    }
    let from = match &delete.from {
        FromTable::WithFromKeyword(from) | FromTable::WithoutKeyword(from) => from,
    };

    let mut st = Lowering::default();
    conv.handle_from(from, &mut st)?;
    if let Some(limit) = &delete.limit {
        st.top = Some(
            integer_literal(limit)
                .ok_or_else(|| FxqError::unsupported("Unhandled LIMIT expression", limit))?,
        );
    }
    conv.handle_where(delete.selection.as_ref(), &mut st)?;

    let target = match delete.tables.as_slice() {
        [] => 0,
        [name] => {
            let table_name = object_name_last(name);
            st.tables.find(&table_name, name)?.ok_or_else(|| {
                FxqError::semantic(format!("Unknown table '{table_name}'"), name)
            })?
        }
        _ => return Err(FxqError::unsupported("DELETE from multiple tables", stmt)),
    };

    let entity_name = st.tables.get(target).entity_name.clone();
    let id_column = add_primary_key(&mut st, target);
    st.distinct = true;
    let (fetch, _) = st.finish()?;
    let all_pages = fetch.page.is_none() && fetch.top.is_none();
    debug!(entity = %entity_name, id_column = %id_column, "lowered DELETE");
    Ok(Query::Delete(DeleteQuery {
        entity_name,
        fetch,
        id_column,
        all_pages,
    }))
}

/// Make sure the target's primary key is retrieved; returns its output column.
fn add_primary_key(st: &mut Lowering, target: usize) -> String {
    let table = st.tables.get_mut(target);
    let pk = table.metadata().primary_id_attribute.clone();
    let present = table.items().has_all_attributes()
        || table
            .items()
            .attributes()
            .any(|a| a.alias.is_none() && a.aggregate.is_none() && a.name.eq_ignore_ascii_case(&pk));
    if !present {
        table.add_item(FetchItem::Attribute(FetchAttribute::new(pk.clone())));
    }
    let id_column = table.output_name(&pk);
    st.columns.push(id_column.clone());
    id_column
}

fn attribute<'m>(
    metadata: &'m EntityMetadata,
    name: &str,
    fragment: impl Display,
) -> Result<&'m AttributeMetadata> {
    metadata
        .attribute(name)
        .ok_or_else(|| FxqError::semantic(format!("Unknown attribute '{name}'"), fragment))
}

/// Raw text of a literal value expression; `None` for NULL.
fn literal_text(expr: &SqlExpr) -> Result<Option<String>> {
    match expr {
        SqlExpr::Value(Value::Null) => Ok(None),
        SqlExpr::Value(Value::SingleQuotedString(s) | Value::NationalStringLiteral(s)) => {
            Ok(Some(s.clone()))
        }
        SqlExpr::Value(Value::Number(n, _)) => Ok(Some(n.clone())),
        SqlExpr::UnaryOp {
            op: UnaryOperator::Minus,
            expr: inner,
        } => match inner.as_ref() {
            SqlExpr::Value(Value::Number(n, _)) => Ok(Some(format!("-{n}"))),
            _ => Err(FxqError::unsupported("Only literal values are supported", expr)),
        },
        other => Err(FxqError::unsupported("Only literal values are supported", other)),
    }
}

/// Convert literal text to the typed value an attribute stores.
pub fn convert_attribute_value(
    attribute: &AttributeMetadata,
    text: Option<&str>,
    fragment: impl Display,
) -> Result<AttributeValue> {
    let Some(text) = text else {
        return Ok(AttributeValue::Null);
    };
    let invalid = || {
        FxqError::semantic(
            format!(
                "Cannot convert '{text}' to {:?} attribute '{}'",
                attribute.attribute_type, attribute.logical_name
            ),
            &fragment,
        )
    };
    Ok(match attribute.attribute_type {
        AttributeType::BigInt => AttributeValue::BigInt(text.parse().map_err(|_| invalid())?),
        AttributeType::Boolean => match text {
            "0" => AttributeValue::Boolean(false),
            "1" => AttributeValue::Boolean(true),
            _ => return Err(invalid()),
        },
        AttributeType::DateTime => {
            AttributeValue::DateTime(parse_date_time(text).ok_or_else(invalid)?)
        }
        AttributeType::Decimal => AttributeValue::Decimal(parse_decimal(text).ok_or_else(invalid)?),
        AttributeType::Double => AttributeValue::Double(text.parse().map_err(|_| invalid())?),
        AttributeType::Integer => AttributeValue::Integer(text.parse().map_err(|_| invalid())?),
        AttributeType::Money => AttributeValue::Money(parse_decimal(text).ok_or_else(invalid)?),
        AttributeType::Lookup | AttributeType::Customer | AttributeType::Owner => {
            let [entity_name] = attribute.targets.as_slice() else {
                return Err(FxqError::unsupported(
                    format!(
                        "Polymorphic lookup attribute '{}' is not supported",
                        attribute.logical_name
                    ),
                    &fragment,
                ));
            };
            AttributeValue::EntityReference {
                entity_name: entity_name.clone(),
                id: Uuid::parse_str(text).map_err(|_| invalid())?,
            }
        }
        AttributeType::Memo | AttributeType::String => AttributeValue::String(text.to_string()),
        AttributeType::Picklist | AttributeType::State | AttributeType::Status => {
            AttributeValue::OptionSet(text.parse().map_err(|_| invalid())?)
        }
        other => {
            return Err(FxqError::unsupported(
                format!("Unsupported attribute type {other:?}"),
                &fragment,
            ))
        }
    })
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_accepts_only_zero_and_one() {
        let attr = AttributeMetadata::new("donotcall", AttributeType::Boolean);
        assert_eq!(
            convert_attribute_value(&attr, Some("1"), "1").expect("true"),
            AttributeValue::Boolean(true)
        );
        let err = convert_attribute_value(&attr, Some("true"), "'true'").expect_err("word");
        assert!(matches!(err, FxqError::Semantic { .. }), "got {err:?}");
    }

    #[test]
    fn lookups_need_a_single_target() {
        let id = "7c9e6679-7425-40de-944b-e07fc1f90ae7";
        let single = AttributeMetadata::new("parentaccountid", AttributeType::Lookup)
            .with_targets(&["account"]);
        match convert_attribute_value(&single, Some(id), id).expect("reference") {
            AttributeValue::EntityReference { entity_name, .. } => assert_eq!(entity_name, "account"),
            other => panic!("expected entity reference, got {other:?}"),
        }

        let poly = AttributeMetadata::new("customerid", AttributeType::Customer)
            .with_targets(&["account", "contact"]);
        let err = convert_attribute_value(&poly, Some(id), id).expect_err("polymorphic");
        assert!(err.to_string().contains("Polymorphic"), "{err}");
    }

    #[test]
    fn unsupported_categories_and_nulls() {
        let party = AttributeMetadata::new("to", AttributeType::PartyList);
        let err = convert_attribute_value(&party, Some("x"), "'x'").expect_err("partylist");
        assert!(err.to_string().contains("Unsupported attribute type"), "{err}");
        assert_eq!(
            convert_attribute_value(&party, None, "NULL").expect("null"),
            AttributeValue::Null
        );
    }

    #[test]
    fn money_and_decimal_parse_invariantly() {
        let attr = AttributeMetadata::new("revenue", AttributeType::Money);
        assert_eq!(
            convert_attribute_value(&attr, Some("1234.50"), "1234.50").expect("money"),
            AttributeValue::Money(Decimal::new(123450, 2))
        );
        assert!(convert_attribute_value(&attr, Some("1,5"), "'1,5'").is_err());
    }
}

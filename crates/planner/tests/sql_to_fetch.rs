mod common;

use common::{convert, select};
use fxq_common::FxqError;
use fxq_planner::fetch_xml::{
    AggregateType, ConditionOperator, DateGrouping, FetchItem, FilterItem, FilterType, LinkType,
};

#[test]
fn single_condition_becomes_one_and_filter() {
    let q = select("SELECT firstname FROM contact WHERE firstname = 'Mark'");
    assert_eq!(q.columns, ["firstname"]);
    assert!(q.all_pages);

    let filters = q.fetch.entity.items.filters().collect::<Vec<_>>();
    assert_eq!(filters.len(), 1);
    assert_eq!(filters[0].filter_type, FilterType::And);
    let conditions = filters[0].conditions().collect::<Vec<_>>();
    assert_eq!(conditions.len(), 1);
    assert_eq!(conditions[0].attribute, "firstname");
    assert_eq!(conditions[0].operator, ConditionOperator::Eq);
    assert_eq!(conditions[0].value.as_deref(), Some("Mark"));

    assert_eq!(
        q.fetch.to_xml(),
        "<fetch>\n\
         \x20 <entity name=\"contact\">\n\
         \x20   <attribute name=\"firstname\" />\n\
         \x20   <filter type=\"and\">\n\
         \x20     <condition attribute=\"firstname\" operator=\"eq\" value=\"Mark\" />\n\
         \x20   </filter>\n\
         \x20 </entity>\n\
         </fetch>\n"
    );
}

#[test]
fn join_orientation_does_not_depend_on_operand_order() {
    for on in [
        "c.parentcustomerid = a.accountid",
        "a.accountid = c.parentcustomerid",
    ] {
        let q = select(&format!(
            "SELECT c.fullname, a.name FROM contact c INNER JOIN account a ON {on}"
        ));
        assert_eq!(q.columns, ["fullname", "a.name"]);
        let link = q.fetch.entity.items.links().next().expect("link-entity");
        assert_eq!(link.name, "account");
        assert_eq!(link.alias, "a");
        assert_eq!(link.from, "accountid");
        assert_eq!(link.to, "parentcustomerid");
        assert_eq!(link.link_type, LinkType::Inner);
        assert_eq!(
            link.items.attributes().map(|a| a.name.as_str()).collect::<Vec<_>>(),
            ["name"]
        );
    }
}

#[test]
fn left_join_extra_conditions_filter_the_link() {
    let q = select(
        "SELECT c.fullname FROM contact c LEFT OUTER JOIN account a \
         ON c.parentcustomerid = a.accountid AND a.statecode = 0",
    );
    let link = q.fetch.entity.items.links().next().expect("link-entity");
    assert_eq!(link.link_type, LinkType::Outer);
    let filter = link.items.filters().next().expect("link filter");
    assert_eq!(filter.filter_type, FilterType::And);
    assert_eq!(filter.condition_count(), 1);
}

#[test]
fn non_equi_join_is_unsupported() {
    let err = convert(
        "SELECT c.fullname FROM contact c INNER JOIN account a ON c.parentcustomerid > a.accountid",
    )
    .expect_err("non-equi join");
    match err {
        FxqError::Unsupported { message, .. } => assert!(message.contains("join condition"), "{message}"),
        other => panic!("expected unsupported, got {other:?}"),
    }
}

#[test]
fn mixed_and_or_nests_filters() {
    let q = select(
        "SELECT name FROM account WHERE name = 'a' OR (name = 'b' AND revenue > 10)",
    );
    let filter = q.fetch.entity.items.filters().next().expect("filter");
    assert_eq!(filter.filter_type, FilterType::Or);
    assert_eq!(filter.condition_count(), 3);
    match &filter.items[1] {
        FilterItem::Filter(sub) => {
            assert_eq!(sub.filter_type, FilterType::And);
            assert_eq!(sub.items.len(), 2);
        }
        other => panic!("expected nested filter, got {other:?}"),
    }
}

#[test]
fn where_on_link_column_carries_entity_name() {
    let q = select(
        "SELECT c.fullname FROM contact c INNER JOIN account a ON c.parentcustomerid = a.accountid \
         WHERE a.name LIKE 'Contoso%'",
    );
    let filter = q.fetch.entity.items.filters().next().expect("filter");
    let condition = filter.conditions().next().expect("condition");
    assert_eq!(condition.entity_name.as_deref(), Some("a"));
    assert_eq!(condition.operator, ConditionOperator::Like);
}

#[test]
fn offset_fetch_becomes_paging() {
    let q = select(
        "SELECT name FROM account ORDER BY name OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY",
    );
    assert_eq!(q.fetch.count, Some(10));
    assert_eq!(q.fetch.page, Some(3));
    assert!(!q.all_pages);

    let err = convert("SELECT name FROM account ORDER BY name OFFSET 15 ROWS FETCH NEXT 10 ROWS ONLY")
        .expect_err("inexact offset");
    assert!(err.to_string().contains("integer multiple"), "{err}");
}

#[test]
fn top_limit_and_nolock() {
    let q = select("SELECT TOP 5 name FROM account WITH (NOLOCK)");
    assert_eq!(q.fetch.top, Some(5));
    assert!(q.fetch.no_lock);

    let q = select("SELECT name FROM account LIMIT 7");
    assert_eq!(q.fetch.top, Some(7));

    let err = convert("SELECT TOP 10 PERCENT name FROM account").expect_err("percent");
    assert!(err.to_string().contains("TOP PERCENT"), "{err}");
}

#[test]
fn aggregates_get_unique_synthesized_aliases() {
    let q = select("SELECT count(*), count(*), max(revenue) FROM account");
    assert!(q.fetch.aggregate);
    assert_eq!(q.columns, ["accountid_count", "accountid_count_2", "revenue_max"]);
    let attrs = q.fetch.entity.items.attributes().collect::<Vec<_>>();
    assert_eq!(attrs[0].name, "accountid");
    assert_eq!(attrs[0].aggregate, Some(AggregateType::Count));
    assert_eq!(attrs[2].aggregate, Some(AggregateType::Max));
    assert!(q.fetch.invariant_violations().is_empty());
}

#[test]
fn count_distinct_marks_attribute() {
    let q = select("SELECT count(DISTINCT name) AS names FROM account");
    let attr = q.fetch.entity.items.attributes().next().expect("attribute");
    assert_eq!(attr.aggregate, Some(AggregateType::CountColumn));
    assert!(attr.distinct);
    assert_eq!(attr.alias.as_deref(), Some("names"));
}

#[test]
fn group_by_aliases_grouped_attributes() {
    let q = select("SELECT name, count(*) FROM account GROUP BY name ORDER BY name");
    assert_eq!(q.columns, ["name", "accountid_count"]);
    let grouped = q
        .fetch
        .entity
        .items
        .attributes()
        .find(|a| a.group_by)
        .expect("grouped attribute");
    assert_eq!(grouped.alias.as_deref(), Some("name"));
    let order = q.fetch.entity.items.orders().next().expect("order");
    assert_eq!(order.alias.as_deref(), Some("name"));
    assert!(order.attribute.is_none());
    assert!(q.fetch.invariant_violations().is_empty());
}

#[test]
fn datepart_groups_by_date() {
    let q = select(
        "SELECT DATEPART(yy, createdon) AS y, count(*) AS n FROM account GROUP BY DATEPART(yy, createdon)",
    );
    let attr = q
        .fetch
        .entity
        .items
        .attributes()
        .find(|a| a.name == "createdon")
        .expect("createdon");
    assert_eq!(attr.date_grouping, Some(DateGrouping::Year));
    assert!(attr.group_by);
    assert_eq!(attr.alias.as_deref(), Some("y"));
}

#[test]
fn star_expands_readable_attributes() {
    let q = select("SELECT * FROM account");
    assert!(q.fetch.entity.items.has_all_attributes());
    assert!(q.columns.iter().any(|c| c == "name"));
    assert!(q.columns.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn referential_errors_are_semantic() {
    let cases = [
        ("SELECT nosuch FROM account", "Unknown attribute"),
        ("SELECT name FROM nosuchentity", "unknown entity"),
        (
            "SELECT c.fullname FROM contact c INNER JOIN account c ON c.parentcustomerid = c.accountid",
            "Duplicate table alias",
        ),
        (
            "SELECT name FROM account INNER JOIN account ON account.accountid = account.parentaccountid",
            "Duplicate table alias 'account'",
        ),
        ("SELECT x.name FROM account a", "Unknown table"),
    ];
    for (sql, expected) in cases {
        match convert(sql) {
            Err(err @ FxqError::Semantic { .. }) => {
                assert!(err.to_string().contains(expected), "{sql}: {err}")
            }
            other => panic!("{sql}: expected semantic error, got {other:?}"),
        }
    }
}

#[test]
fn unsupported_shapes_name_the_construct() {
    let cases = [
        ("SELECT name FROM account WHERE name = NULL", "IS [NOT] NULL"),
        (
            "SELECT name FROM account WHERE accountid IN (SELECT parentcustomerid FROM contact)",
            "join",
        ),
        ("SELECT name FROM account WHERE name = fullname", "single quotes"),
        ("SELECT name FROM account HAVING count(*) > 1", "HAVING"),
        ("SELECT a.name FROM account a, contact c", "single table"),
        (
            "SELECT c.fullname FROM contact c INNER JOIN account a ON c.parentcustomerid = a.accountid \
             ORDER BY a.name, c.fullname",
            "later link-entity",
        ),
    ];
    for (sql, expected) in cases {
        match convert(sql) {
            Err(err @ FxqError::Unsupported { .. }) => {
                assert!(err.to_string().contains(expected), "{sql}: {err}")
            }
            other => panic!("{sql}: expected unsupported, got {other:?}"),
        }
    }
}

#[test]
fn condition_functions_and_lists() {
    let q = select(
        "SELECT name FROM account WHERE createdon = lastxdays(7) AND statecode IN (0, 1) \
         AND revenue BETWEEN 10 AND 20.5",
    );
    let filter = q.fetch.entity.items.filters().next().expect("filter");
    let conditions = filter.conditions().collect::<Vec<_>>();
    assert_eq!(conditions[0].operator, ConditionOperator::LastXDays);
    assert_eq!(conditions[0].value.as_deref(), Some("7"));
    assert_eq!(conditions[1].operator, ConditionOperator::In);
    assert_eq!(conditions[1].values, ["0", "1"]);
    assert_eq!(conditions[2].operator, ConditionOperator::Between);
    assert_eq!(conditions[2].values, ["10", "20.5"]);
}

#[test]
fn distinct_sets_document_flag() {
    let q = select("SELECT DISTINCT name FROM account");
    assert!(q.fetch.distinct);
    assert!(matches!(
        q.fetch.entity.items.iter().next(),
        Some(FetchItem::Attribute(_))
    ));
}

#[test]
fn orders_attach_to_owning_entity_in_sequence() {
    let q = select(
        "SELECT c.fullname, c.lastname, a.name FROM contact c \
         INNER JOIN account a ON c.parentcustomerid = a.accountid \
         ORDER BY c.fullname DESC, c.lastname, a.name",
    );
    let root_orders = q
        .fetch
        .entity
        .items
        .orders()
        .map(|o| (o.attribute.as_deref(), o.descending))
        .collect::<Vec<_>>();
    assert_eq!(root_orders, [(Some("fullname"), true), (Some("lastname"), false)]);

    let link = q.fetch.entity.items.links().next().expect("link-entity");
    let link_orders = link
        .items
        .orders()
        .map(|o| (o.attribute.as_deref(), o.descending))
        .collect::<Vec<_>>();
    assert_eq!(link_orders, [(Some("name"), false)]);
}

#[test]
fn order_on_aliased_attribute_adds_plain_attribute() {
    for sql in [
        "SELECT name AS n FROM account ORDER BY name",
        "SELECT name AS n FROM account ORDER BY n",
    ] {
        let q = select(sql);
        assert_eq!(q.columns, ["n"], "{sql}");
        let attributes = q
            .fetch
            .entity
            .items
            .attributes()
            .map(|a| (a.name.as_str(), a.alias.as_deref()))
            .collect::<Vec<_>>();
        assert_eq!(attributes, [("name", Some("n")), ("name", None)], "{sql}");
        let order = q.fetch.entity.items.orders().next().expect("order");
        assert_eq!(order.attribute.as_deref(), Some("name"), "{sql}");
        assert!(order.alias.is_none(), "{sql}");
    }
}

#[test]
fn order_on_unaliased_attribute_adds_nothing() {
    let q = select("SELECT name FROM account ORDER BY name");
    assert_eq!(q.fetch.entity.items.attributes().count(), 1);
}

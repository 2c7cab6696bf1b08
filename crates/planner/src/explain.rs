use std::collections::BTreeMap;

use crate::physical_plan::{JoinType, PhysicalPlan};
use crate::query::{AttributeValue, Query};

/// Render a physical plan as human-readable multiline text.
pub fn explain_physical(plan: &PhysicalPlan) -> String {
    let mut s = String::new();
    fmt_plan(plan, 0, &mut s);
    s
}

/// Render a compiled single-document query, including its FetchXML.
pub fn explain_query(query: &Query) -> String {
    let mut out = String::new();
    match query {
        Query::Select(q) => {
            out.push_str(&format!(
                "Select columns={:?} all_pages={}\n",
                q.columns, q.all_pages
            ));
        }
        Query::InsertValues(q) => {
            out.push_str(&format!(
                "InsertValues entity={} rows={}\n",
                q.entity_name,
                q.rows.len()
            ));
            for row in &q.rows {
                out.push_str(&format!("  {}\n", fmt_row(row)));
            }
        }
        Query::InsertSelect(q) => {
            out.push_str(&format!(
                "InsertSelect entity={} mappings={:?}\n",
                q.entity_name, q.mappings
            ));
        }
        Query::Update(q) => {
            out.push_str(&format!(
                "Update entity={} key={}\n  set {}\n",
                q.entity_name,
                q.id_column,
                fmt_row(&q.updates)
            ));
        }
        Query::Delete(q) => {
            out.push_str(&format!(
                "Delete entity={} key={}\n",
                q.entity_name, q.id_column
            ));
        }
    }
    if let Some(fetch) = query.fetch() {
        push_xml(&fetch.to_xml(), "  ", &mut out);
    }
    out
}

fn fmt_plan(plan: &PhysicalPlan, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    match plan {
        PhysicalPlan::FetchXmlScan(scan) => {
            out.push_str(&format!("{pad}FetchXmlScan alias={}\n", scan.alias));
            push_xml(&scan.fetch.to_xml(), &format!("{pad}  "), out);
        }
        PhysicalPlan::NestedLoopJoin(join) => {
            out.push_str(&format!(
                "{pad}NestedLoopJoin type={}\n",
                fmt_join_type(join.join_type)
            ));
            if let Some(condition) = &join.condition {
                out.push_str(&format!("{pad}  on={condition}\n"));
            }
            out.push_str(&format!("{pad}  left:\n"));
            fmt_plan(&join.left, indent + 2, out);
            out.push_str(&format!("{pad}  right:\n"));
            fmt_plan(&join.right, indent + 2, out);
        }
        PhysicalPlan::MergeJoin(join) => {
            out.push_str(&format!(
                "{pad}MergeJoin type={} {} = {}\n",
                fmt_join_type(join.join_type),
                join.left_key,
                join.right_key
            ));
            out.push_str(&format!("{pad}  left:\n"));
            fmt_plan(&join.left, indent + 2, out);
            out.push_str(&format!("{pad}  right:\n"));
            fmt_plan(&join.right, indent + 2, out);
        }
        PhysicalPlan::Sort(sort) => {
            let keys = sort
                .keys
                .iter()
                .map(|k| format!("{}{}", k.expr, if k.descending { " DESC" } else { "" }))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!("{pad}Sort {keys}\n"));
            fmt_plan(&sort.input, indent + 1, out);
        }
        PhysicalPlan::Filter(filter) => {
            out.push_str(&format!("{pad}Filter {}\n", filter.predicate));
            fmt_plan(&filter.input, indent + 1, out);
        }
        PhysicalPlan::TableSpool(spool) => {
            out.push_str(&format!("{pad}TableSpool\n"));
            fmt_plan(&spool.input, indent + 1, out);
        }
        PhysicalPlan::Select(select) => {
            match &select.alias {
                Some(alias) => out.push_str(&format!("{pad}Select alias={alias}\n")),
                None => out.push_str(&format!("{pad}Select\n")),
            }
            for c in &select.columns {
                out.push_str(&format!("{pad}  {} := {}\n", c.output_name, c.source));
            }
            fmt_plan(&select.input, indent + 1, out);
        }
    }
}

fn push_xml(xml: &str, pad: &str, out: &mut String) {
    for line in xml.lines() {
        out.push_str(pad);
        out.push_str(line);
        out.push('\n');
    }
}

fn fmt_join_type(t: JoinType) -> &'static str {
    match t {
        JoinType::Inner => "inner",
        JoinType::LeftOuter => "left_outer",
        JoinType::RightOuter => "right_outer",
    }
}

fn fmt_row(values: &BTreeMap<String, AttributeValue>) -> String {
    values
        .iter()
        .map(|(attribute, value)| format!("{attribute}={value:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch_xml::{FetchEntity, FetchItem, FetchXml};
    use crate::physical_plan::{FetchXmlScanExec, SelectColumn, SelectExec};

    #[test]
    fn explain_indents_children_and_embeds_fetch_xml() {
        let mut root = FetchEntity::new("account");
        root.items.push(FetchItem::AllAttributes);
        let plan = PhysicalPlan::Select(SelectExec {
            input: Box::new(PhysicalPlan::FetchXmlScan(FetchXmlScanExec {
                alias: "account".into(),
                fetch: FetchXml::new(root),
            })),
            columns: vec![SelectColumn {
                source: "account.name".into(),
                output_name: "name".into(),
            }],
            alias: None,
        });
        let text = explain_physical(&plan);
        assert!(text.starts_with("Select\n  name := account.name\n  FetchXmlScan alias=account\n"));
        assert!(text.contains("    <fetch"));
        assert!(text.contains("<entity name=\"account\">"));
    }
}

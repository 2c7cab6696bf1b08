use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use fxq_common::Result;
use fxq_metadata::MetadataProvider;
use tracing::debug;

use crate::expr::Expr;
use crate::fetch_xml::{
    FetchAttribute, FetchItem, FetchItems, FetchLinkEntity, FetchOrder, LinkType,
};
use crate::physical_plan::{
    FetchXmlScanExec, FilterExec, JoinType, MergeJoinExec, NestedLoopJoinExec, PhysicalPlan,
    SelectColumn, SelectExec, SortExec, SortKey, TableSpoolExec,
};

/// Rule-based rewriter for physical plans.
///
/// Built-in rules run bottom-up, once per node, in a fixed order:
/// 1. fold a merge join of two scans into one scan with a link-entity
/// 2. fold a sort over a scan into the document's orders
/// 3. collapse a select over a select
/// 4. prune all-attributes down to the projected attributes
///
/// A rule whose preconditions do not hold leaves the node unchanged.
pub struct Optimizer {
    custom_rules: RwLock<HashMap<String, Arc<dyn OptimizerRule>>>,
}

/// Custom optimizer rule hook.
pub trait OptimizerRule: Send + Sync {
    /// Stable rule name used by registry.
    fn name(&self) -> &str;
    /// Rewrite input plan and return transformed plan.
    fn rewrite(&self, plan: PhysicalPlan, metadata: &dyn MetadataProvider) -> Result<PhysicalPlan>;
}

impl std::fmt::Debug for Optimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .custom_rules
            .read()
            .map(|m| m.len())
            .unwrap_or_default();
        f.debug_struct("Optimizer")
            .field("custom_rules", &count)
            .finish()
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimizer {
    /// Create a new optimizer.
    pub fn new() -> Self {
        Self {
            custom_rules: RwLock::new(HashMap::new()),
        }
    }

    /// Register or replace a custom optimizer rule.
    ///
    /// Returns `true` when an existing rule with the same name was replaced.
    pub fn register_rule(&self, rule: Arc<dyn OptimizerRule>) -> bool {
        self.custom_rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(rule.name().to_string(), rule)
            .is_some()
    }

    /// Deregister a custom optimizer rule by name.
    ///
    /// Returns `true` when an existing rule was removed.
    pub fn deregister_rule(&self, name: &str) -> bool {
        self.custom_rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    /// Apply the built-in rules, then custom rules ordered by name.
    pub fn optimize(
        &self,
        plan: PhysicalPlan,
        metadata: &dyn MetadataProvider,
    ) -> Result<PhysicalPlan> {
        let mut plan = transform_up(plan, &|node| {
            let node = fold_merge_join(node);
            let node = fold_sort(node);
            let node = collapse_select(node);
            prune_attributes(node)
        });

        let mut rules = self
            .custom_rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect::<Vec<_>>();
        rules.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, rule) in rules {
            debug!(rule = %name, "applying custom optimizer rule");
            plan = rule.rewrite(plan, metadata)?;
        }
        Ok(plan)
    }
}

/// Rebuild `plan` bottom-up, applying `f` to every node after its children.
pub fn transform_up(plan: PhysicalPlan, f: &dyn Fn(PhysicalPlan) -> PhysicalPlan) -> PhysicalPlan {
    let plan = map_children(plan, |child| transform_up(child, f));
    f(plan)
}

fn map_children(plan: PhysicalPlan, mut f: impl FnMut(PhysicalPlan) -> PhysicalPlan) -> PhysicalPlan {
    let mut apply = |b: Box<PhysicalPlan>| Box::new(f(*b));
    match plan {
        PhysicalPlan::FetchXmlScan(_) => plan,
        PhysicalPlan::NestedLoopJoin(x) => PhysicalPlan::NestedLoopJoin(NestedLoopJoinExec {
            left: apply(x.left),
            right: apply(x.right),
            ..x
        }),
        PhysicalPlan::MergeJoin(x) => PhysicalPlan::MergeJoin(MergeJoinExec {
            left: apply(x.left),
            right: apply(x.right),
            ..x
        }),
        PhysicalPlan::Sort(x) => PhysicalPlan::Sort(SortExec {
            input: apply(x.input),
            ..x
        }),
        PhysicalPlan::Filter(x) => PhysicalPlan::Filter(FilterExec {
            input: apply(x.input),
            ..x
        }),
        PhysicalPlan::TableSpool(x) => PhysicalPlan::TableSpool(TableSpoolExec {
            input: apply(x.input),
        }),
        PhysicalPlan::Select(x) => PhysicalPlan::Select(SelectExec {
            input: apply(x.input),
            ..x
        }),
    }
}

fn split_column(column: &str) -> Option<(&str, &str)> {
    column.rsplit_once('.')
}

fn foldable(scan: &FetchXmlScanExec) -> bool {
    let fetch = &scan.fetch;
    fetch.top.is_none()
        && fetch.page.is_none()
        && fetch.count.is_none()
        && !fetch.aggregate
        && !fetch.distinct
}

// -----------------------------
// 1) Merge join folding
// -----------------------------

fn fold_merge_join(plan: PhysicalPlan) -> PhysicalPlan {
    let PhysicalPlan::MergeJoin(join) = plan else {
        return plan;
    };
    match try_fold_merge_join(&join) {
        Some(scan) => {
            debug!(left_key = %join.left_key, right_key = %join.right_key, "folded merge join into link-entity");
            scan
        }
        None => PhysicalPlan::MergeJoin(join),
    }
}

/// Scan underneath a sort that only exists for a merge join.
fn ignorable_sorted_scan(plan: &PhysicalPlan) -> Option<&FetchXmlScanExec> {
    match plan {
        PhysicalPlan::Sort(SortExec {
            input,
            ignore_for_fetch_xml_folding: true,
            ..
        }) => match input.as_ref() {
            PhysicalPlan::FetchXmlScan(scan) => Some(scan),
            _ => None,
        },
        _ => None,
    }
}

fn try_fold_merge_join(join: &MergeJoinExec) -> Option<PhysicalPlan> {
    let left = ignorable_sorted_scan(&join.left)?;
    let right = ignorable_sorted_scan(&join.right)?;
    if !foldable(left) || !foldable(right) {
        return None;
    }
    let (root, link, root_key, link_key, link_type) = match join.join_type {
        JoinType::Inner => (left, right, &join.left_key, &join.right_key, LinkType::Inner),
        JoinType::LeftOuter => (left, right, &join.left_key, &join.right_key, LinkType::Outer),
        JoinType::RightOuter => (right, left, &join.right_key, &join.left_key, LinkType::Outer),
    };

    let (link_prefix, link_attr) = split_column(link_key)?;
    if !link_prefix.eq_ignore_ascii_case(&link.alias) {
        return None;
    }
    let (root_prefix, root_attr) = split_column(root_key)?;

    let mut root_aliases = vec![root.alias.clone()];
    collect_link_aliases(&root.fetch.entity.items, &mut root_aliases);
    let mut link_aliases = vec![link.alias.clone()];
    collect_link_aliases(&link.fetch.entity.items, &mut link_aliases);
    if link_aliases
        .iter()
        .any(|a| root_aliases.iter().any(|r| r.eq_ignore_ascii_case(a)))
    {
        return None;
    }

    let mut fetch = root.fetch.clone();
    let parent = if root_prefix.eq_ignore_ascii_case(&root.alias) {
        &mut fetch.entity.items
    } else {
        link_items_mut(&mut fetch.entity.items, root_prefix)?
    };
    parent.push(FetchItem::LinkEntity(FetchLinkEntity {
        name: link.fetch.entity.name.clone(),
        alias: link.alias.clone(),
        from: link_attr.to_string(),
        to: root_attr.to_string(),
        link_type,
        items: link.fetch.entity.items.clone(),
    }));
    fetch.no_lock |= link.fetch.no_lock;
    Some(PhysicalPlan::FetchXmlScan(FetchXmlScanExec {
        alias: root.alias.clone(),
        fetch,
    }))
}

fn collect_link_aliases(items: &FetchItems, out: &mut Vec<String>) {
    for link in items.links() {
        out.push(link.alias.clone());
        collect_link_aliases(&link.items, out);
    }
}

fn link_items_mut<'i>(items: &'i mut FetchItems, alias: &str) -> Option<&'i mut FetchItems> {
    for link in items.links_mut() {
        if link.alias.eq_ignore_ascii_case(alias) {
            return Some(&mut link.items);
        }
        if let Some(found) = link_items_mut(&mut link.items, alias) {
            return Some(found);
        }
    }
    None
}

// -----------------------------
// 2) Sort folding
// -----------------------------

fn fold_sort(plan: PhysicalPlan) -> PhysicalPlan {
    let PhysicalPlan::Sort(sort) = plan else {
        return plan;
    };
    let SortExec {
        input,
        keys,
        ignore_for_fetch_xml_folding,
    } = sort;
    match *input {
        PhysicalPlan::FetchXmlScan(mut scan) if !ignore_for_fetch_xml_folding => {
            match root_orders(&scan, &keys) {
                Some(orders) => {
                    debug!(keys = orders.len(), "folded sort into fetch orders");
                    for order in orders {
                        scan.fetch.entity.items.push(FetchItem::Order(order));
                    }
                    PhysicalPlan::FetchXmlScan(scan)
                }
                None => PhysicalPlan::Sort(SortExec {
                    input: Box::new(PhysicalPlan::FetchXmlScan(scan)),
                    keys,
                    ignore_for_fetch_xml_folding,
                }),
            }
        }
        other => PhysicalPlan::Sort(SortExec {
            input: Box::new(other),
            keys,
            ignore_for_fetch_xml_folding,
        }),
    }
}

/// Orders equivalent to `keys` when every key is a root-entity column and no
/// link-entity already sorts.
fn root_orders(scan: &FetchXmlScanExec, keys: &[SortKey]) -> Option<Vec<FetchOrder>> {
    if !foldable(scan) || any_link_orders(&scan.fetch.entity.items) {
        return None;
    }
    keys.iter()
        .map(|key| {
            let Expr::Column(column) = &key.expr else {
                return None;
            };
            let (prefix, name) = split_column(column)?;
            if !prefix.eq_ignore_ascii_case(&scan.alias) {
                return None;
            }
            let attribute = scan
                .fetch
                .entity
                .items
                .attributes()
                .find(|a| a.alias.as_deref().is_some_and(|al| al.eq_ignore_ascii_case(name)))
                .map(|a| a.name.clone())
                .unwrap_or_else(|| name.to_string());
            Some(FetchOrder {
                attribute: Some(attribute),
                alias: None,
                descending: key.descending,
            })
        })
        .collect()
}

fn any_link_orders(items: &FetchItems) -> bool {
    items
        .links()
        .any(|l| l.items.orders().next().is_some() || any_link_orders(&l.items))
}

// -----------------------------
// 3) Select collapsing
// -----------------------------

fn collapse_select(plan: PhysicalPlan) -> PhysicalPlan {
    let PhysicalPlan::Select(outer) = plan else {
        return plan;
    };
    let PhysicalPlan::Select(inner) = outer.input.as_ref() else {
        return PhysicalPlan::Select(outer);
    };
    let qualified = |c: &SelectColumn| match &inner.alias {
        Some(alias) => format!("{alias}.{}", c.output_name),
        None => c.output_name.clone(),
    };
    let columns = outer
        .columns
        .iter()
        .map(|column| {
            inner
                .columns
                .iter()
                .find(|c| qualified(c).eq_ignore_ascii_case(&column.source))
                .map(|c| SelectColumn {
                    source: c.source.clone(),
                    output_name: column.output_name.clone(),
                })
        })
        .collect::<Option<Vec<_>>>();
    match columns {
        Some(columns) => {
            debug!("collapsed nested select");
            PhysicalPlan::Select(SelectExec {
                input: inner.input.clone(),
                columns,
                alias: outer.alias,
            })
        }
        None => PhysicalPlan::Select(outer),
    }
}

// -----------------------------
// 4) Attribute pruning
// -----------------------------

fn prune_attributes(plan: PhysicalPlan) -> PhysicalPlan {
    let PhysicalPlan::Select(mut select) = plan else {
        return plan;
    };
    if let PhysicalPlan::FetchXmlScan(scan) = select.input.as_mut() {
        if !scan.fetch.aggregate {
            let mut selected: HashMap<String, Vec<String>> = HashMap::new();
            for column in &select.columns {
                if let Some((prefix, name)) = split_column(&column.source) {
                    let names = selected.entry(prefix.to_lowercase()).or_default();
                    if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                        names.push(name.to_string());
                    }
                }
            }
            let root = selected.get(&scan.alias.to_lowercase());
            if let Some(names) = root {
                replace_all_attributes(&mut scan.fetch.entity.items, names);
            }
            prune_links(&mut scan.fetch.entity.items, &selected);
        }
    }
    PhysicalPlan::Select(select)
}

fn replace_all_attributes(items: &mut FetchItems, names: &[String]) {
    if !items.has_all_attributes() {
        return;
    }
    items.remove_where(|i| matches!(i, FetchItem::AllAttributes));
    for name in names {
        let present = items
            .attributes()
            .any(|a| a.alias.is_none() && a.name.eq_ignore_ascii_case(name));
        if !present {
            items.push(FetchItem::Attribute(FetchAttribute::new(name.clone())));
        }
    }
}

fn prune_links(items: &mut FetchItems, selected: &HashMap<String, Vec<String>>) {
    for link in items.links_mut() {
        match selected.get(&link.alias.to_lowercase()) {
            Some(names) => replace_all_attributes(&mut link.items, names),
            None => {
                link.items
                    .remove_where(|i| matches!(i, FetchItem::AllAttributes));
            }
        }
        prune_links(&mut link.items, selected);
    }
}

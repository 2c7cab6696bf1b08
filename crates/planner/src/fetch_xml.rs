//! FetchXML document model.
//!
//! A document is a root [`FetchEntity`] holding an ordered list of child
//! declarations ([`FetchItems`]): attributes, the all-attributes marker,
//! filters, orders and nested [`FetchLinkEntity`] joins. Document-level flags
//! live on [`FetchXml`]. [`FetchXml::to_xml`] renders the native text form.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Complete FetchXML query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchXml {
    pub entity: FetchEntity,
    pub distinct: bool,
    pub aggregate: bool,
    pub no_lock: bool,
    pub top: Option<u32>,
    /// 1-based page number; only set together with `count`.
    pub page: Option<u32>,
    /// Page size.
    pub count: Option<u32>,
}

impl FetchXml {
    pub fn new(entity: FetchEntity) -> Self {
        Self {
            entity,
            distinct: false,
            aggregate: false,
            no_lock: false,
            top: None,
            page: None,
            count: None,
        }
    }

    /// Violations of the structural document rules; empty for a well-formed document.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.top.is_some() && (self.page.is_some() || self.count.is_some()) {
            out.push("top cannot be combined with paging".to_string());
        }
        if self.page.is_some() != self.count.is_some() {
            out.push("page and count must be set together".to_string());
        }
        collect_violations(&self.entity.name, &self.entity.items, self.aggregate, &mut out);
        out
    }

    /// Render as indented FetchXML text.
    pub fn to_xml(&self) -> String {
        let mut out = String::from("<fetch");
        if self.aggregate {
            out.push_str(" aggregate=\"true\"");
        }
        if self.distinct {
            out.push_str(" distinct=\"true\"");
        }
        if self.no_lock {
            out.push_str(" no-lock=\"true\"");
        }
        if let Some(top) = self.top {
            let _ = write!(out, " top=\"{top}\"");
        }
        if let Some(count) = self.count {
            let _ = write!(out, " count=\"{count}\"");
        }
        if let Some(page) = self.page {
            let _ = write!(out, " page=\"{page}\"");
        }
        out.push_str(">\n");
        let _ = writeln!(out, "  <entity name=\"{}\">", escape(&self.entity.name));
        fmt_items(&self.entity.items, 2, &mut out);
        out.push_str("  </entity>\n</fetch>\n");
        out
    }
}

fn collect_violations(owner: &str, items: &FetchItems, aggregate: bool, out: &mut Vec<String>) {
    for attr in items.attributes() {
        let annotated = attr.aggregate.is_some() || attr.date_grouping.is_some() || attr.group_by;
        if annotated && !aggregate {
            out.push(format!("{owner}.{} is aggregated outside an aggregate query", attr.name));
        }
        if annotated && attr.alias.is_none() {
            out.push(format!("{owner}.{} is grouped or aggregated without an alias", attr.name));
        }
    }
    for filter in items.filters() {
        filter_violations(owner, filter, out);
    }
    for link in items.links() {
        collect_violations(&link.alias, &link.items, aggregate, out);
    }
}

fn filter_violations(owner: &str, filter: &FetchFilter, out: &mut Vec<String>) {
    if filter.filter_type == FilterType::Unset {
        out.push(format!("filter on {owner} has no logical operator"));
    }
    for item in &filter.items {
        if let FilterItem::Filter(child) = item {
            filter_violations(owner, child, out);
        }
    }
}

/// Root entity declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchEntity {
    pub name: String,
    pub items: FetchItems,
}

impl FetchEntity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: FetchItems::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkType {
    Inner,
    Outer,
}

impl LinkType {
    pub fn xml_name(self) -> &'static str {
        match self {
            Self::Inner => "inner",
            Self::Outer => "outer",
        }
    }
}

/// Joined entity nested under its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchLinkEntity {
    pub name: String,
    pub alias: String,
    /// Attribute on this (linked) entity.
    pub from: String,
    /// Attribute on the parent entity.
    pub to: String,
    pub link_type: LinkType,
    pub items: FetchItems,
}

/// One child declaration of an entity or link-entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FetchItem {
    Attribute(FetchAttribute),
    AllAttributes,
    Filter(FetchFilter),
    Order(FetchOrder),
    LinkEntity(FetchLinkEntity),
}

/// Ordered heterogeneous child list with typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FetchItems(Vec<FetchItem>);

impl FetchItems {
    pub fn push(&mut self, item: FetchItem) {
        self.0.push(item);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FetchItem> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, FetchItem> {
        self.0.iter_mut()
    }

    pub fn contains(&self, pred: impl Fn(&FetchItem) -> bool) -> bool {
        self.0.iter().any(pred)
    }

    /// Removes every item matching `pred`; returns how many were removed.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&FetchItem) -> bool) -> usize {
        let before = self.0.len();
        self.0.retain(|item| !pred(item));
        before - self.0.len()
    }

    pub fn has_all_attributes(&self) -> bool {
        self.contains(|i| matches!(i, FetchItem::AllAttributes))
    }

    pub fn attributes(&self) -> impl Iterator<Item = &FetchAttribute> {
        self.0.iter().filter_map(|i| match i {
            FetchItem::Attribute(a) => Some(a),
            _ => None,
        })
    }

    pub fn attributes_mut(&mut self) -> impl Iterator<Item = &mut FetchAttribute> {
        self.0.iter_mut().filter_map(|i| match i {
            FetchItem::Attribute(a) => Some(a),
            _ => None,
        })
    }

    pub fn filters(&self) -> impl Iterator<Item = &FetchFilter> {
        self.0.iter().filter_map(|i| match i {
            FetchItem::Filter(f) => Some(f),
            _ => None,
        })
    }

    pub fn orders(&self) -> impl Iterator<Item = &FetchOrder> {
        self.0.iter().filter_map(|i| match i {
            FetchItem::Order(o) => Some(o),
            _ => None,
        })
    }

    pub fn links(&self) -> impl Iterator<Item = &FetchLinkEntity> {
        self.0.iter().filter_map(|i| match i {
            FetchItem::LinkEntity(l) => Some(l),
            _ => None,
        })
    }

    pub fn links_mut(&mut self) -> impl Iterator<Item = &mut FetchLinkEntity> {
        self.0.iter_mut().filter_map(|i| match i {
            FetchItem::LinkEntity(l) => Some(l),
            _ => None,
        })
    }
}

impl FromIterator<FetchItem> for FetchItems {
    fn from_iter<T: IntoIterator<Item = FetchItem>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateType {
    Count,
    CountColumn,
    Avg,
    Min,
    Max,
    Sum,
}

impl AggregateType {
    pub fn xml_name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::CountColumn => "countcolumn",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Sum => "sum",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateGrouping {
    Day,
    Week,
    Month,
    Quarter,
    Year,
    FiscalPeriod,
    FiscalYear,
}

impl DateGrouping {
    /// Parse a DATEPART part name, including its T-SQL abbreviations.
    pub fn from_date_part(part: &str) -> Option<Self> {
        Some(match part.to_ascii_lowercase().as_str() {
            "year" | "yy" | "yyyy" => Self::Year,
            "quarter" | "qq" | "q" => Self::Quarter,
            "month" | "mm" | "m" => Self::Month,
            "week" | "wk" | "ww" => Self::Week,
            "day" | "dd" | "d" => Self::Day,
            "fiscalperiod" => Self::FiscalPeriod,
            "fiscalyear" => Self::FiscalYear,
            _ => return None,
        })
    }

    pub fn xml_name(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
            Self::Year => "year",
            Self::FiscalPeriod => "fiscal-period",
            Self::FiscalYear => "fiscal-year",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchAttribute {
    pub name: String,
    pub alias: Option<String>,
    pub aggregate: Option<AggregateType>,
    pub date_grouping: Option<DateGrouping>,
    pub group_by: bool,
    /// `count(distinct ...)`.
    pub distinct: bool,
}

impl FetchAttribute {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Sort declaration; aggregate queries sort by `alias`, others by `attribute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchOrder {
    pub attribute: Option<String>,
    pub alias: Option<String>,
    pub descending: bool,
}

/// Logical operator of a filter. `Unset` only exists while lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterType {
    Unset,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchFilter {
    pub filter_type: FilterType,
    pub items: Vec<FilterItem>,
}

impl FetchFilter {
    pub fn new(filter_type: FilterType) -> Self {
        Self {
            filter_type,
            items: Vec::new(),
        }
    }

    /// Number of condition leaves in this filter tree.
    pub fn condition_count(&self) -> usize {
        self.items
            .iter()
            .map(|i| match i {
                FilterItem::Condition(_) => 1,
                FilterItem::Filter(f) => f.condition_count(),
            })
            .sum()
    }

    pub fn conditions(&self) -> impl Iterator<Item = &FetchCondition> {
        self.items.iter().filter_map(|i| match i {
            FilterItem::Condition(c) => Some(c),
            FilterItem::Filter(_) => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterItem {
    Condition(FetchCondition),
    Filter(FetchFilter),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchCondition {
    /// Alias of the entity the attribute belongs to; `None` for the entity
    /// that owns the filter.
    pub entity_name: Option<String>,
    pub attribute: String,
    pub operator: ConditionOperator,
    pub value: Option<String>,
    /// Values of set operators (`in`, `between`, ...).
    pub values: Vec<String>,
}

macro_rules! condition_operators {
    ($($variant:ident => $xml:literal,)*) => {
        /// Native FetchXML condition operators.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum ConditionOperator {
            $($variant,)*
        }

        impl ConditionOperator {
            pub const ALL: &'static [ConditionOperator] = &[$(ConditionOperator::$variant,)*];

            pub fn xml_name(self) -> &'static str {
                match self {
                    $(Self::$variant => $xml,)*
                }
            }
        }
    };
}

condition_operators! {
    Eq => "eq",
    Ne => "ne",
    Gt => "gt",
    Ge => "ge",
    Lt => "lt",
    Le => "le",
    Like => "like",
    NotLike => "not-like",
    In => "in",
    NotIn => "not-in",
    Between => "between",
    NotBetween => "not-between",
    Null => "null",
    NotNull => "not-null",
    Yesterday => "yesterday",
    Today => "today",
    Tomorrow => "tomorrow",
    LastSevenDays => "last-seven-days",
    NextSevenDays => "next-seven-days",
    LastWeek => "last-week",
    ThisWeek => "this-week",
    NextWeek => "next-week",
    LastMonth => "last-month",
    ThisMonth => "this-month",
    NextMonth => "next-month",
    On => "on",
    OnOrBefore => "on-or-before",
    OnOrAfter => "on-or-after",
    LastYear => "last-year",
    ThisYear => "this-year",
    NextYear => "next-year",
    LastXHours => "last-x-hours",
    NextXHours => "next-x-hours",
    LastXDays => "last-x-days",
    NextXDays => "next-x-days",
    LastXWeeks => "last-x-weeks",
    NextXWeeks => "next-x-weeks",
    LastXMonths => "last-x-months",
    NextXMonths => "next-x-months",
    LastXYears => "last-x-years",
    NextXYears => "next-x-years",
    OlderThanXMinutes => "olderthan-x-minutes",
    OlderThanXHours => "olderthan-x-hours",
    OlderThanXDays => "olderthan-x-days",
    OlderThanXWeeks => "olderthan-x-weeks",
    OlderThanXMonths => "olderthan-x-months",
    OlderThanXYears => "olderthan-x-years",
    EqUserId => "eq-userid",
    NeUserId => "ne-userid",
    EqUserTeams => "eq-userteams",
    EqUserOrUserTeams => "eq-useroruserteams",
    EqUserOrUserHierarchy => "eq-useroruserhierarchy",
    EqUserOrUserHierarchyAndTeams => "eq-useroruserhierarchyandteams",
    EqBusinessId => "eq-businessid",
    NeBusinessId => "ne-businessid",
    EqUserLanguage => "eq-userlanguage",
    ThisFiscalYear => "this-fiscal-year",
    ThisFiscalPeriod => "this-fiscal-period",
    NextFiscalYear => "next-fiscal-year",
    NextFiscalPeriod => "next-fiscal-period",
    LastFiscalYear => "last-fiscal-year",
    LastFiscalPeriod => "last-fiscal-period",
    LastXFiscalYears => "last-x-fiscal-years",
    LastXFiscalPeriods => "last-x-fiscal-periods",
    NextXFiscalYears => "next-x-fiscal-years",
    NextXFiscalPeriods => "next-x-fiscal-periods",
    InFiscalYear => "in-fiscal-year",
    InFiscalPeriod => "in-fiscal-period",
    InFiscalPeriodAndYear => "in-fiscal-period-and-year",
    InOrBeforeFiscalPeriodAndYear => "in-or-before-fiscal-period-and-year",
    InOrAfterFiscalPeriodAndYear => "in-or-after-fiscal-period-and-year",
    BeginsWith => "begins-with",
    NotBeginWith => "not-begin-with",
    EndsWith => "ends-with",
    NotEndWith => "not-end-with",
    Under => "under",
    EqOrUnder => "eq-or-under",
    NotUnder => "not-under",
    Above => "above",
    EqOrAbove => "eq-or-above",
    ContainValues => "contain-values",
    NotContainValues => "not-contain-values",
}

impl ConditionOperator {
    /// Resolve a SQL function name (`lastxdays`, `last_x_days`, `LastXDays`) to an operator.
    pub fn from_function_name(name: &str) -> Option<Self> {
        let wanted = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.xml_name().replace('-', "") == wanted)
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

fn fmt_items(items: &FetchItems, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    for item in items.iter() {
        match item {
            FetchItem::Attribute(a) => {
                let _ = write!(out, "{pad}<attribute name=\"{}\"", escape(&a.name));
                if let Some(alias) = &a.alias {
                    let _ = write!(out, " alias=\"{}\"", escape(alias));
                }
                if let Some(agg) = a.aggregate {
                    let _ = write!(out, " aggregate=\"{}\"", agg.xml_name());
                }
                if a.distinct {
                    out.push_str(" distinct=\"true\"");
                }
                if let Some(grouping) = a.date_grouping {
                    let _ = write!(out, " dategrouping=\"{}\"", grouping.xml_name());
                }
                if a.group_by {
                    out.push_str(" groupby=\"true\"");
                }
                out.push_str(" />\n");
            }
            FetchItem::AllAttributes => {
                let _ = writeln!(out, "{pad}<all-attributes />");
            }
            FetchItem::Order(o) => {
                out.push_str(&pad);
                out.push_str("<order");
                if let Some(attr) = &o.attribute {
                    let _ = write!(out, " attribute=\"{}\"", escape(attr));
                }
                if let Some(alias) = &o.alias {
                    let _ = write!(out, " alias=\"{}\"", escape(alias));
                }
                let _ = writeln!(out, " descending=\"{}\" />", o.descending);
            }
            FetchItem::Filter(f) => fmt_filter(f, indent, out),
            FetchItem::LinkEntity(l) => {
                let _ = writeln!(
                    out,
                    "{pad}<link-entity name=\"{}\" alias=\"{}\" from=\"{}\" to=\"{}\" link-type=\"{}\">",
                    escape(&l.name),
                    escape(&l.alias),
                    escape(&l.from),
                    escape(&l.to),
                    l.link_type.xml_name()
                );
                fmt_items(&l.items, indent + 1, out);
                let _ = writeln!(out, "{pad}</link-entity>");
            }
        }
    }
}

fn fmt_filter(filter: &FetchFilter, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    let kind = match filter.filter_type {
        FilterType::Or => "or",
        FilterType::And | FilterType::Unset => "and",
    };
    let _ = writeln!(out, "{pad}<filter type=\"{kind}\">");
    for item in &filter.items {
        match item {
            FilterItem::Filter(child) => fmt_filter(child, indent + 1, out),
            FilterItem::Condition(c) => {
                let _ = write!(out, "{pad}  <condition");
                if let Some(entity) = &c.entity_name {
                    let _ = write!(out, " entityname=\"{}\"", escape(entity));
                }
                let _ = write!(
                    out,
                    " attribute=\"{}\" operator=\"{}\"",
                    escape(&c.attribute),
                    c.operator.xml_name()
                );
                if let Some(value) = &c.value {
                    let _ = write!(out, " value=\"{}\"", escape(value));
                }
                if c.values.is_empty() {
                    out.push_str(" />\n");
                } else {
                    out.push_str(">\n");
                    for value in &c.values {
                        let _ = writeln!(out, "{pad}    <value>{}</value>", escape(value));
                    }
                    let _ = writeln!(out, "{pad}  </condition>");
                }
            }
        }
    }
    let _ = writeln!(out, "{pad}</filter>");
}

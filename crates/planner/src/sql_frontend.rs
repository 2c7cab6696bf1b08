use fxq_common::{CompilerConfig, FxqError, Result};
use fxq_metadata::MetadataProvider;
use sqlparser::ast::{
    Distinct, DuplicateTreatment, Expr as SqlExpr, Function, FunctionArg, FunctionArgExpr,
    FunctionArguments, GroupByExpr, Ident, JoinConstraint, JoinOperator, ObjectName, OrderBy,
    Query as SqlQuery, Select, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins, Top,
    TopQuantity, Value,
};
use tracing::debug;

use crate::dml;
use crate::entity_table::{EntityTable, TableSet};
use crate::fetch_xml::{
    AggregateType, DateGrouping, FetchAttribute, FetchFilter, FetchItem, FetchLinkEntity,
    FetchOrder, FetchXml, FilterType, LinkType,
};
use crate::query::{Query, SelectQuery};
use crate::where_clause::{lower_filter, FilterContext};

/// Lowers SQL statements to FetchXML documents.
///
/// Each statement gets its own [`Lowering`] state; nothing is shared between
/// statements.
pub struct Sql2FetchXml<'a> {
    pub(crate) metadata: &'a dyn MetadataProvider,
    pub(crate) config: &'a CompilerConfig,
}

/// Per-statement lowering state.
#[derive(Debug, Default)]
pub(crate) struct Lowering {
    pub tables: TableSet,
    pub columns: Vec<String>,
    pub aggregate: bool,
    pub distinct: bool,
    pub no_lock: bool,
    pub top: Option<u32>,
    pub page: Option<u32>,
    pub count: Option<u32>,
}

impl Lowering {
    pub fn finish(self) -> Result<(FetchXml, Vec<String>)> {
        let entity = self.tables.into_entity()?;
        let fetch = FetchXml {
            entity,
            distinct: self.distinct,
            aggregate: self.aggregate,
            no_lock: self.no_lock,
            top: self.top,
            page: self.page,
            count: self.count,
        };
        Ok((fetch, self.columns))
    }
}

impl<'a> Sql2FetchXml<'a> {
    pub fn new(metadata: &'a dyn MetadataProvider, config: &'a CompilerConfig) -> Self {
        Self { metadata, config }
    }

    /// Parse and lower every statement of `sql`.
    pub fn convert(&self, sql: &str) -> Result<Vec<Query>> {
        fxq_sql::parse_sql(sql, self.config.dialect)?
            .iter()
            .map(|stmt| self.convert_statement(stmt))
            .collect()
    }

    pub fn convert_statement(&self, stmt: &Statement) -> Result<Query> {
        let query = match stmt {
            Statement::Query(q) => Query::Select(self.convert_select(q)?),
            Statement::Insert(insert) => dml::convert_insert(self, stmt, insert)?,
            Statement::Update {
                table,
                assignments,
                from,
                selection,
                returning,
                ..
            } => {
                if from.is_some() {
                    return Err(FxqError::unsupported("UPDATE with FROM clause", stmt));
                }
                if returning.is_some() {
                    return Err(FxqError::unsupported("Unhandled OUTPUT clause", stmt));
                }
                dml::convert_update(self, table, assignments, selection.as_ref())?
            }
            Statement::Delete(delete) => dml::convert_delete(self, stmt, delete)?,
            other => return Err(FxqError::unsupported("Unsupported statement", other)),
        };
        debug!(statement = %stmt, "lowered statement to FetchXML");
        Ok(query)
    }

    /// SELECT pipeline: FROM, SELECT, TOP, OFFSET, WHERE, GROUP BY, ORDER BY, DISTINCT.
    pub fn convert_select(&self, query: &SqlQuery) -> Result<SelectQuery> {
        if query.with.is_some() {
            return Err(FxqError::unsupported("Unhandled SELECT WITH clause", query));
        }
        if query.for_clause.is_some() {
            return Err(FxqError::unsupported("Unhandled SELECT FOR clause", query));
        }
        let select = select_body(query)?;
        if select.into.is_some() {
            return Err(FxqError::unsupported("Unhandled SELECT INTO clause", select));
        }
        if select.having.is_some() {
            return Err(FxqError::unsupported("Unhandled HAVING clause", select));
        }

        let mut st = Lowering::default();

        // FROM
        self.handle_from(&select.from, &mut st)?;

        // SELECT
        self.handle_select(&select.projection, &mut st)?;

        // TOP / LIMIT
        self.handle_top(select.top.as_ref(), query, &mut st)?;

        // OFFSET
        self.handle_offset(query, &mut st)?;

        // WHERE
        self.handle_where(select.selection.as_ref(), &mut st)?;

        // GROUP BY
        self.handle_group_by(&select.group_by, &mut st)?;

        // ORDER BY
        self.handle_order_by(query.order_by.as_ref(), &mut st)?;

        // DISTINCT
        st.distinct = match &select.distinct {
            None => false,
            Some(Distinct::Distinct) => true,
            Some(other @ Distinct::On(_)) => {
                return Err(FxqError::unsupported("Unhandled DISTINCT ON", other))
            }
        };

        let (fetch, columns) = st.finish()?;
        let all_pages = fetch.page.is_none() && fetch.count.is_none();
        Ok(SelectQuery {
            fetch,
            columns,
            all_pages,
        })
    }

    pub(crate) fn handle_from(&self, from: &[TableWithJoins], st: &mut Lowering) -> Result<()> {
        let [twj] = from else {
            let fragment = from
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(if from.is_empty() {
                FxqError::unsupported("No source entity specified", "FROM")
            } else {
                FxqError::unsupported(
                    "Only a single table or a chain of qualified joins is supported",
                    fragment,
                )
            });
        };

        let (name, alias) = self.named_table(&twj.relation, st)?;
        let root = EntityTable::root(self.metadata, &name, alias)?;
        st.tables.add(root, &twj.relation)?;

        for join in &twj.joins {
            let (link_type, constraint) = match &join.join_operator {
                JoinOperator::Inner(c) => (LinkType::Inner, c),
                JoinOperator::LeftOuter(c) => (LinkType::Outer, c),
                _ => return Err(FxqError::unsupported("Unsupported join type", join)),
            };
            let JoinConstraint::On(on) = constraint else {
                return Err(FxqError::unsupported("Unsupported join constraint", join));
            };
            self.handle_join(&join.relation, link_type, on, st)?;
        }
        Ok(())
    }

    fn handle_join(
        &self,
        relation: &TableFactor,
        link_type: LinkType,
        on: &SqlExpr,
        st: &mut Lowering,
    ) -> Result<()> {
        let (name, alias) = self.named_table(relation, st)?;
        let table = EntityTable::link(self.metadata, &name, alias, link_type)?;
        let link_index = st.tables.add(table, relation)?;

        let mut filter = FetchFilter::new(FilterType::Unset);
        let mut ctx = FilterContext::join(self.config.quoted_identifiers);
        lower_filter(on, &mut filter, &st.tables, link_index, &mut ctx)?;

        let Some((first, second)) = ctx.join_columns else {
            return Err(FxqError::unsupported("Missing join condition", on));
        };
        let first_table = st.tables.column_table(&first, on)?;
        let second_table = st.tables.column_table(&second, on)?;
        let (link_column, parent_column, parent) =
            if second_table == link_index && first_table != link_index {
                (second, first, first_table)
            } else if first_table == link_index && second_table != link_index {
                (first, second, second_table)
            } else {
                return Err(FxqError::unsupported(
                    "Join condition must compare the joined table with a previous table",
                    on,
                ));
            };

        let table = st.tables.get_mut(link_index);
        let stub = match table.link_entity_mut() {
            Some(link) => {
                link.from = last_part(&link_column);
                link.to = last_part(&parent_column);
                FetchLinkEntity {
                    items: Default::default(),
                    ..link.clone()
                }
            }
            None => return Err(FxqError::unsupported("Unhandled join target", relation)),
        };
        if !filter.items.is_empty() {
            if filter.filter_type == FilterType::Unset {
                filter.filter_type = FilterType::And;
            }
            table.add_item(FetchItem::Filter(filter));
        }
        debug!(link = %stub.alias, from = %stub.from, to = %stub.to, "added link-entity");
        st.tables.get_mut(parent).add_item(FetchItem::LinkEntity(stub));
        Ok(())
    }

    /// Entity name and alias of a plain table reference; records `NOLOCK`.
    fn named_table(
        &self,
        relation: &TableFactor,
        st: &mut Lowering,
    ) -> Result<(String, Option<String>)> {
        let TableFactor::Table {
            name,
            alias,
            args,
            with_hints,
            ..
        } = relation
        else {
            return Err(FxqError::unsupported("Unhandled table reference", relation));
        };
        if args.is_some() {
            return Err(FxqError::unsupported("Unhandled table-valued function", relation));
        }
        for hint in with_hints {
            match hint {
                SqlExpr::Identifier(id) if id.value.eq_ignore_ascii_case("NOLOCK") => {
                    st.no_lock = true
                }
                other => return Err(FxqError::unsupported("Unsupported table hint", other)),
            }
        }
        if let Some(alias) = alias {
            if !alias.columns.is_empty() {
                return Err(FxqError::unsupported("Unhandled table alias column list", relation));
            }
        }
        Ok((
            object_name_last(name),
            alias.as_ref().map(|a| a.name.value.clone()),
        ))
    }

    fn handle_select(&self, projection: &[SelectItem], st: &mut Lowering) -> Result<()> {
        for item in projection {
            match item {
                SelectItem::UnnamedExpr(expr) => self.select_expr(expr, None, st)?,
                SelectItem::ExprWithAlias { expr, alias } => {
                    self.select_expr(expr, Some(alias.value.clone()), st)?
                }
                SelectItem::Wildcard(_) => {
                    for index in 0..st.tables.len() {
                        select_star(index, item, st)?;
                    }
                }
                SelectItem::QualifiedWildcard(name, _) => {
                    let table_name = object_name_last(name);
                    let index = st.tables.find(&table_name, item)?.ok_or_else(|| {
                        FxqError::semantic(format!("Unknown table '{table_name}'"), item)
                    })?;
                    select_star(index, item, st)?;
                }
            }
        }
        Ok(())
    }

    fn select_expr(&self, expr: &SqlExpr, alias: Option<String>, st: &mut Lowering) -> Result<()> {
        if let Some(parts) = column_parts(expr) {
            let index = st.tables.column_table(&parts, expr)?;
            let attribute = last_part(&parts);
            let table = st.tables.get_mut(index);
            if table.items().has_all_attributes() {
                if alias.is_some() {
                    return Err(FxqError::unsupported(
                        "Cannot add aliased column and wildcard from the same table",
                        expr,
                    ));
                }
            } else {
                table.add_item(FetchItem::Attribute(FetchAttribute {
                    alias: alias.clone(),
                    ..FetchAttribute::new(attribute.clone())
                }));
            }
            let column = alias.unwrap_or_else(|| table.output_name(&attribute));
            st.columns.push(column);
            return Ok(());
        }
        match expr {
            SqlExpr::Function(func) => self.select_function(func, alias, st),
            other => Err(FxqError::unsupported("Unhandled SELECT clause", other)),
        }
    }

    fn select_function(&self, func: &Function, alias: Option<String>, st: &mut Lowering) -> Result<()> {
        let args = plain_function_args(func)?;
        let name = object_name_last(&func.name).to_ascii_lowercase();

        let (index, attribute, suffix) = if name == "datepart" {
            let (grouping, parts) = date_part(func, args)?;
            let index = st.tables.column_table(&parts, func)?;
            let attribute = FetchAttribute {
                date_grouping: Some(grouping),
                ..FetchAttribute::new(last_part(&parts))
            };
            (index, attribute, grouping.xml_name())
        } else {
            let [arg] = args.args.as_slice() else {
                return Err(FxqError::unsupported("Unhandled function", func));
            };
            let mut aggregate = match name.as_str() {
                "count" => AggregateType::CountColumn,
                "avg" => AggregateType::Avg,
                "min" => AggregateType::Min,
                "max" => AggregateType::Max,
                "sum" => AggregateType::Sum,
                _ => return Err(FxqError::unsupported("Unhandled function", func)),
            };
            let (index, attr_name) = match arg {
                FunctionArg::Unnamed(FunctionArgExpr::Wildcard)
                    if aggregate == AggregateType::CountColumn =>
                {
                    aggregate = AggregateType::Count;
                    let root = st.tables.get(0);
                    (0, root.metadata().primary_id_attribute.clone())
                }
                FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => {
                    let parts = column_parts(e).ok_or_else(|| {
                        FxqError::unsupported("Unhandled function parameter", func)
                    })?;
                    (st.tables.column_table(&parts, e)?, last_part(&parts))
                }
                _ => return Err(FxqError::unsupported("Unhandled function parameter", func)),
            };
            let attribute = FetchAttribute {
                aggregate: Some(aggregate),
                distinct: matches!(args.duplicate_treatment, Some(DuplicateTreatment::Distinct)),
                ..FetchAttribute::new(attr_name)
            };
            (index, attribute, aggregate.xml_name())
        };

        st.aggregate = true;
        let alias = alias.unwrap_or_else(|| unique_alias(&attribute.name, suffix, &st.columns));
        st.columns.push(alias.clone());
        st.tables
            .get_mut(index)
            .add_item(FetchItem::Attribute(FetchAttribute {
                alias: Some(alias),
                ..attribute
            }));
        Ok(())
    }

    pub(crate) fn handle_top(
        &self,
        top: Option<&Top>,
        query: &SqlQuery,
        st: &mut Lowering,
    ) -> Result<()> {
        if let Some(top) = top {
            if top.percent {
                return Err(FxqError::unsupported("Unhandled TOP PERCENT", top));
            }
            if top.with_ties {
                return Err(FxqError::unsupported("Unhandled TOP WITH TIES", top));
            }
            let value = match &top.quantity {
                Some(TopQuantity::Constant(n)) => u32::try_from(*n).ok(),
                Some(TopQuantity::Expr(e)) => integer_literal(e),
                None => None,
            };
            st.top = Some(value.ok_or_else(|| FxqError::unsupported("Unhandled TOP expression", top))?);
        }
        if query.offset.is_some() {
            return Ok(());
        }
        let limit = match (&query.limit, &query.fetch) {
            (Some(limit), None) => Some(
                integer_literal(limit)
                    .ok_or_else(|| FxqError::unsupported("Unhandled LIMIT expression", limit))?,
            ),
            (None, Some(fetch)) => {
                if fetch.percent || fetch.with_ties {
                    return Err(FxqError::unsupported("Unhandled FETCH clause", fetch));
                }
                Some(
                    fetch
                        .quantity
                        .as_ref()
                        .and_then(integer_literal)
                        .ok_or_else(|| FxqError::unsupported("Unhandled FETCH clause", fetch))?,
                )
            }
            (None, None) => None,
            (Some(_), Some(_)) => {
                return Err(FxqError::unsupported("LIMIT cannot be combined with FETCH", query))
            }
        };
        if let Some(limit) = limit {
            if st.top.is_some() {
                return Err(FxqError::unsupported("TOP cannot be combined with LIMIT", query));
            }
            st.top = Some(limit);
        }
        Ok(())
    }

    fn handle_offset(&self, query: &SqlQuery, st: &mut Lowering) -> Result<()> {
        let Some(offset) = &query.offset else {
            return Ok(());
        };
        if st.top.is_some() {
            return Err(FxqError::unsupported("TOP cannot be combined with OFFSET", offset));
        }
        let size = match (&query.fetch, &query.limit) {
            (Some(fetch), _) => {
                if fetch.percent || fetch.with_ties {
                    return Err(FxqError::unsupported("Unhandled FETCH clause", fetch));
                }
                fetch.quantity.as_ref().and_then(integer_literal)
            }
            (None, Some(limit)) => integer_literal(limit),
            (None, None) => {
                return Err(FxqError::unsupported("OFFSET without FETCH", offset));
            }
        }
        .ok_or_else(|| FxqError::unsupported("Unhandled FETCH expression", query))?;
        let start = integer_literal(&offset.value)
            .ok_or_else(|| FxqError::unsupported("Unhandled OFFSET expression", offset))?;

        if size == 0 || start % size != 0 {
            return Err(FxqError::unsupported(
                "Offset must be an integer multiple of fetch",
                offset,
            ));
        }
        st.count = Some(size);
        st.page = Some(start / size + 1);
        Ok(())
    }

    pub(crate) fn handle_where(&self, selection: Option<&SqlExpr>, st: &mut Lowering) -> Result<()> {
        let Some(selection) = selection else {
            return Ok(());
        };
        let mut filter = FetchFilter::new(FilterType::Unset);
        let mut ctx = FilterContext::where_clause(self.config.quoted_identifiers);
        lower_filter(selection, &mut filter, &st.tables, 0, &mut ctx)?;
        if filter.filter_type == FilterType::Unset {
            filter.filter_type = FilterType::And;
        }
        st.tables.get_mut(0).add_item(FetchItem::Filter(filter));
        Ok(())
    }

    fn handle_group_by(&self, group_by: &GroupByExpr, st: &mut Lowering) -> Result<()> {
        let exprs = match group_by {
            GroupByExpr::Expressions(exprs, modifiers) => {
                if !modifiers.is_empty() {
                    return Err(FxqError::unsupported("Unhandled GROUP BY option", group_by));
                }
                exprs
            }
            other => return Err(FxqError::unsupported("Unhandled GROUP BY clause", other)),
        };
        if exprs.is_empty() {
            return Ok(());
        }
        st.aggregate = true;

        for expr in exprs {
            let (parts, grouping) = match expr {
                SqlExpr::Function(func)
                    if object_name_last(&func.name).eq_ignore_ascii_case("datepart") =>
                {
                    let (grouping, parts) = date_part(func, plain_function_args(func)?)?;
                    (parts, Some(grouping))
                }
                other => (
                    column_parts(other).ok_or_else(|| {
                        FxqError::unsupported("Unhandled GROUP BY expression", other)
                    })?,
                    None,
                ),
            };
            let index = st.tables.column_table(&parts, expr)?;
            let name = last_part(&parts);
            let table = st.tables.get_mut(index);
            let qualified = format!("{}.{name}", table.reference_name());

            let matches = |a: &FetchAttribute| {
                a.name.eq_ignore_ascii_case(&name)
                    && a.date_grouping == grouping
                    && a.aggregate.is_none()
            };
            if !table.items().attributes().any(|a| matches(a)) {
                table.add_item(FetchItem::Attribute(FetchAttribute {
                    date_grouping: grouping,
                    ..FetchAttribute::new(name.clone())
                }));
            }
            let mut renamed = None;
            if let Some(attr) = table.items_mut().attributes_mut().find(|a| matches(&**a)) {
                if attr.alias.is_none() {
                    attr.alias = Some(attr.name.clone());
                    renamed = attr.alias.clone();
                }
                attr.group_by = true;
            }
            if let Some(alias) = renamed {
                for column in st.columns.iter_mut() {
                    if column.eq_ignore_ascii_case(&qualified) {
                        *column = alias.clone();
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_order_by(&self, order_by: Option<&OrderBy>, st: &mut Lowering) -> Result<()> {
        let Some(order_by) = order_by else {
            return Ok(());
        };
        for term in &order_by.exprs {
            if term.nulls_first.is_some() || term.with_fill.is_some() {
                return Err(FxqError::unsupported("Unhandled ORDER BY option", term));
            }
            let parts = match &term.expr {
                SqlExpr::Value(Value::Number(n, _)) => {
                    let position = n.parse::<usize>().ok().filter(|p| *p >= 1 && *p <= st.columns.len());
                    let Some(position) = position else {
                        return Err(FxqError::unsupported(
                            "ORDER BY column index out of range",
                            term,
                        ));
                    };
                    st.columns[position - 1]
                        .split('.')
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                }
                other => column_parts(other)
                    .ok_or_else(|| FxqError::unsupported("Unhandled ORDER BY clause", other))?,
            };

            let index = st.tables.column_table(&parts, term)?;
            if st.tables.later_entity_has_order(index) {
                return Err(FxqError::unsupported(
                    "Order already applied to later link-entity",
                    term,
                ));
            }
            let name = last_part(&parts);
            let descending = term.asc == Some(false);
            let table = st.tables.get_mut(index);

            let order = if st.aggregate {
                let items = table.items_mut();
                let position = items
                    .attributes()
                    .position(|a| a.alias.as_deref().is_some_and(|al| al.eq_ignore_ascii_case(&name)))
                    .or_else(|| {
                        items
                            .attributes()
                            .position(|a| a.alias.is_none() && a.name.eq_ignore_ascii_case(&name))
                    });
                let Some(attr) = position.and_then(|p| items.attributes_mut().nth(p)) else {
                    return Err(FxqError::unsupported(
                        "Column is invalid in the ORDER BY clause because it is not contained in either an aggregate function or the GROUP BY clause",
                        term,
                    ));
                };
                if attr.alias.is_none() {
                    attr.alias = Some(attr.name.clone());
                }
                FetchOrder {
                    attribute: None,
                    alias: attr.alias.clone(),
                    descending,
                }
            } else {
                let attribute = if table.metadata().attribute(&name).is_some() {
                    name
                } else {
                    table
                        .items()
                        .attributes()
                        .find(|a| a.alias.as_deref().is_some_and(|al| al.eq_ignore_ascii_case(&name)))
                        .map(|a| a.name.clone())
                        .unwrap_or(name)
                };
                let aliased_differently = table.items().attributes().any(|a| {
                    a.name.eq_ignore_ascii_case(&attribute)
                        && a.alias.as_deref().is_some_and(|al| !al.eq_ignore_ascii_case(&a.name))
                });
                let has_plain = table
                    .items()
                    .attributes()
                    .any(|a| a.name.eq_ignore_ascii_case(&attribute) && a.alias.is_none());
                if aliased_differently && !has_plain {
                    table.add_item(FetchItem::Attribute(FetchAttribute::new(attribute.clone())));
                }
                FetchOrder {
                    attribute: Some(attribute),
                    alias: None,
                    descending,
                }
            };
            table.add_item(FetchItem::Order(order));
        }
        Ok(())
    }
}

fn select_body(query: &SqlQuery) -> Result<&Select> {
    match query.body.as_ref() {
        SetExpr::Select(select) => Ok(select),
        other => Err(FxqError::unsupported("Unhandled SELECT query expression", other)),
    }
}

fn select_star(index: usize, fragment: &SelectItem, st: &mut Lowering) -> Result<()> {
    let table = st.tables.get_mut(index);
    if table.items().attributes().any(|a| a.alias.is_some()) {
        return Err(FxqError::unsupported(
            "Cannot add aliased column and wildcard from the same table",
            fragment,
        ));
    }
    table.remove_items(|i| matches!(i, FetchItem::Attribute(_)));
    if !table.items().has_all_attributes() {
        table.add_item(FetchItem::AllAttributes);
    }
    let names = table
        .metadata()
        .readable_attributes()
        .into_iter()
        .map(|a| table.output_name(&a.logical_name))
        .collect::<Vec<_>>();
    st.columns.extend(names);
    Ok(())
}

/// `{attribute}_{suffix}`, then `_2`, `_3`, ... until unused by `columns`.
fn unique_alias(attribute: &str, suffix: &str, columns: &[String]) -> String {
    let base = format!("{attribute}_{suffix}");
    let taken = |c: &str| columns.iter().any(|x| x.eq_ignore_ascii_case(c));
    if !taken(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}_{n}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Argument list of a plain (non-windowed, non-filtered) function call.
pub(crate) fn plain_function_args(func: &Function) -> Result<&sqlparser::ast::FunctionArgumentList> {
    if func.over.is_some() || func.filter.is_some() || !func.within_group.is_empty() {
        return Err(FxqError::unsupported("Unhandled function clause", func));
    }
    match &func.args {
        FunctionArguments::List(list) => Ok(list),
        _ => Err(FxqError::unsupported("Unhandled function", func)),
    }
}

fn date_part(
    func: &Function,
    args: &sqlparser::ast::FunctionArgumentList,
) -> Result<(DateGrouping, Vec<String>)> {
    let [FunctionArg::Unnamed(FunctionArgExpr::Expr(part)), FunctionArg::Unnamed(FunctionArgExpr::Expr(column))] =
        args.args.as_slice()
    else {
        return Err(FxqError::unsupported("Unhandled function", func));
    };
    let grouping = match part {
        SqlExpr::Identifier(id) => DateGrouping::from_date_part(&id.value),
        SqlExpr::Value(Value::SingleQuotedString(s)) => DateGrouping::from_date_part(s),
        _ => None,
    }
    .ok_or_else(|| FxqError::unsupported("Unsupported DATEPART", part))?;
    let parts = column_parts(column)
        .ok_or_else(|| FxqError::unsupported("Unhandled function parameter", func))?;
    Ok((grouping, parts))
}

/// Identifier parts of a column reference.
pub(crate) fn column_parts(expr: &SqlExpr) -> Option<Vec<String>> {
    match expr {
        SqlExpr::Identifier(id) => Some(vec![id.value.clone()]),
        SqlExpr::CompoundIdentifier(parts) => Some(idents(parts)),
        _ => None,
    }
}

fn idents(parts: &[Ident]) -> Vec<String> {
    parts.iter().map(|p| p.value.clone()).collect()
}

pub(crate) fn last_part(parts: &[String]) -> String {
    parts.last().cloned().unwrap_or_default()
}

/// Last identifier of a possibly schema-qualified name (`dbo.account` → `account`).
pub(crate) fn object_name_last(name: &ObjectName) -> String {
    name.0.last().map(|i| i.value.clone()).unwrap_or_default()
}

pub(crate) fn integer_literal(expr: &SqlExpr) -> Option<u32> {
    match expr {
        SqlExpr::Value(Value::Number(n, _)) => n.parse().ok(),
        SqlExpr::Nested(inner) => integer_literal(inner),
        _ => None,
    }
}

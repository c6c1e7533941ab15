//! Request -> SQL compilation.
//!
//! ```text
//! QueryRequest ──resolve──▶ members, filters, ranges
//!              ──plan────▶ JoinTree (root = owner of the first measure)
//!              ──emit────▶ Query AST + SQL + column metadata
//! ```
//!
//! Compilation is pure: it reads the catalog and the options, nothing else.

use chrono::{NaiveDateTime, Utc};

use super::compiled::{
    member_alias, time_alias, ColumnInfo, ColumnKind, CompiledOrder, CompiledQuery,
    CompiledTimeDimension,
};
use super::date_range;
use super::error::{CompileError, CompileResult};
use super::filters::{self, FilterNode};
use super::request::{OrderDirection, QueryRequest};
use crate::graph::JoinTree;
use crate::model::{
    AggregationType, CubeId, DimensionType, Granularity, InstanceId, MemberKind, ResolvedMember,
    SqlSource, SqlTemplate,
};
use crate::schema::Catalog;
use crate::sql::{
    and_all, avg, case_when, col, count, count_distinct, count_star, date_trunc, lit_int, lit_null,
    max, min, raw_sql, sum, Dialect, Expr, ExprExt, OrderByExpr, Query, SelectExpr, SqlDialect,
    TableRef,
};

pub const DEFAULT_LIMIT: u64 = 10_000;
pub const MAX_LIMIT: u64 = 50_000;

/// Options for compilation.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub dialect: Dialect,
    /// Reference instant for relative date ranges.
    pub now: NaiveDateTime,
    pub default_limit: u64,
    pub max_limit: u64,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            now: Utc::now().naive_utc(),
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
        }
    }
}

impl CompileOptions {
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_now(mut self, now: NaiveDateTime) -> Self {
        self.now = now;
        self
    }

    pub fn with_limits(mut self, default_limit: u64, max_limit: u64) -> Self {
        self.default_limit = default_limit;
        self.max_limit = max_limit;
        self
    }
}

/// Compile a request, finding the join tree through the catalog's graph.
pub fn compile(
    catalog: &Catalog,
    request: &QueryRequest,
    options: &CompileOptions,
) -> CompileResult<CompiledQuery> {
    let resolved = Resolved::new(catalog, request, options)?;
    let required = resolved.required_instances(catalog);
    let tree = if required.iter().all(|&i| i == resolved.root) {
        JoinTree::single(resolved.root)
    } else {
        catalog.graph().find_join_tree(resolved.root, &required)?
    };
    emit(catalog, resolved, tree, options)
}

/// Compile a request over a caller-supplied join tree. Every instance the
/// request touches must be in the tree.
pub fn compile_with_tree(
    catalog: &Catalog,
    join_tree: JoinTree,
    request: &QueryRequest,
    options: &CompileOptions,
) -> CompileResult<CompiledQuery> {
    let resolved = Resolved::new(catalog, request, options)?;
    for instance in resolved.required_instances(catalog) {
        if !join_tree.contains(instance) {
            return Err(CompileError::NoPath {
                from: catalog.instance_by_id(join_tree.root).name.clone(),
                to: catalog.instance_by_id(instance).name.clone(),
            });
        }
    }
    emit(catalog, resolved, join_tree, options)
}

/// The request with every path bound to the catalog.
struct Resolved {
    measures: Vec<ResolvedMember>,
    dimensions: Vec<ResolvedMember>,
    time_dimensions: Vec<CompiledTimeDimension>,
    filters: Vec<FilterNode>,
    order: Vec<(String, OrderDirection)>,
    limit: u64,
    offset: Option<u64>,
    root: InstanceId,
}

impl Resolved {
    fn new(catalog: &Catalog, request: &QueryRequest, options: &CompileOptions) -> CompileResult<Self> {
        let mut measures: Vec<ResolvedMember> = Vec::new();
        for path in &request.measures {
            let member = filters::resolve_member(catalog, path)?;
            if member.kind != MemberKind::Measure {
                return Err(CompileError::unknown_field(path, "is a dimension, not a measure"));
            }
            if !measures.contains(&member) {
                measures.push(member);
            }
        }

        let mut dimensions: Vec<ResolvedMember> = Vec::new();
        for path in &request.dimensions {
            let member = filters::resolve_member(catalog, path)?;
            if member.kind != MemberKind::Dimension {
                return Err(CompileError::unknown_field(path, "is a measure, not a dimension"));
            }
            if !dimensions.contains(&member) {
                dimensions.push(member);
            }
        }

        let mut time_dimensions: Vec<CompiledTimeDimension> = Vec::new();
        for td in &request.time_dimensions {
            let member = filters::resolve_member(catalog, &td.dimension)?;
            let is_time = catalog
                .dimension(&member)
                .is_some_and(|d| d.dimension_type == DimensionType::Time);
            if !is_time {
                return Err(CompileError::unknown_field(
                    &td.dimension,
                    "is not a time dimension",
                ));
            }
            let granularity = td
                .granularity
                .as_deref()
                .map(|g| {
                    Granularity::from_str(g).ok_or_else(|| CompileError::InvalidGranularity(g.into()))
                })
                .transpose()?;
            let date_range = td
                .date_range
                .as_ref()
                .map(|r| date_range::resolve(r, options.now))
                .transpose()?;
            let alias = granularity.map(|g| {
                time_alias(&member.path.instance, &member.path.member, g)
            });
            let compiled = CompiledTimeDimension {
                member,
                granularity,
                date_range,
                alias,
            };
            if !time_dimensions.contains(&compiled) {
                time_dimensions.push(compiled);
            }
        }

        let filters = request
            .filters
            .iter()
            .map(|f| filters::resolve(catalog, f))
            .collect::<CompileResult<Vec<_>>>()?;

        let root = measures
            .first()
            .or(dimensions.first())
            .or(time_dimensions.first().map(|td| &td.member))
            .map(|m| m.instance)
            .ok_or(CompileError::EmptyQuery)?;

        let limit = request
            .limit
            .unwrap_or(options.default_limit)
            .min(options.max_limit);

        Ok(Self {
            measures,
            dimensions,
            time_dimensions,
            filters,
            order: request.order.0.clone(),
            limit,
            offset: request.offset,
            root,
        })
    }

    /// Owners of every member plus the cubes their SQL references.
    fn required_instances(&self, catalog: &Catalog) -> Vec<InstanceId> {
        let mut members: Vec<&ResolvedMember> = Vec::new();
        members.extend(&self.measures);
        members.extend(&self.dimensions);
        members.extend(self.time_dimensions.iter().map(|td| &td.member));
        members.extend(self.filters.iter().flat_map(FilterNode::members));

        let mut required: Vec<InstanceId> = Vec::new();
        let mut add = |id: InstanceId| {
            if !required.contains(&id) {
                required.push(id);
            }
        };
        for member in members {
            add(member.instance);
            for cube in member_templates(catalog, member)
                .into_iter()
                .flat_map(|t| t.referenced_cubes())
            {
                add(catalog.base_instance(cube));
            }
        }
        required
    }
}

fn member_templates<'c>(catalog: &'c Catalog, member: &ResolvedMember) -> Vec<&'c SqlTemplate> {
    match member.kind {
        MemberKind::Dimension => catalog.dimension(member).map(|d| vec![&d.sql]).unwrap_or_default(),
        MemberKind::Measure => catalog
            .measure(member)
            .map(|m| m.sql.iter().chain(m.filters.iter()).collect())
            .unwrap_or_default(),
    }
}

/// Renders member and join SQL for one join tree.
pub(crate) struct SqlContext<'a> {
    pub catalog: &'a Catalog,
    pub dialect: Dialect,
    pub tree: &'a JoinTree,
}

impl<'a> SqlContext<'a> {
    pub fn new(catalog: &'a Catalog, dialect: Dialect, tree: &'a JoinTree) -> Self {
        Self {
            catalog,
            dialect,
            tree,
        }
    }

    fn quote(&self, instance: InstanceId) -> String {
        self.dialect
            .quote_identifier(&self.catalog.instance_by_id(instance).name)
    }

    fn render(&self, template: &SqlTemplate, instance: InstanceId) -> Expr {
        let sql = template.render(&self.quote(instance), |cube: CubeId| {
            self.quote(self.catalog.base_instance(cube))
        });
        raw_sql(&sql)
    }

    /// The dimension's column expression.
    pub fn dimension(&self, member: &ResolvedMember) -> Expr {
        self.catalog
            .dimension(member)
            .map(|d| self.render(&d.sql, member.instance))
            .unwrap_or_else(lit_null)
    }

    pub fn time_dimension(&self, member: &ResolvedMember, granularity: Granularity) -> Expr {
        date_trunc(granularity.as_str(), self.dimension(member))
    }

    /// A measure's value expression (before aggregation) and its filter
    /// condition, if it has `filters`.
    pub fn measure_parts(&self, member: &ResolvedMember) -> (Option<Expr>, Option<Expr>) {
        let Some(measure) = self.catalog.measure(member) else {
            return (None, None);
        };
        let value = measure.sql.as_ref().map(|t| self.render(t, member.instance));
        let condition = and_all(
            measure
                .filters
                .iter()
                .map(|f| self.render(f, member.instance))
                .collect(),
        );
        (value, condition)
    }

    /// The aggregated measure. Fan-out warnings are pushed to `warnings`.
    pub fn measure(&self, member: &ResolvedMember, warnings: &mut Vec<String>) -> Expr {
        let Some(measure) = self.catalog.measure(member) else {
            return lit_null();
        };
        let (value, condition) = self.measure_parts(member);
        let conditional = |e: Expr| match &condition {
            Some(c) => case_when(c.clone(), e),
            None => e,
        };
        let multiplied = self.tree.multiplies(member.instance);
        let path = member.path.to_string();

        match measure.aggregation {
            AggregationType::Count => {
                if multiplied {
                    let cube = self.catalog.cube_by_id(member.cube);
                    if let Some(pk) = cube.primary_key() {
                        return count_distinct(conditional(self.render(&pk.sql, member.instance)));
                    }
                    warnings.push(format!(
                        "{path}: count over a fanned-out join and '{}' has no primary key; rows may be counted more than once",
                        cube.name
                    ));
                }
                match (value, &condition) {
                    (Some(v), _) => count(conditional(v)),
                    (None, Some(_)) => count(conditional(lit_int(1))),
                    (None, None) => count_star(),
                }
            }
            AggregationType::CountDistinct => {
                count_distinct(conditional(value.unwrap_or_else(lit_null)))
            }
            agg => {
                if multiplied && matches!(agg, AggregationType::Sum | AggregationType::Avg) {
                    warnings.push(format!(
                        "{path}: {} over a fanned-out join may be inflated",
                        agg.as_str()
                    ));
                }
                let v = conditional(value.unwrap_or_else(lit_null));
                match agg {
                    AggregationType::Sum => sum(v),
                    AggregationType::Avg => avg(v),
                    AggregationType::Min => min(v),
                    _ => max(v),
                }
            }
        }
    }

    fn table(&self, instance: InstanceId) -> TableRef {
        let inst = self.catalog.instance_by_id(instance);
        let table = match &self.catalog.cube_by_id(inst.cube).sql_source {
            SqlSource::Sql(sql) => TableRef::subquery(sql),
            SqlSource::Table(name) => TableRef::parse_dotted(name),
        };
        table.with_alias(&inst.name)
    }

    /// FROM the root, LEFT JOIN every tree edge in order.
    pub fn from_clause(&self, mut query: Query) -> Query {
        query = query.from(self.table(self.tree.root));
        for edge in &self.tree.edges {
            let (cube_id, index) = edge.join;
            let cube = self.catalog.cube_by_id(cube_id);
            let Some(join) = cube.joins.get(index) else {
                continue;
            };
            let joined = if edge.reverse { edge.from } else { edge.to };
            let source = self.quote(self.catalog.base_instance(join.source));
            let on = join.on.render(&source, |c: CubeId| {
                if c == join.target {
                    self.quote(joined)
                } else {
                    self.quote(self.catalog.base_instance(c))
                }
            });
            query = query.left_join(self.table(edge.to), raw_sql(&on));
        }
        query
    }
}

fn emit(
    catalog: &Catalog,
    resolved: Resolved,
    tree: JoinTree,
    options: &CompileOptions,
) -> CompileResult<CompiledQuery> {
    let ctx = SqlContext::new(catalog, options.dialect, &tree);
    let mut select: Vec<SelectExpr> = Vec::new();
    let mut columns: Vec<ColumnInfo> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    for member in &resolved.dimensions {
        let alias = member_alias(&member.path.instance, &member.path.member);
        select.push(ctx.dimension(member).alias(&alias));
        columns.push(ColumnInfo {
            member: member.path.to_string(),
            alias,
            kind: ColumnKind::Dimension,
        });
    }
    for td in &resolved.time_dimensions {
        if let (Some(granularity), Some(alias)) = (td.granularity, &td.alias) {
            select.push(ctx.time_dimension(&td.member, granularity).alias(alias));
            columns.push(ColumnInfo {
                member: td.member.path.to_string(),
                alias: alias.clone(),
                kind: ColumnKind::TimeDimension { granularity },
            });
        }
    }
    let grouped = select.len();
    for member in &resolved.measures {
        let alias = member_alias(&member.path.instance, &member.path.member);
        select.push(ctx.measure(member, &mut warnings).alias(&alias));
        let aggregation = catalog
            .measure(member)
            .map(|m| m.aggregation)
            .unwrap_or(AggregationType::Count);
        columns.push(ColumnInfo {
            member: member.path.to_string(),
            alias,
            kind: ColumnKind::Measure { aggregation },
        });
    }

    let mut query = ctx.from_clause(Query::new().select(select));

    let dimension_sql = |m: &ResolvedMember| ctx.dimension(m);
    let mut conditions: Vec<Expr> = resolved
        .filters
        .iter()
        .filter(|f| f.kind() == MemberKind::Dimension)
        .filter_map(|f| f.to_expr(&dimension_sql))
        .collect();
    conditions.extend(
        resolved
            .time_dimensions
            .iter()
            .filter_map(CompiledTimeDimension::range_filter)
            .filter_map(|f| f.to_expr(&dimension_sql)),
    );
    if let Some(where_clause) = and_all(conditions) {
        query = query.filter(where_clause);
    }

    // Dimension-only queries group too, returning distinct combinations.
    if grouped > 0 {
        query = query.group_by((1..=grouped as i64).map(lit_int).collect());
    }

    let measure_sql = |m: &ResolvedMember| ctx.measure(m, &mut Vec::new());
    let having: Vec<Expr> = resolved
        .filters
        .iter()
        .filter(|f| f.kind() == MemberKind::Measure)
        .filter_map(|f| f.to_expr(&measure_sql))
        .collect();
    if let Some(having) = and_all(having) {
        query = query.having(having);
    }

    let order = resolve_order(&resolved, &columns)?;
    query = query.order_by(
        order
            .iter()
            .map(|o| {
                let e = col(&o.alias);
                if o.descending {
                    OrderByExpr::desc(e)
                } else {
                    OrderByExpr::asc(e)
                }
            })
            .collect(),
    );
    query = query.limit(resolved.limit);
    if let Some(offset) = resolved.offset {
        query = query.offset(offset);
    }

    let sql = query.to_sql(options.dialect);
    tracing::debug!(
        root = %catalog.instance_by_id(tree.root).name,
        joins = tree.edges.len(),
        columns = columns.len(),
        "compiled query"
    );
    for warning in &warnings {
        tracing::warn!(warning = %warning, "fan-out");
    }

    Ok(CompiledQuery {
        measures: resolved.measures,
        dimensions: resolved.dimensions,
        time_dimensions: resolved.time_dimensions,
        filters: resolved.filters,
        order,
        limit: resolved.limit,
        offset: resolved.offset,
        join_tree: tree,
        dialect: options.dialect,
        query,
        sql,
        columns,
        fanout_warnings: warnings,
    })
}

/// Explicit order, else first time dimension asc, first measure desc, or
/// first dimension asc.
fn resolve_order(resolved: &Resolved, columns: &[ColumnInfo]) -> CompileResult<Vec<CompiledOrder>> {
    if resolved.order.is_empty() {
        let default = columns
            .iter()
            .find(|c| matches!(c.kind, ColumnKind::TimeDimension { .. }))
            .map(|c| (c, false))
            .or_else(|| {
                columns
                    .iter()
                    .find(|c| matches!(c.kind, ColumnKind::Measure { .. }))
                    .map(|c| (c, true))
            })
            .or_else(|| columns.first().map(|c| (c, false)));
        return Ok(default
            .map(|(c, descending)| CompiledOrder {
                member: c.member.clone(),
                alias: c.alias.clone(),
                descending,
            })
            .into_iter()
            .collect());
    }

    let mut order: Vec<CompiledOrder> = Vec::new();
    for (member, direction) in &resolved.order {
        let column = columns
            .iter()
            .find(|c| &c.member == member)
            .ok_or_else(|| CompileError::unknown_field(member, "ordered by but not selected"))?;
        if order.iter().any(|o| o.alias == column.alias) {
            continue;
        }
        order.push(CompiledOrder {
            member: member.clone(),
            alias: column.alias.clone(),
            descending: *direction == OrderDirection::Desc,
        });
    }
    Ok(order)
}

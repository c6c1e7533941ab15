//! Materialization and in-memory roll-up of pre-aggregations.
//!
//! A pre-aggregation is stored at its own grain with *components* per
//! measure, the partial aggregates that still merge correctly:
//!
//! | measure         | stored columns                    | merged as               |
//! |-----------------|-----------------------------------|-------------------------|
//! | `count`         | `<m>__count`                      | sum                     |
//! | `sum`           | `<m>__sum`                        | sum                     |
//! | `min` / `max`   | `<m>__min` / `<m>__max`           | min / max               |
//! | `avg`           | `<m>__sum`, `<m>__count`          | sum(sum) / sum(count)   |
//! | `countDistinct` | `<m>__count_distinct`             | not mergeable           |
//!
//! `avg` counts with `COUNT(x)`, so NULL values are excluded exactly as
//! `AVG(x)` excludes them.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Number, Value};

use crate::driver::QueryResult;
use crate::graph::JoinTree;
use crate::model::{
    AggregationType, Cube, Granularity, InstanceId, MemberKind, MemberPath, PreAggregation,
    ResolvedMember,
};
use crate::query::compiler::SqlContext;
use crate::query::date_range::{format_timestamp, parse_timestamp};
use crate::query::{
    member_alias, time_alias, CompileError, CompileResult, CompiledQuery, FilterNode,
};
use crate::schema::{pre_aggregation_key, Catalog};
use crate::sql::{case_when, count, lit_int, lit_null, sum, Dialect, ExprExt, Query};

/// A partial aggregate stored for a measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Count,
    Sum,
    Min,
    Max,
    CountDistinct,
}

impl Component {
    fn suffix(&self) -> &'static str {
        match self {
            Component::Count => "count",
            Component::Sum => "sum",
            Component::Min => "min",
            Component::Max => "max",
            Component::CountDistinct => "count_distinct",
        }
    }

    /// Column holding this component of `measure_alias`.
    pub fn column(&self, measure_alias: &str) -> String {
        format!("{measure_alias}__{}", self.suffix())
    }
}

/// Components stored for an aggregation.
pub fn components(aggregation: AggregationType) -> &'static [Component] {
    match aggregation {
        AggregationType::Count => &[Component::Count],
        AggregationType::Sum => &[Component::Sum],
        AggregationType::Min => &[Component::Min],
        AggregationType::Max => &[Component::Max],
        AggregationType::Avg => &[Component::Sum, Component::Count],
        AggregationType::CountDistinct => &[Component::CountDistinct],
    }
}

/// The query that materializes a pre-aggregation, and its column layout.
#[derive(Debug, Clone)]
pub struct Materialization {
    pub key: String,
    /// `(dimension index, column)`
    pub dimensions: Vec<(usize, String)>,
    /// `(dimension index, grain, column)`
    pub time_dimension: Option<(usize, Granularity, String)>,
    /// `(measure index, measure alias)`
    pub measures: Vec<(usize, String)>,
    pub query: Query,
    pub sql: String,
}

fn own_member(cube: &Cube, base: InstanceId, kind: MemberKind, index: usize) -> ResolvedMember {
    let member = match kind {
        MemberKind::Dimension => cube.dimensions.get(index).map(|d| d.name.clone()),
        MemberKind::Measure => cube.measures.get(index).map(|m| m.name.clone()),
    };
    ResolvedMember {
        path: MemberPath {
            instance: cube.name.clone(),
            member: member.unwrap_or_default(),
        },
        instance: base,
        cube: cube.id,
        kind,
        index,
    }
}

/// Build the materialization query of `spec`: its dimensions, the time
/// dimension truncated to its grain, and every measure component,
/// grouped by everything but the components.
pub fn materialization(
    catalog: &Catalog,
    cube: &Cube,
    spec: &PreAggregation,
    dialect: Dialect,
) -> CompileResult<Materialization> {
    let base = catalog.base_instance(cube.id);
    let dimensions: Vec<ResolvedMember> = spec
        .dimensions
        .iter()
        .map(|&i| own_member(cube, base, MemberKind::Dimension, i))
        .collect();
    let time = spec
        .time_dimension
        .zip(spec.granularity)
        .map(|(i, g)| (own_member(cube, base, MemberKind::Dimension, i), g));
    let measures: Vec<ResolvedMember> = spec
        .measures
        .iter()
        .map(|&i| own_member(cube, base, MemberKind::Measure, i))
        .collect();

    // Member SQL may reference other cubes; join them in like a query would.
    let mut required: Vec<InstanceId> = Vec::new();
    let templates = dimensions
        .iter()
        .chain(time.iter().map(|(m, _)| m))
        .filter_map(|m| catalog.dimension(m).map(|d| &d.sql))
        .chain(measures.iter().filter_map(|m| catalog.measure(m)).flat_map(|m| {
            m.sql.iter().chain(m.filters.iter())
        }));
    for template in templates {
        for cube in template.referenced_cubes() {
            let instance = catalog.base_instance(cube);
            if instance != base && !required.contains(&instance) {
                required.push(instance);
            }
        }
    }
    let tree = if required.is_empty() {
        JoinTree::single(base)
    } else {
        catalog.graph().find_join_tree(base, &required)?
    };
    let ctx = SqlContext::new(catalog, dialect, &tree);

    let mut select = Vec::new();
    let mut dimension_columns = Vec::new();
    for member in &dimensions {
        let alias = member_alias(&cube.name, &member.path.member);
        select.push(ctx.dimension(member).alias(&alias));
        dimension_columns.push((member.index, alias));
    }
    let mut time_column = None;
    if let Some((member, granularity)) = &time {
        let alias = time_alias(&cube.name, &member.path.member, *granularity);
        select.push(ctx.time_dimension(member, *granularity).alias(&alias));
        time_column = Some((member.index, *granularity, alias));
    }
    let grouped = select.len();

    let mut warnings = Vec::new();
    let mut measure_columns = Vec::new();
    for member in &measures {
        let Some(measure) = catalog.measure(member) else {
            continue;
        };
        let alias = member_alias(&cube.name, &member.path.member);
        if measure.aggregation == AggregationType::Avg {
            let (value, condition) = ctx.measure_parts(member);
            let value = value.unwrap_or_else(lit_null);
            let value = match condition {
                Some(c) => case_when(c, value),
                None => value,
            };
            select.push(sum(value.clone()).alias(&Component::Sum.column(&alias)));
            select.push(count(value).alias(&Component::Count.column(&alias)));
        } else {
            let component = components(measure.aggregation)[0];
            select.push(ctx.measure(member, &mut warnings).alias(&component.column(&alias)));
        }
        measure_columns.push((member.index, alias));
    }
    for warning in &warnings {
        tracing::warn!(preagg = %pre_aggregation_key(cube, spec), warning = %warning, "fan-out");
    }

    let mut query = ctx.from_clause(Query::new().select(select));
    if grouped > 0 {
        query = query.group_by((1..=grouped as i64).map(lit_int).collect());
    }
    let sql = query.to_sql(dialect);

    Ok(Materialization {
        key: pre_aggregation_key(cube, spec),
        dimensions: dimension_columns,
        time_dimension: time_column,
        measures: measure_columns,
        query,
        sql,
    })
}

/// Where a grouped output column comes from.
#[derive(Debug, Clone, PartialEq)]
struct GroupColumn {
    output: String,
    source: String,
    /// Re-truncate stored timestamps to a coarser grain.
    truncate: Option<Granularity>,
}

#[derive(Debug, Clone, PartialEq)]
struct MeasureColumn {
    output: String,
    member: ResolvedMember,
    aggregation: AggregationType,
    /// Component name -> stored column.
    sources: Vec<(Component, String)>,
    /// Only needed by a measure filter.
    hidden: bool,
}

/// Re-aggregation of a materialized rowset into a query's result.
///
/// Output columns carry the same aliases the SQL path would produce.
#[derive(Debug, Clone)]
pub struct RollupPlan {
    pub key: String,
    groups: Vec<GroupColumn>,
    measures: Vec<MeasureColumn>,
    row_filters: Vec<FilterNode>,
    /// Filtered dimension -> stored column.
    filter_sources: HashMap<ResolvedMember, String>,
    having: Vec<FilterNode>,
    order: Vec<(String, bool)>,
    offset: usize,
    limit: usize,
}

impl RollupPlan {
    /// Plan `compiled` over `spec`. The caller has already checked that the
    /// spec can serve the query.
    pub fn new(
        catalog: &Catalog,
        cube: &Cube,
        spec: &PreAggregation,
        compiled: &CompiledQuery,
    ) -> CompileResult<Self> {
        let key = pre_aggregation_key(cube, spec);
        let dimension_column = |m: &ResolvedMember| member_alias(&cube.name, &m.path.member);
        let stored_time = |m: &ResolvedMember| -> Option<(String, Granularity)> {
            let granularity = spec.granularity?;
            (spec.time_dimension == Some(m.index))
                .then(|| (time_alias(&cube.name, &m.path.member, granularity), granularity))
        };

        let mut groups = Vec::new();
        for member in &compiled.dimensions {
            let alias = member_alias(&member.path.instance, &member.path.member);
            groups.push(GroupColumn {
                output: alias,
                source: dimension_column(member),
                truncate: None,
            });
        }
        for td in &compiled.time_dimensions {
            let (Some(granularity), Some(alias)) = (td.granularity, &td.alias) else {
                continue;
            };
            let (source, stored) = stored_time(&td.member).ok_or_else(|| {
                CompileError::unknown_field(
                    &td.member.path.to_string(),
                    format!("not stored by pre-aggregation '{key}'"),
                )
            })?;
            groups.push(GroupColumn {
                output: alias.clone(),
                source,
                truncate: (granularity != stored).then_some(granularity),
            });
        }

        let mut measures = Vec::new();
        let mut add_measure = |member: &ResolvedMember, hidden: bool| {
            if measures.iter().any(|m: &MeasureColumn| &m.member == member) {
                return;
            }
            let Some(measure) = catalog.measure(member) else {
                return;
            };
            let stored = member_alias(&cube.name, &member.path.member);
            measures.push(MeasureColumn {
                output: member_alias(&member.path.instance, &member.path.member),
                member: member.clone(),
                aggregation: measure.aggregation,
                sources: components(measure.aggregation)
                    .iter()
                    .map(|c| (*c, c.column(&stored)))
                    .collect(),
                hidden,
            });
        };
        for member in &compiled.measures {
            add_measure(member, false);
        }
        for member in compiled.measure_filters().flat_map(FilterNode::members) {
            add_measure(member, true);
        }

        let mut row_filters: Vec<FilterNode> = compiled.dimension_filters().cloned().collect();
        row_filters.extend(
            compiled
                .time_dimensions
                .iter()
                .filter_map(|td| td.range_filter()),
        );
        let mut filter_sources = HashMap::new();
        for member in row_filters.iter().flat_map(FilterNode::members) {
            let source = if spec.dimensions.contains(&member.index) {
                dimension_column(member)
            } else if let Some((column, _)) = stored_time(member) {
                column
            } else {
                return Err(CompileError::unknown_field(
                    &member.path.to_string(),
                    format!("not stored by pre-aggregation '{key}'"),
                ));
            };
            filter_sources.insert(member.clone(), source);
        }

        Ok(Self {
            key,
            groups,
            measures,
            row_filters,
            filter_sources,
            having: compiled.measure_filters().cloned().collect(),
            order: compiled
                .order
                .iter()
                .map(|o| (o.alias.clone(), o.descending))
                .collect(),
            offset: compiled.offset.unwrap_or(0) as usize,
            limit: compiled.limit as usize,
        })
    }

    /// Output column aliases, in order.
    pub fn columns(&self) -> Vec<String> {
        self.groups
            .iter()
            .map(|g| g.output.clone())
            .chain(
                self.measures
                    .iter()
                    .filter(|m| !m.hidden)
                    .map(|m| m.output.clone()),
            )
            .collect()
    }

    pub fn execute(&self, rowset: &QueryResult) -> QueryResult {
        let index: HashMap<&str, usize> = rowset
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();
        let cell = |row: &[Value], column: &str| -> Value {
            index
                .get(column)
                .and_then(|&i| row.get(i))
                .cloned()
                .unwrap_or(Value::Null)
        };

        let mut keys: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<(Vec<Value>, Vec<Accumulator>)> = Vec::new();
        if self.groups.is_empty() {
            groups.push((Vec::new(), self.accumulators()));
            keys.insert(String::new(), 0);
        }

        for row in &rowset.rows {
            let value_of = |m: &ResolvedMember| self.filter_sources.get(m).map(|c| cell(row, c));
            if !self.row_filters.iter().all(|f| f.evaluate(&value_of)) {
                continue;
            }

            let group_values: Vec<Value> = self
                .groups
                .iter()
                .map(|g| {
                    let value = cell(row, &g.source);
                    match g.truncate {
                        Some(granularity) => truncate_value(&value, granularity),
                        None => value,
                    }
                })
                .collect();
            let group_key = if self.groups.is_empty() {
                String::new()
            } else {
                serde_json::to_string(&group_values).unwrap_or_default()
            };
            let slot = match keys.get(&group_key) {
                Some(&slot) => slot,
                None => {
                    groups.push((group_values, self.accumulators()));
                    keys.insert(group_key, groups.len() - 1);
                    groups.len() - 1
                }
            };

            let accumulators = &mut groups[slot].1;
            for (measure, acc) in self.measures.iter().zip(accumulators.iter_mut()) {
                for (component, column) in &measure.sources {
                    acc.add(*component, &cell(row, column));
                }
            }
        }

        let mut rows: Vec<Vec<Value>> = Vec::with_capacity(groups.len());
        for (group_values, accumulators) in groups {
            let results: Vec<Value> = accumulators.iter().map(Accumulator::finish).collect();
            let value_of = |m: &ResolvedMember| {
                self.measures
                    .iter()
                    .position(|c| &c.member == m)
                    .and_then(|i| results.get(i).cloned())
            };
            if !self.having.iter().all(|f| f.evaluate(&value_of)) {
                continue;
            }
            let mut row = group_values;
            row.extend(
                self.measures
                    .iter()
                    .zip(results.iter())
                    .filter(|(m, _)| !m.hidden)
                    .map(|(_, v)| v.clone()),
            );
            rows.push(row);
        }

        let columns = self.columns();
        let order: Vec<(usize, bool)> = self
            .order
            .iter()
            .filter_map(|(alias, desc)| columns.iter().position(|c| c == alias).map(|i| (i, *desc)))
            .collect();
        rows.sort_by(|a, b| {
            for &(i, descending) in &order {
                let ordering = compare_sorted(&a[i], &b[i], descending);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        let rows = rows.into_iter().skip(self.offset).take(self.limit).collect();

        QueryResult { columns, rows }
    }

    fn accumulators(&self) -> Vec<Accumulator> {
        self.measures
            .iter()
            .map(|m| Accumulator::new(m.aggregation))
            .collect()
    }
}

/// Running merge of one measure's components within a group.
#[derive(Debug, Clone, Default)]
struct Accumulator {
    aggregation: Option<AggregationType>,
    sum: Option<f64>,
    sum_integral: bool,
    count: i64,
    extreme: Option<Value>,
}

impl Accumulator {
    fn new(aggregation: AggregationType) -> Self {
        Self {
            aggregation: Some(aggregation),
            sum_integral: true,
            ..Self::default()
        }
    }

    fn add(&mut self, component: Component, value: &Value) {
        match component {
            Component::Count => {
                self.count += numeric(value).map(|n| n as i64).unwrap_or(0);
            }
            Component::Sum => {
                if let Some(n) = numeric(value) {
                    self.sum = Some(self.sum.unwrap_or(0.0) + n);
                    self.sum_integral &= value.is_i64() || value.is_u64();
                }
            }
            Component::Min | Component::Max | Component::CountDistinct => {
                if value.is_null() {
                    return;
                }
                let replace = match &self.extreme {
                    None => true,
                    Some(current) => match component {
                        Component::Min => compare_values(value, current) == Ordering::Less,
                        Component::Max => compare_values(value, current) == Ordering::Greater,
                        _ => true,
                    },
                };
                if replace {
                    self.extreme = Some(value.clone());
                }
            }
        }
    }

    fn finish(&self) -> Value {
        match self.aggregation {
            Some(AggregationType::Count) => Value::from(self.count),
            Some(AggregationType::Sum) => self
                .sum
                .map(|s| number(s, self.sum_integral))
                .unwrap_or(Value::Null),
            Some(AggregationType::Avg) => match self.sum {
                Some(s) if self.count > 0 => number(s / self.count as f64, false),
                _ => Value::Null,
            },
            _ => self.extreme.clone().unwrap_or(Value::Null),
        }
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number(n: f64, integral: bool) -> Value {
    if integral && n.fract() == 0.0 && n.abs() < 9.0e15 {
        return Value::from(n as i64);
    }
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

fn truncate_value(value: &Value, granularity: Granularity) -> Value {
    match value.as_str().and_then(parse_timestamp) {
        Some((ts, _)) => Value::String(format_timestamp(granularity.truncate(ts))),
        None => value.clone(),
    }
}

/// Sort order for one ORDER BY column. NULLs stay last in both
/// directions, as the SQL path's warehouse sorts them.
fn compare_sorted(a: &Value, b: &Value, descending: bool) -> Ordering {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => compare_values(a, b),
        _ if descending => compare_values(b, a),
        _ => compare_values(a, b),
    }
}

/// Ascending order with NULLs last.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

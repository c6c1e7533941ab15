//! The result of compiling a request.

use inflector::Inflector;
use serde::Serialize;

use super::date_range::DateBounds;
use super::filters::{Condition, FilterNode, FilterOperator};
use crate::graph::JoinTree;
use crate::model::{AggregationType, Granularity, MemberKind, ResolvedMember};
use crate::sql::{Dialect, Query};

/// Output column alias of a member: `<instance>__<member>` in snake case.
pub fn member_alias(instance: &str, member: &str) -> String {
    format!("{}__{}", instance.to_snake_case(), member.to_snake_case())
}

/// Output column alias of a time dimension at a grain.
pub fn time_alias(instance: &str, member: &str, granularity: Granularity) -> String {
    format!("{}_{}", member_alias(instance, member), granularity.as_str())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ColumnKind {
    Dimension,
    TimeDimension { granularity: Granularity },
    Measure { aggregation: AggregationType },
}

/// One output column: which member it carries and under what alias.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub member: String,
    pub alias: String,
    #[serde(flatten)]
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledTimeDimension {
    pub member: ResolvedMember,
    pub granularity: Option<Granularity>,
    pub date_range: Option<DateBounds>,
    /// Output alias; only time dimensions with a granularity are selected.
    pub alias: Option<String>,
}

impl CompiledTimeDimension {
    /// The date range as an `inDateRange` condition.
    pub fn range_filter(&self) -> Option<FilterNode> {
        self.date_range.map(|bounds| {
            FilterNode::Condition(Condition {
                member: self.member.clone(),
                operator: FilterOperator::InDateRange,
                values: Vec::new(),
                date_range: Some(bounds),
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledOrder {
    pub member: String,
    pub alias: String,
    pub descending: bool,
}

/// A compiled query: the resolved request, its join tree and the SQL.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub measures: Vec<ResolvedMember>,
    pub dimensions: Vec<ResolvedMember>,
    pub time_dimensions: Vec<CompiledTimeDimension>,
    /// Request filters, ANDed at the top level.
    pub filters: Vec<FilterNode>,
    pub order: Vec<CompiledOrder>,
    pub limit: u64,
    pub offset: Option<u64>,
    pub join_tree: JoinTree,
    pub dialect: Dialect,
    pub query: Query,
    pub sql: String,
    pub columns: Vec<ColumnInfo>,
    /// Aggregates that may be inflated by a fanned-out join.
    pub fanout_warnings: Vec<String>,
}

impl CompiledQuery {
    pub fn column(&self, member: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.member == member)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.alias.as_str())
    }

    pub fn dimension_filters(&self) -> impl Iterator<Item = &FilterNode> {
        self.filters
            .iter()
            .filter(|f| f.kind() == MemberKind::Dimension)
    }

    pub fn measure_filters(&self) -> impl Iterator<Item = &FilterNode> {
        self.filters.iter().filter(|f| f.kind() == MemberKind::Measure)
    }

    /// Every member the query filters on, including time dimension ranges.
    pub fn filtered_members(&self) -> Vec<&ResolvedMember> {
        let mut members: Vec<&ResolvedMember> =
            self.filters.iter().flat_map(FilterNode::members).collect();
        members.extend(
            self.time_dimensions
                .iter()
                .filter(|td| td.date_range.is_some())
                .map(|td| &td.member),
        );
        members
    }
}

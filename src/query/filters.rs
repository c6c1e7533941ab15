//! Filter resolution, SQL emission and in-memory evaluation.
//!
//! A request filter is resolved once into a [`FilterNode`]. The SQL path
//! turns it into a WHERE/HAVING predicate; the rollup path evaluates the
//! same node against materialized rows.

use std::cmp::Ordering;

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;

use super::date_range::{self, format_timestamp, DateBounds};
use super::error::{CompileError, CompileResult};
use super::request::Filter;
use crate::model::{DimensionType, MemberKind, ResolvedMember};
use crate::schema::{Catalog, MemberLookupError};
use crate::sql::dialect::helpers::escape_like;
use crate::sql::{and_all, lit_bool, lit_float, lit_int, lit_str, lit_timestamp, or_all, Expr, ExprExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    Set,
    NotSet,
    InDateRange,
    NotInDateRange,
    BeforeDate,
    AfterDate,
}

impl FilterOperator {
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "equals" => Self::Equals,
            "notEquals" => Self::NotEquals,
            "contains" => Self::Contains,
            "notContains" => Self::NotContains,
            "startsWith" => Self::StartsWith,
            "endsWith" => Self::EndsWith,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "set" => Self::Set,
            "notSet" => Self::NotSet,
            "inDateRange" => Self::InDateRange,
            "notInDateRange" => Self::NotInDateRange,
            "beforeDate" => Self::BeforeDate,
            "afterDate" => Self::AfterDate,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "notEquals",
            Self::Contains => "contains",
            Self::NotContains => "notContains",
            Self::StartsWith => "startsWith",
            Self::EndsWith => "endsWith",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Set => "set",
            Self::NotSet => "notSet",
            Self::InDateRange => "inDateRange",
            Self::NotInDateRange => "notInDateRange",
            Self::BeforeDate => "beforeDate",
            Self::AfterDate => "afterDate",
        }
    }

    pub fn is_date_operator(&self) -> bool {
        matches!(
            self,
            Self::InDateRange | Self::NotInDateRange | Self::BeforeDate | Self::AfterDate
        )
    }

    pub fn takes_values(&self) -> bool {
        !matches!(self, Self::Set | Self::NotSet)
    }

    fn is_pattern(&self) -> bool {
        matches!(
            self,
            Self::Contains | Self::NotContains | Self::StartsWith | Self::EndsWith
        )
    }
}

/// A filter value coerced to the member's type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FilterValue {
    String(String),
    Number(f64),
    Bool(bool),
    Timestamp(NaiveDateTime),
}

impl FilterValue {
    fn to_expr(&self) -> Expr {
        match self {
            FilterValue::String(s) => lit_str(s),
            FilterValue::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => lit_int(*n as i64),
            FilterValue::Number(n) => lit_float(*n),
            FilterValue::Bool(b) => lit_bool(*b),
            FilterValue::Timestamp(ts) => lit_timestamp(&format_timestamp(*ts)),
        }
    }

    fn as_text(&self) -> String {
        match self {
            FilterValue::String(s) => s.clone(),
            FilterValue::Number(n) => n.to_string(),
            FilterValue::Bool(b) => b.to_string(),
            FilterValue::Timestamp(ts) => format_timestamp(*ts),
        }
    }
}

/// One resolved `{ member, operator, values }` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub member: ResolvedMember,
    pub operator: FilterOperator,
    pub values: Vec<FilterValue>,
    /// Bounds of a date operator. `beforeDate` / `afterDate` use `from` and
    /// `to` respectively.
    pub date_range: Option<DateBounds>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    Condition(Condition),
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
}

impl FilterNode {
    /// Every member the node filters on.
    pub fn members(&self) -> Vec<&ResolvedMember> {
        match self {
            FilterNode::Condition(c) => vec![&c.member],
            FilterNode::And(nodes) | FilterNode::Or(nodes) => {
                nodes.iter().flat_map(FilterNode::members).collect()
            }
        }
    }

    /// Dimension or measure; groups are single-kind after resolution.
    pub fn kind(&self) -> MemberKind {
        self.members()
            .first()
            .map(|m| m.kind)
            .unwrap_or(MemberKind::Dimension)
    }

    /// Render as a SQL predicate. `member_sql` yields each member's
    /// expression (raw column SQL for dimensions, the aggregate for measures).
    pub fn to_expr(&self, member_sql: &dyn Fn(&ResolvedMember) -> Expr) -> Option<Expr> {
        match self {
            FilterNode::Condition(c) => Some(c.to_expr(member_sql(&c.member))),
            FilterNode::And(nodes) => {
                and_all(nodes.iter().filter_map(|n| n.to_expr(member_sql)).collect())
            }
            FilterNode::Or(nodes) => {
                or_all(nodes.iter().filter_map(|n| n.to_expr(member_sql)).collect())
            }
        }
    }

    /// Evaluate against a row; `value_of` yields each member's value.
    pub fn evaluate(&self, value_of: &dyn Fn(&ResolvedMember) -> Option<Value>) -> bool {
        match self {
            FilterNode::Condition(c) => c.evaluate(&value_of(&c.member).unwrap_or(Value::Null)),
            FilterNode::And(nodes) => nodes.iter().all(|n| n.evaluate(value_of)),
            FilterNode::Or(nodes) => nodes.iter().any(|n| n.evaluate(value_of)),
        }
    }
}

impl Condition {
    pub fn to_expr(&self, member: Expr) -> Expr {
        let values: Vec<Expr> = self.values.iter().map(FilterValue::to_expr).collect();
        match self.operator {
            FilterOperator::Equals if values.len() == 1 => member.eq(first(values)),
            FilterOperator::Equals => member.in_list(values),
            FilterOperator::NotEquals => {
                let test = if values.len() == 1 {
                    member.clone().ne(first(values))
                } else {
                    member.clone().not_in_list(values)
                };
                test.paren().or(member.is_null())
            }
            FilterOperator::Contains | FilterOperator::StartsWith | FilterOperator::EndsWith => {
                let matches = self
                    .patterns()
                    .into_iter()
                    .map(|p| member.clone().ilike(lit_str(&p), false))
                    .collect();
                or_all(matches).unwrap_or_else(|| lit_bool(false))
            }
            FilterOperator::NotContains => {
                let misses = self
                    .patterns()
                    .into_iter()
                    .map(|p| member.clone().ilike(lit_str(&p), true))
                    .collect();
                let misses = and_all(misses).unwrap_or_else(|| lit_bool(true));
                misses.paren().or(member.is_null())
            }
            FilterOperator::Gt => member.gt(first(values)),
            FilterOperator::Gte => member.gte(first(values)),
            FilterOperator::Lt => member.lt(first(values)),
            FilterOperator::Lte => member.lte(first(values)),
            FilterOperator::Set => member.is_not_null(),
            FilterOperator::NotSet => member.is_null(),
            FilterOperator::InDateRange => match &self.date_range {
                Some(b) => member
                    .clone()
                    .gte(lit_timestamp(&b.from_literal()))
                    .and(member.lte(lit_timestamp(&b.to_literal()))),
                None => lit_bool(false),
            },
            FilterOperator::NotInDateRange => match &self.date_range {
                Some(b) => member
                    .clone()
                    .lt(lit_timestamp(&b.from_literal()))
                    .or(member.gt(lit_timestamp(&b.to_literal()))),
                None => lit_bool(false),
            },
            FilterOperator::BeforeDate => match &self.date_range {
                Some(b) => member.lt(lit_timestamp(&b.from_literal())),
                None => lit_bool(false),
            },
            FilterOperator::AfterDate => match &self.date_range {
                Some(b) => member.gt(lit_timestamp(&b.to_literal())),
                None => lit_bool(false),
            },
        }
    }

    fn patterns(&self) -> Vec<String> {
        self.values
            .iter()
            .map(|v| {
                let escaped = escape_like(&v.as_text());
                match self.operator {
                    FilterOperator::StartsWith => format!("{escaped}%"),
                    FilterOperator::EndsWith => format!("%{escaped}"),
                    _ => format!("%{escaped}%"),
                }
            })
            .collect()
    }

    /// SQL three-valued logic collapsed to bool: a NULL row value only
    /// satisfies `notEquals`, `notContains` and `notSet`.
    pub fn evaluate(&self, row: &Value) -> bool {
        if row.is_null() {
            return matches!(
                self.operator,
                FilterOperator::NotEquals | FilterOperator::NotContains | FilterOperator::NotSet
            );
        }
        let cmp = |v: &FilterValue| compare(row, v);
        match self.operator {
            FilterOperator::Equals => self.values.iter().any(|v| cmp(v) == Some(Ordering::Equal)),
            FilterOperator::NotEquals => self.values.iter().all(|v| cmp(v) != Some(Ordering::Equal)),
            FilterOperator::Contains | FilterOperator::StartsWith | FilterOperator::EndsWith => {
                let text = row_text(row).to_lowercase();
                self.values.iter().any(|v| {
                    let needle = v.as_text().to_lowercase();
                    match self.operator {
                        FilterOperator::StartsWith => text.starts_with(&needle),
                        FilterOperator::EndsWith => text.ends_with(&needle),
                        _ => text.contains(&needle),
                    }
                })
            }
            FilterOperator::NotContains => {
                let text = row_text(row).to_lowercase();
                self.values
                    .iter()
                    .all(|v| !text.contains(&v.as_text().to_lowercase()))
            }
            FilterOperator::Gt => self.values.first().and_then(cmp) == Some(Ordering::Greater),
            FilterOperator::Gte => matches!(
                self.values.first().and_then(cmp),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOperator::Lt => self.values.first().and_then(cmp) == Some(Ordering::Less),
            FilterOperator::Lte => matches!(
                self.values.first().and_then(cmp),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOperator::Set => true,
            FilterOperator::NotSet => false,
            FilterOperator::InDateRange
            | FilterOperator::NotInDateRange
            | FilterOperator::BeforeDate
            | FilterOperator::AfterDate => {
                let (Some(ts), Some(b)) = (row_timestamp(row), self.date_range) else {
                    return false;
                };
                match self.operator {
                    FilterOperator::InDateRange => b.contains(ts),
                    FilterOperator::NotInDateRange => !b.contains(ts),
                    FilterOperator::BeforeDate => ts < b.from,
                    _ => ts > b.to,
                }
            }
        }
    }
}

fn first(values: Vec<Expr>) -> Expr {
    values.into_iter().next().unwrap_or_else(crate::sql::lit_null)
}

fn row_text(row: &Value) -> String {
    match row {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn row_timestamp(row: &Value) -> Option<NaiveDateTime> {
    row.as_str()
        .and_then(date_range::parse_timestamp)
        .map(|(ts, _)| ts)
}

/// Order of a row value relative to a filter value, `None` if incomparable.
fn compare(row: &Value, value: &FilterValue) -> Option<Ordering> {
    match value {
        FilterValue::Number(n) => {
            let r = match row {
                Value::Number(x) => x.as_f64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }?;
            r.partial_cmp(n)
        }
        FilterValue::Bool(b) => match row {
            Value::Bool(r) => Some(r.cmp(b)),
            Value::String(s) => s.parse::<bool>().ok().map(|r| r.cmp(b)),
            _ => None,
        },
        FilterValue::Timestamp(ts) => row_timestamp(row).map(|r| r.cmp(ts)),
        FilterValue::String(s) => Some(row_text(row).as_str().cmp(s.as_str())),
    }
}

/// Resolve a request filter against the catalog.
pub fn resolve(catalog: &Catalog, filter: &Filter) -> CompileResult<FilterNode> {
    match filter {
        Filter::And { and } => group(catalog, and, "and").map(FilterNode::And),
        Filter::Or { or } => group(catalog, or, "or").map(FilterNode::Or),
        Filter::Member(f) => {
            let member = resolve_member(catalog, &f.member)?;
            let operator = FilterOperator::from_str(&f.operator).ok_or_else(|| {
                CompileError::UnsupportedFilterOperator {
                    member: f.member.clone(),
                    operator: f.operator.clone(),
                }
            })?;
            condition(catalog, member, operator, &f.values)
        }
    }
}

fn group(catalog: &Catalog, filters: &[Filter], op: &str) -> CompileResult<Vec<FilterNode>> {
    let nodes = filters
        .iter()
        .map(|f| resolve(catalog, f))
        .collect::<CompileResult<Vec<_>>>()?;
    let members: Vec<&ResolvedMember> = nodes.iter().flat_map(FilterNode::members).collect();
    if let Some(first) = members.first() {
        if let Some(other) = members.iter().find(|m| m.kind != first.kind) {
            return Err(CompileError::invalid_value(
                &other.path.to_string(),
                format!("'{op}' group mixes dimension and measure filters"),
            ));
        }
    }
    Ok(nodes)
}

pub(crate) fn resolve_member(catalog: &Catalog, path: &str) -> CompileResult<ResolvedMember> {
    catalog.resolve_member(path).map_err(|e| match e {
        MemberLookupError::Malformed => {
            CompileError::unknown_field(path, "expected 'Cube.member'")
        }
        MemberLookupError::UnknownCube => {
            CompileError::unknown_field(path, "no such cube or join alias")
        }
        MemberLookupError::UnknownMember => CompileError::unknown_field(path, "no such member"),
    })
}

/// Value type a member's filter values are coerced to.
fn member_type(catalog: &Catalog, member: &ResolvedMember) -> DimensionType {
    catalog
        .dimension(member)
        .map(|d| d.dimension_type)
        .unwrap_or(DimensionType::Number)
}

pub(crate) fn condition(
    catalog: &Catalog,
    member: ResolvedMember,
    operator: FilterOperator,
    raw: &[Value],
) -> CompileResult<FilterNode> {
    let path = member.path.to_string();
    let ty = member_type(catalog, &member);
    if operator.is_date_operator() && ty != DimensionType::Time {
        return Err(CompileError::UnsupportedFilterOperator {
            member: path,
            operator: operator.as_str().into(),
        });
    }
    if operator.takes_values() && raw.is_empty() {
        return Err(CompileError::invalid_value(
            &path,
            format!("'{}' requires values", operator.as_str()),
        ));
    }

    let mut date_range = None;
    let mut values = Vec::new();
    if operator.is_date_operator() {
        let texts = raw
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| CompileError::invalid_value(&path, "dates must be strings"))?;
        date_range = Some(match (operator, texts.as_slice()) {
            (FilterOperator::InDateRange | FilterOperator::NotInDateRange, [from, to]) => {
                DateBounds::new(date_range::start_of(from)?, date_range::end_of(to)?)?
            }
            (FilterOperator::BeforeDate | FilterOperator::AfterDate, [date]) => DateBounds::new(
                date_range::start_of(date)?,
                date_range::end_of(date)?,
            )?,
            _ => {
                return Err(CompileError::invalid_value(
                    &path,
                    format!("wrong number of values for '{}'", operator.as_str()),
                ))
            }
        });
    } else if operator.takes_values() {
        if matches!(
            operator,
            FilterOperator::Gt | FilterOperator::Gte | FilterOperator::Lt | FilterOperator::Lte
        ) && raw.len() != 1
        {
            return Err(CompileError::invalid_value(
                &path,
                format!("'{}' takes exactly one value", operator.as_str()),
            ));
        }
        let coerce_as = if operator.is_pattern() {
            DimensionType::String
        } else {
            ty
        };
        for v in raw {
            values.push(coerce(&path, coerce_as, v)?);
        }
    }

    Ok(FilterNode::Condition(Condition {
        member,
        operator,
        values,
        date_range,
    }))
}

fn coerce(path: &str, ty: DimensionType, value: &Value) -> CompileResult<FilterValue> {
    let bad = |what: &str| CompileError::invalid_value(path, format!("{value} is not {what}"));
    match (ty, value) {
        (_, Value::Null) => Err(CompileError::invalid_value(
            path,
            "null is not a filter value; use set / notSet",
        )),
        (DimensionType::String, Value::String(s)) => Ok(FilterValue::String(s.clone())),
        (DimensionType::String, Value::Number(n)) => Ok(FilterValue::String(n.to_string())),
        (DimensionType::String, Value::Bool(b)) => Ok(FilterValue::String(b.to_string())),
        (DimensionType::Number, Value::Number(n)) => {
            n.as_f64().map(FilterValue::Number).ok_or_else(|| bad("a number"))
        }
        (DimensionType::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(FilterValue::Number)
            .ok_or_else(|| bad("a number")),
        (DimensionType::Boolean, Value::Bool(b)) => Ok(FilterValue::Bool(*b)),
        (DimensionType::Boolean, Value::String(s)) => s
            .parse::<bool>()
            .map(FilterValue::Bool)
            .map_err(|_| bad("a boolean")),
        (DimensionType::Time, Value::String(s)) => date_range::parse_timestamp(s)
            .map(|(ts, _)| FilterValue::Timestamp(ts))
            .ok_or_else(|| bad("a timestamp")),
        (DimensionType::Number, _) => Err(bad("a number")),
        (DimensionType::Boolean, _) => Err(bad("a boolean")),
        (DimensionType::Time, _) => Err(bad("a timestamp")),
        (DimensionType::String, _) => Err(bad("a string")),
    }
}

//! Resolved cube definitions held by a [`Catalog`](crate::schema::Catalog).
//!
//! Everything here is immutable once loaded. Cross-cube references are
//! indices, not names, so nothing is looked up by string at query time.

use serde::Serialize;

use super::types::{AggregationType, DimensionType, Granularity, RefreshEvery, Relationship};

/// Index of a cube in its catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CubeId(pub usize);

/// Index of a cube instance (a cube or a join alias) in its catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InstanceId(pub usize);

/// One piece of a SQL template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TemplateSegment {
    Text(String),
    /// `${CUBE}`: the instance that owns the member or declares the join.
    SelfCube,
    /// `${Name}` naming another cube.
    Cube(CubeId),
}

/// SQL with `${...}` references resolved to typed segments.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SqlTemplate {
    pub segments: Vec<TemplateSegment>,
}

impl SqlTemplate {
    pub fn text(sql: &str) -> Self {
        Self {
            segments: vec![TemplateSegment::Text(sql.into())],
        }
    }

    /// Render with `self_ref` for `${CUBE}` and `cube_ref` for other cubes.
    /// Both closures return already-quoted SQL.
    pub fn render(&self, self_ref: &str, cube_ref: impl Fn(CubeId) -> String) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                TemplateSegment::Text(t) => out.push_str(t),
                TemplateSegment::SelfCube => out.push_str(self_ref),
                TemplateSegment::Cube(id) => out.push_str(&cube_ref(*id)),
            }
        }
        out
    }

    /// Other cubes this template references.
    pub fn referenced_cubes(&self) -> impl Iterator<Item = CubeId> + '_ {
        self.segments.iter().filter_map(|s| match s {
            TemplateSegment::Cube(id) => Some(*id),
            _ => None,
        })
    }
}

/// Where a cube reads its rows from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SqlSource {
    /// Literal SELECT.
    Sql(String),
    /// `schema.table` reference.
    Table(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dimension {
    pub name: String,
    pub sql: SqlTemplate,
    pub dimension_type: DimensionType,
    pub primary_key: bool,
    pub title: Option<String>,
    pub description: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measure {
    pub name: String,
    /// `None` only for `count`, which then counts rows.
    pub sql: Option<SqlTemplate>,
    pub aggregation: AggregationType,
    /// Predicates turning the aggregate into a conditional aggregate.
    pub filters: Vec<SqlTemplate>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub format: Option<String>,
}

/// A declared join, resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Join {
    /// Declared key in the `joins` map.
    pub name: String,
    pub source: CubeId,
    pub target: CubeId,
    pub relationship: Relationship,
    /// Predicate; `${CUBE}` is the source, `${Target}` the joined instance.
    pub on: SqlTemplate,
    /// Instance name of the joined side when it is not the target cube itself.
    pub alias: Option<String>,
    /// Position in declaration order across the whole catalog.
    pub ordinal: usize,
}

impl Join {
    /// Name of the joined instance (alias or target cube name).
    pub fn instance_name<'a>(&'a self, target_name: &'a str) -> &'a str {
        self.alias.as_deref().unwrap_or(target_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshKey {
    pub every: Option<RefreshEvery>,
    /// Change-detection query; refresh only when its value changes.
    pub sql: Option<String>,
}

/// A declared rollup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreAggregation {
    pub name: String,
    pub cube: CubeId,
    /// Measure indices into the owning cube.
    pub measures: Vec<usize>,
    /// Dimension indices into the owning cube.
    pub dimensions: Vec<usize>,
    pub time_dimension: Option<usize>,
    pub granularity: Option<Granularity>,
    pub refresh_key: RefreshKey,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cube {
    pub id: CubeId,
    pub name: String,
    pub sql_source: SqlSource,
    pub title: Option<String>,
    pub description: Option<String>,
    pub data_source: String,
    pub dimensions: Vec<Dimension>,
    pub measures: Vec<Measure>,
    pub joins: Vec<Join>,
    pub pre_aggregations: Vec<PreAggregation>,
}

impl Cube {
    pub fn dimension(&self, name: &str) -> Option<(usize, &Dimension)> {
        self.dimensions.iter().enumerate().find(|(_, d)| d.name == name)
    }

    pub fn measure(&self, name: &str) -> Option<(usize, &Measure)> {
        self.measures.iter().enumerate().find(|(_, m)| m.name == name)
    }

    pub fn primary_key(&self) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.primary_key)
    }

    pub fn pre_aggregation(&self, name: &str) -> Option<&PreAggregation> {
        self.pre_aggregations.iter().find(|p| p.name == name)
    }
}

/// A node of the join graph: a cube, or an alias instance of one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CubeInstance {
    pub id: InstanceId,
    pub name: String,
    pub cube: CubeId,
    /// `(declaring cube, join index)` for alias instances.
    pub via: Option<(CubeId, usize)>,
}

impl CubeInstance {
    pub fn is_alias(&self) -> bool {
        self.via.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_render() {
        let t = SqlTemplate {
            segments: vec![
                TemplateSegment::SelfCube,
                TemplateSegment::Text(".PULocationID = ".into()),
                TemplateSegment::Cube(CubeId(1)),
                TemplateSegment::Text(".LocationID".into()),
            ],
        };
        let sql = t.render("\"TaxiTrips\"", |_| "\"PickupZone\"".into());
        assert_eq!(sql, "\"TaxiTrips\".PULocationID = \"PickupZone\".LocationID");
        assert_eq!(t.referenced_cubes().collect::<Vec<_>>(), vec![CubeId(1)]);
    }
}

//! Typed semantic model: cubes, members, joins and pre-aggregations.

pub mod cube;
pub mod member;
pub mod types;

pub use cube::{
    Cube, CubeId, CubeInstance, Dimension, InstanceId, Join, Measure, PreAggregation, RefreshKey,
    SqlSource, SqlTemplate, TemplateSegment,
};
pub use member::{MemberKind, MemberPath, ResolvedMember};
pub use types::{AggregationType, DimensionType, Granularity, RefreshEvery, Relationship};

//! Serde shapes of cube definition text (JSON).
//!
//! Field names follow the cube framework's spelling (`sql_table`,
//! `primaryKey`, `preAggregations`, `refreshKey`...). Type strings are kept
//! as strings here; the loader validates them so that every problem is
//! reported together.

use std::fmt;
use std::marker::PhantomData;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};

/// One cube as written in a model file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CubeDefinition {
    pub name: String,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default, alias = "sqlTable")]
    pub sql_table: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "dataSource")]
    pub data_source: Option<String>,
    #[serde(default, deserialize_with = "ordered_map")]
    pub dimensions: Vec<(String, DimensionDefinition)>,
    #[serde(default, deserialize_with = "ordered_map")]
    pub measures: Vec<(String, MeasureDefinition)>,
    #[serde(default, deserialize_with = "ordered_map")]
    pub joins: Vec<(String, JoinDefinition)>,
    #[serde(
        default,
        rename = "preAggregations",
        alias = "pre_aggregations",
        deserialize_with = "ordered_map"
    )]
    pub pre_aggregations: Vec<(String, PreAggregationDefinition)>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DimensionDefinition {
    pub sql: String,
    #[serde(rename = "type")]
    pub dimension_type: String,
    #[serde(default, rename = "primaryKey", alias = "primary_key")]
    pub primary_key: bool,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MeasureDefinition {
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(rename = "type")]
    pub measure_type: String,
    #[serde(default)]
    pub filters: Vec<MeasureFilterDefinition>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

/// `"sql"` or `{ "sql": "..." }`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MeasureFilterDefinition {
    Sql(String),
    Object { sql: String },
}

impl MeasureFilterDefinition {
    pub fn sql(&self) -> &str {
        match self {
            MeasureFilterDefinition::Sql(s) => s,
            MeasureFilterDefinition::Object { sql } => sql,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JoinDefinition {
    pub relationship: String,
    pub sql: String,
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct PreAggregationDefinition {
    #[serde(default)]
    pub measures: Vec<String>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default, rename = "timeDimension", alias = "time_dimension")]
    pub time_dimension: Option<String>,
    #[serde(default)]
    pub granularity: Option<String>,
    #[serde(default, rename = "refreshKey", alias = "refresh_key")]
    pub refresh_key: Option<RefreshKeyDefinition>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct RefreshKeyDefinition {
    #[serde(default)]
    pub every: Option<String>,
    #[serde(default)]
    pub sql: Option<String>,
}

/// Accepted layouts of a definition file.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DefinitionFile {
    Wrapped { cubes: Vec<CubeDefinition> },
    Many(Vec<CubeDefinition>),
    One(Box<CubeDefinition>),
}

impl DefinitionFile {
    pub fn into_cubes(self) -> Vec<CubeDefinition> {
        match self {
            DefinitionFile::Wrapped { cubes } => cubes,
            DefinitionFile::Many(cubes) => cubes,
            DefinitionFile::One(cube) => vec![*cube],
        }
    }
}

/// Parse definition text into cubes.
pub fn parse_definitions(text: &str) -> Result<Vec<CubeDefinition>, serde_json::Error> {
    serde_json::from_str::<DefinitionFile>(text).map(DefinitionFile::into_cubes)
}

/// Deserialize a JSON object into `(key, value)` pairs in document order.
///
/// Repeated keys are kept so the loader can report them.
fn ordered_map<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct OrderedVisitor<T>(PhantomData<T>);

    impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedVisitor<T> {
        type Value = Vec<(String, T)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of named entries")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, T>()? {
                entries.push((key, value));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(OrderedVisitor(PhantomData))
}

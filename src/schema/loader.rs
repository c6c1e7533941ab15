//! Definition validation: turns cube definitions into a [`Catalog`].
//!
//! Every violation is collected before failing, so one load reports all
//! problems in the model.

use std::collections::{HashMap, HashSet};

use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;

use super::catalog::Catalog;
use super::definition::{CubeDefinition, JoinDefinition, PreAggregationDefinition};
use super::error::{SchemaError, SchemaResult, SchemaViolation, ViolationKind};
use super::template::{self, RawSegment};
use crate::model::{
    AggregationType, Cube, CubeId, CubeInstance, Dimension, DimensionType, Granularity,
    InstanceId, Join, Measure, PreAggregation, RefreshEvery, RefreshKey, Relationship, SqlSource,
    SqlTemplate,
};

const DEFAULT_DATA_SOURCE: &str = "default";

/// Validate definitions and build a catalog.
pub fn load(definitions: &[CubeDefinition]) -> SchemaResult<Catalog> {
    let mut violations = Violations::default();

    let mut by_name: HashMap<&str, CubeId> = HashMap::new();
    let mut accepted: Vec<&CubeDefinition> = Vec::new();
    for def in definitions {
        if def.name.trim().is_empty() {
            violations.push(
                ViolationKind::InvalidDefinition,
                None,
                "cube without a name",
            );
            continue;
        }
        if by_name.contains_key(def.name.as_str()) {
            violations.push(
                ViolationKind::DuplicateName,
                Some(&def.name),
                format!("cube '{}' is declared more than once", def.name),
            );
            continue;
        }
        by_name.insert(def.name.as_str(), CubeId(accepted.len()));
        accepted.push(def);
    }

    let lookup = |name: &str| by_name.get(name).copied();
    let mut ordinal = 0usize;
    let mut cubes = Vec::with_capacity(accepted.len());
    for (index, def) in accepted.iter().enumerate() {
        let mut ctx = CubeContext {
            id: CubeId(index),
            def,
            violations: &mut violations,
        };
        let sql_source = ctx.sql_source();
        let dimensions = ctx.dimensions(&lookup);
        let measures = ctx.measures(&dimensions, &lookup);
        let joins = ctx.joins(&lookup, &mut ordinal);
        let pre_aggregations = ctx.pre_aggregations(&dimensions, &measures);

        cubes.push(Cube {
            id: CubeId(index),
            name: def.name.clone(),
            sql_source,
            title: def.title.clone(),
            description: def.description.clone(),
            data_source: def
                .data_source
                .clone()
                .unwrap_or_else(|| DEFAULT_DATA_SOURCE.into()),
            dimensions,
            measures,
            joins,
            pre_aggregations,
        });
    }

    let instances = build_instances(&cubes, &mut violations);

    if !violations.is_empty() {
        return Err(SchemaError::Invalid {
            violations: violations.0,
        });
    }

    Ok(Catalog::new(cubes, instances))
}

#[derive(Default)]
struct Violations(Vec<SchemaViolation>);

impl Violations {
    fn push(&mut self, kind: ViolationKind, cube: Option<&str>, message: impl Into<String>) {
        self.0.push(SchemaViolation::new(kind, cube, message));
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

struct CubeContext<'a> {
    id: CubeId,
    def: &'a CubeDefinition,
    violations: &'a mut Violations,
}

impl CubeContext<'_> {
    fn violation(&mut self, kind: ViolationKind, message: impl Into<String>) {
        self.violations.push(kind, Some(&self.def.name), message);
    }

    fn sql_source(&mut self) -> SqlSource {
        let def = self.def;
        match (&def.sql, &def.sql_table) {
            (Some(sql), None) => {
                if let Err(e) = Parser::parse_sql(&DuckDbDialect {}, sql) {
                    tracing::warn!(
                        cube = %def.name,
                        error = %e,
                        "cube sql does not parse; it will be passed through unchanged"
                    );
                }
                SqlSource::Sql(sql.clone())
            }
            (None, Some(table)) => SqlSource::Table(table.clone()),
            (Some(_), Some(_)) => {
                self.violation(
                    ViolationKind::InvalidDefinition,
                    "both 'sql' and 'sql_table' are set",
                );
                SqlSource::Table(String::new())
            }
            (None, None) => {
                self.violation(
                    ViolationKind::InvalidDefinition,
                    "one of 'sql' or 'sql_table' is required",
                );
                SqlSource::Table(String::new())
            }
        }
    }

    /// Parse and resolve a template, reporting unknown references.
    fn template(
        &mut self,
        segments: Vec<RawSegment>,
        what: &str,
        lookup: &impl Fn(&str) -> Option<CubeId>,
    ) -> SqlTemplate {
        match template::resolve(segments, lookup) {
            Ok(t) => t,
            Err(unknown) => {
                for name in unknown {
                    self.violation(
                        ViolationKind::UnresolvedReference,
                        format!("{what} references unknown cube '${{{name}}}'"),
                    );
                }
                SqlTemplate::default()
            }
        }
    }

    fn dimensions(&mut self, lookup: &impl Fn(&str) -> Option<CubeId>) -> Vec<Dimension> {
        let cube = self.def;
        let mut seen = HashSet::new();
        let mut dimensions = Vec::with_capacity(cube.dimensions.len());
        let mut primary_keys = Vec::new();

        for (name, def) in &cube.dimensions {
            if !seen.insert(name.as_str()) {
                self.violation(
                    ViolationKind::DuplicateName,
                    format!("dimension '{name}' is declared more than once"),
                );
                continue;
            }
            let dimension_type = DimensionType::from_str(&def.dimension_type).unwrap_or_else(|| {
                self.violation(
                    ViolationKind::InvalidDefinition,
                    format!("dimension '{name}' has unknown type '{}'", def.dimension_type),
                );
                DimensionType::String
            });
            if def.sql.trim().is_empty() {
                self.violation(
                    ViolationKind::InvalidDefinition,
                    format!("dimension '{name}' has empty sql"),
                );
            }
            if def.primary_key {
                primary_keys.push(name.as_str());
            }
            let sql = self.template(
                template::parse_member_sql(&def.sql),
                &format!("dimension '{name}'"),
                lookup,
            );
            dimensions.push(Dimension {
                name: name.clone(),
                sql,
                dimension_type,
                primary_key: def.primary_key,
                title: def.title.clone(),
                description: def.description.clone(),
                format: def.format.clone(),
            });
        }

        if primary_keys.len() > 1 {
            self.violation(
                ViolationKind::InvalidDefinition,
                format!("more than one primary key: {}", primary_keys.join(", ")),
            );
        }
        dimensions
    }

    fn measures(
        &mut self,
        dimensions: &[Dimension],
        lookup: &impl Fn(&str) -> Option<CubeId>,
    ) -> Vec<Measure> {
        let cube = self.def;
        let mut seen = HashSet::new();
        let mut measures = Vec::with_capacity(cube.measures.len());

        for (name, def) in &cube.measures {
            if !seen.insert(name.as_str()) {
                self.violation(
                    ViolationKind::DuplicateName,
                    format!("measure '{name}' is declared more than once"),
                );
                continue;
            }
            if dimensions.iter().any(|d| &d.name == name) {
                self.violation(
                    ViolationKind::DuplicateName,
                    format!("'{name}' is both a dimension and a measure"),
                );
                continue;
            }
            let Some(aggregation) = AggregationType::from_str(&def.measure_type) else {
                self.violation(
                    ViolationKind::InvalidDefinition,
                    format!("measure '{name}' has unknown type '{}'", def.measure_type),
                );
                continue;
            };
            let sql_text = def.sql.as_deref().map(str::trim).filter(|s| !s.is_empty());
            if sql_text.is_none() && aggregation != AggregationType::Count {
                self.violation(
                    ViolationKind::InvalidMeasureSpec,
                    format!(
                        "measure '{name}' of type {} requires sql",
                        aggregation.as_str()
                    ),
                );
                continue;
            }
            let what = format!("measure '{name}'");
            let sql = sql_text
                .map(|s| self.template(template::parse_member_sql(s), &what, lookup));
            let filters = def
                .filters
                .iter()
                .map(|f| self.template(template::parse(f.sql()), &what, lookup))
                .collect();
            measures.push(Measure {
                name: name.clone(),
                sql,
                aggregation,
                filters,
                title: def.title.clone(),
                description: def.description.clone(),
                format: def.format.clone(),
            });
        }
        measures
    }

    fn joins(
        &mut self,
        lookup: &impl Fn(&str) -> Option<CubeId>,
        ordinal: &mut usize,
    ) -> Vec<Join> {
        let cube = self.def;
        let mut joins: Vec<Join> = Vec::with_capacity(cube.joins.len());
        let mut instance_names: HashMap<String, CubeId> = HashMap::new();

        for (key, def) in &cube.joins {
            let Some(relationship) = Relationship::from_str(&def.relationship) else {
                self.violation(
                    ViolationKind::InvalidDefinition,
                    format!("join '{key}' has unknown relationship '{}'", def.relationship),
                );
                continue;
            };
            let segments = template::parse(&def.sql);
            let Some((target, alias)) = self.join_target(key, def, &segments, lookup) else {
                continue;
            };
            if target == self.id && alias.is_none() {
                self.violation(
                    ViolationKind::InvalidDefinition,
                    format!("self-join '{key}' needs an alias"),
                );
                continue;
            }

            let target_name = lookup_name(cube, key, target, &segments, lookup);
            let instance = alias.clone().unwrap_or(target_name);
            match instance_names.get(&instance) {
                Some(&existing) if existing == target => {
                    self.violation(
                        ViolationKind::AmbiguousJoin,
                        format!(
                            "more than one join to '{instance}'; give each a distinct alias"
                        ),
                    );
                    continue;
                }
                Some(_) => {
                    self.violation(
                        ViolationKind::DuplicateName,
                        format!("join name '{instance}' is used for two different cubes"),
                    );
                    continue;
                }
                None => {
                    instance_names.insert(instance, target);
                }
            }

            let on = self.template(segments, &format!("join '{key}'"), lookup);
            joins.push(Join {
                name: key.clone(),
                source: self.id,
                target,
                relationship,
                on,
                alias,
                ordinal: *ordinal,
            });
            *ordinal += 1;
        }
        joins
    }

    /// A join keyed by a cube name targets that cube. Otherwise the key is
    /// an alias and the target is the one other cube its predicate names.
    fn join_target(
        &mut self,
        key: &str,
        def: &JoinDefinition,
        segments: &[RawSegment],
        lookup: &impl Fn(&str) -> Option<CubeId>,
    ) -> Option<(CubeId, Option<String>)> {
        if let Some(target) = lookup(key) {
            let alias = def.alias.clone().filter(|a| a != key);
            return Some((target, alias));
        }

        let mut others: Vec<CubeId> = template::references(segments)
            .filter_map(|name| lookup(name))
            .filter(|&id| id != self.id)
            .collect();
        others.sort();
        others.dedup();
        match others.as_slice() {
            [target] => Some((*target, Some(def.alias.clone().unwrap_or_else(|| key.into())))),
            [] => {
                self.violation(
                    ViolationKind::UnresolvedReference,
                    format!("join '{key}' does not name a cube and its sql references none"),
                );
                None
            }
            _ => {
                self.violation(
                    ViolationKind::UnresolvedReference,
                    format!("join '{key}' does not name a cube and its sql references several"),
                );
                None
            }
        }
    }

    fn pre_aggregations(
        &mut self,
        dimensions: &[Dimension],
        measures: &[Measure],
    ) -> Vec<PreAggregation> {
        let cube = self.def;
        let mut seen = HashSet::new();
        let mut specs = Vec::with_capacity(cube.pre_aggregations.len());
        for (name, def) in &cube.pre_aggregations {
            if !seen.insert(name.as_str()) {
                self.violation(
                    ViolationKind::DuplicateName,
                    format!("pre-aggregation '{name}' is declared more than once"),
                );
                continue;
            }
            if let Some(spec) = self.pre_aggregation(name, def, dimensions, measures) {
                specs.push(spec);
            }
        }
        specs
    }

    fn pre_aggregation(
        &mut self,
        name: &str,
        def: &PreAggregationDefinition,
        dimensions: &[Dimension],
        measures: &[Measure],
    ) -> Option<PreAggregation> {
        let before = self.violations.0.len();

        let mut measure_ids = Vec::new();
        for reference in &def.measures {
            match self.own_member(reference).and_then(|m| measures.iter().position(|x| x.name == m)) {
                Some(i) if !measure_ids.contains(&i) => measure_ids.push(i),
                Some(_) => {}
                None => self.violation(
                    ViolationKind::UnresolvedReference,
                    format!("pre-aggregation '{name}' references unknown measure '{reference}'"),
                ),
            }
        }

        let mut dimension_ids = Vec::new();
        for reference in &def.dimensions {
            match self.own_member(reference).and_then(|d| dimensions.iter().position(|x| x.name == d)) {
                Some(i) if !dimension_ids.contains(&i) => dimension_ids.push(i),
                Some(_) => {}
                None => self.violation(
                    ViolationKind::UnresolvedReference,
                    format!("pre-aggregation '{name}' references unknown dimension '{reference}'"),
                ),
            }
        }

        let time_dimension = match &def.time_dimension {
            None => None,
            Some(reference) => {
                let found = self
                    .own_member(reference)
                    .and_then(|d| dimensions.iter().position(|x| x.name == d));
                match found {
                    Some(i) if dimensions[i].dimension_type == DimensionType::Time => Some(i),
                    Some(_) => {
                        self.violation(
                            ViolationKind::UnresolvedReference,
                            format!(
                                "pre-aggregation '{name}' time dimension '{reference}' is not of type time"
                            ),
                        );
                        None
                    }
                    None => {
                        self.violation(
                            ViolationKind::UnresolvedReference,
                            format!(
                                "pre-aggregation '{name}' references unknown time dimension '{reference}'"
                            ),
                        );
                        None
                    }
                }
            }
        };

        let granularity = match &def.granularity {
            None => None,
            Some(g) => match Granularity::from_str(g) {
                Some(g) => Some(g),
                None => {
                    self.violation(
                        ViolationKind::InvalidDefinition,
                        format!("pre-aggregation '{name}' has unknown granularity '{g}'"),
                    );
                    None
                }
            },
        };
        if def.time_dimension.is_some() != def.granularity.is_some() {
            self.violation(
                ViolationKind::InvalidDefinition,
                format!("pre-aggregation '{name}' needs both timeDimension and granularity, or neither"),
            );
        }

        let refresh_key = def.refresh_key.clone().unwrap_or_default();
        let every = match refresh_key.every.as_deref() {
            None => None,
            Some(text) => match RefreshEvery::parse(text) {
                Some(every) => Some(every),
                None => {
                    self.violation(
                        ViolationKind::InvalidDefinition,
                        format!("pre-aggregation '{name}' has unparseable refreshKey.every '{text}'"),
                    );
                    None
                }
            },
        };

        if self.violations.0.len() > before {
            return None;
        }
        Some(PreAggregation {
            name: name.into(),
            cube: self.id,
            measures: measure_ids,
            dimensions: dimension_ids,
            time_dimension,
            granularity,
            refresh_key: RefreshKey {
                every,
                sql: refresh_key.sql.filter(|s| !s.trim().is_empty()),
            },
        })
    }

    /// Strip an optional `Cube.` / `CUBE.` prefix naming this cube.
    fn own_member<'r>(&self, reference: &'r str) -> Option<&'r str> {
        match reference.split_once('.') {
            None => Some(reference),
            Some((owner, member)) if owner == self.def.name || owner == "CUBE" => Some(member),
            Some(_) => None,
        }
    }
}

/// Name of a join target cube for instance naming.
fn lookup_name(
    def: &CubeDefinition,
    key: &str,
    target: CubeId,
    segments: &[RawSegment],
    lookup: &impl Fn(&str) -> Option<CubeId>,
) -> String {
    if lookup(key) == Some(target) {
        return key.into();
    }
    template::references(segments)
        .find(|name| lookup(name) == Some(target))
        .unwrap_or(def.name.as_str())
        .into()
}

/// Cubes first (instance id = cube id), then one instance per alias.
fn build_instances(cubes: &[Cube], violations: &mut Violations) -> Vec<CubeInstance> {
    let mut instances: Vec<CubeInstance> = cubes
        .iter()
        .map(|c| CubeInstance {
            id: InstanceId(c.id.0),
            name: c.name.clone(),
            cube: c.id,
            via: None,
        })
        .collect();
    let mut taken: HashMap<String, String> =
        cubes.iter().map(|c| (c.name.clone(), "a cube".to_string())).collect();

    for cube in cubes {
        for (index, join) in cube.joins.iter().enumerate() {
            let Some(alias) = &join.alias else {
                continue;
            };
            if let Some(owner) = taken.get(alias) {
                violations.push(
                    ViolationKind::DuplicateName,
                    Some(&cube.name),
                    format!("join alias '{alias}' is already used by {owner}"),
                );
                continue;
            }
            taken.insert(alias.clone(), format!("a join in '{}'", cube.name));
            instances.push(CubeInstance {
                id: InstanceId(instances.len()),
                name: alias.clone(),
                cube: join.target,
                via: Some((cube.id, index)),
            });
        }
    }
    instances
}

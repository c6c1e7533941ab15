//! Catalog - the immutable, validated set of cubes.

use std::collections::HashMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::graph::JoinGraph;
use crate::model::{
    Cube, CubeId, CubeInstance, Dimension, Granularity, InstanceId, Join, Measure, MemberKind,
    MemberPath, PreAggregation, ResolvedMember, SqlSource,
};

/// Validated cube definitions plus their join graph.
///
/// A catalog is never mutated after load; reloading builds a new one.
#[derive(Debug, Clone)]
pub struct Catalog {
    version: u64,
    cubes: Vec<Cube>,
    by_name: HashMap<String, CubeId>,
    instances: Vec<CubeInstance>,
    graph: JoinGraph,
}

/// Why a member path did not resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberLookupError {
    Malformed,
    UnknownCube,
    UnknownMember,
}

impl Catalog {
    pub(crate) fn new(cubes: Vec<Cube>, instances: Vec<CubeInstance>) -> Self {
        let by_name = cubes.iter().map(|c| (c.name.clone(), c.id)).collect();
        let graph = JoinGraph::build(&cubes, &instances);
        Self {
            version: 0,
            cubes,
            by_name,
            instances,
            graph,
        }
    }

    pub(crate) fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Monotonically increasing per registry; 0 for a catalog loaded
    /// outside a registry.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn cubes(&self) -> &[Cube] {
        &self.cubes
    }

    pub fn cube(&self, name: &str) -> Option<&Cube> {
        self.by_name.get(name).map(|id| &self.cubes[id.0])
    }

    pub fn cube_by_id(&self, id: CubeId) -> &Cube {
        &self.cubes[id.0]
    }

    pub fn instances(&self) -> &[CubeInstance] {
        &self.instances
    }

    pub fn instance(&self, name: &str) -> Option<&CubeInstance> {
        self.graph
            .instance_id(name)
            .ok()
            .and_then(|id| self.instances.get(id.0))
    }

    pub fn instance_by_id(&self, id: InstanceId) -> &CubeInstance {
        &self.instances[id.0]
    }

    /// The instance standing for the cube itself (not an alias).
    pub fn base_instance(&self, cube: CubeId) -> InstanceId {
        InstanceId(cube.0)
    }

    pub fn graph(&self) -> &JoinGraph {
        &self.graph
    }

    /// Resolve `Instance.member` to its definition.
    pub fn resolve_member(&self, path: &str) -> Result<ResolvedMember, MemberLookupError> {
        let path = MemberPath::parse(path).ok_or(MemberLookupError::Malformed)?;
        let instance = self
            .instance(&path.instance)
            .ok_or(MemberLookupError::UnknownCube)?;
        let cube = self.cube_by_id(instance.cube);
        let (kind, index) = if let Some((i, _)) = cube.dimension(&path.member) {
            (MemberKind::Dimension, i)
        } else if let Some((i, _)) = cube.measure(&path.member) {
            (MemberKind::Measure, i)
        } else {
            return Err(MemberLookupError::UnknownMember);
        };
        Ok(ResolvedMember {
            instance: instance.id,
            cube: instance.cube,
            kind,
            index,
            path,
        })
    }

    pub fn dimension(&self, member: &ResolvedMember) -> Option<&Dimension> {
        match member.kind {
            MemberKind::Dimension => self.cube_by_id(member.cube).dimensions.get(member.index),
            MemberKind::Measure => None,
        }
    }

    pub fn measure(&self, member: &ResolvedMember) -> Option<&Measure> {
        match member.kind {
            MemberKind::Measure => self.cube_by_id(member.cube).measures.get(member.index),
            MemberKind::Dimension => None,
        }
    }

    /// Every pre-aggregation in declaration order.
    pub fn pre_aggregations(&self) -> impl Iterator<Item = (&Cube, &PreAggregation)> {
        self.cubes
            .iter()
            .flat_map(|c| c.pre_aggregations.iter().map(move |p| (c, p)))
    }

    /// Look up a pre-aggregation by `Cube.name`.
    pub fn pre_aggregation(&self, key: &str) -> Option<(&Cube, &PreAggregation)> {
        let (cube, name) = key.split_once('.')?;
        let cube = self.cube(cube)?;
        cube.pre_aggregation(name).map(|p| (cube, p))
    }

    /// Hash of everything that shapes a pre-aggregation's rowset: the
    /// cube's source, the member definitions it uses, and the sources of
    /// cubes their SQL joins in. The refresh key only schedules refreshes,
    /// so it is left out.
    pub fn fingerprint(&self, cube: &Cube, spec: &PreAggregation) -> String {
        #[derive(Serialize)]
        struct Joined<'a> {
            cube: &'a str,
            source: &'a SqlSource,
            joins: &'a [Join],
        }
        #[derive(Serialize)]
        struct Shape<'a> {
            cube: &'a str,
            source: &'a SqlSource,
            name: &'a str,
            measures: Vec<&'a Measure>,
            dimensions: Vec<&'a Dimension>,
            time_dimension: Option<&'a Dimension>,
            granularity: Option<Granularity>,
            joins: &'a [Join],
            joined: Vec<Joined<'a>>,
        }
        let measures: Vec<&Measure> = spec
            .measures
            .iter()
            .filter_map(|&i| cube.measures.get(i))
            .collect();
        let dimensions: Vec<&Dimension> = spec
            .dimensions
            .iter()
            .filter_map(|&i| cube.dimensions.get(i))
            .collect();
        let time_dimension = spec.time_dimension.and_then(|i| cube.dimensions.get(i));

        let mut referenced: Vec<CubeId> = dimensions
            .iter()
            .chain(time_dimension.iter())
            .map(|d| &d.sql)
            .chain(measures.iter().flat_map(|m| m.sql.iter().chain(m.filters.iter())))
            .flat_map(|t| t.referenced_cubes())
            .filter(|&id| id != cube.id)
            .collect();
        referenced.sort();
        referenced.dedup();
        let joined: Vec<Joined> = referenced
            .into_iter()
            .map(|id| {
                let other = self.cube_by_id(id);
                Joined {
                    cube: &other.name,
                    source: &other.sql_source,
                    joins: &other.joins,
                }
            })
            .collect();
        // Only joins that could bring other cubes in.
        let joins: &[Join] = if joined.is_empty() { &[] } else { &cube.joins };

        let shape = Shape {
            cube: &cube.name,
            source: &cube.sql_source,
            name: &spec.name,
            measures,
            dimensions,
            time_dimension,
            granularity: spec.granularity,
            joins,
            joined,
        };
        // Plain structs with string keys: serialization cannot fail.
        let json = serde_json::to_vec(&shape).unwrap_or_default();
        format!("{:x}", Sha256::digest(&json))
    }
}

/// `Cube.preAgg` key of a pre-aggregation.
pub fn pre_aggregation_key(cube: &Cube, spec: &PreAggregation) -> String {
    format!("{}.{}", cube.name, spec.name)
}

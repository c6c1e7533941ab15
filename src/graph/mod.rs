//! JoinGraph - cube instances and declared joins as a petgraph graph.
//!
//! Nodes are cube *instances*: every cube, plus one node per join alias.
//! An alias node is reached only through the join that declares it, so it
//! is always a leaf. Each declared join adds a forward edge and a reverse
//! edge; both carry the join's global declaration ordinal, which orders
//! neighbor visits during BFS.

mod path;

pub mod error;

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};

pub use error::{GraphError, GraphResult};

use crate::model::{Cube, CubeId, CubeInstance, InstanceId, Relationship};

/// Edge data: which declared join this is and which way it is walked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeData {
    /// `(declaring cube, index into its joins)`
    pub join: (CubeId, usize),
    pub ordinal: usize,
    /// Walking from the joined side back to the declaring cube.
    pub reverse: bool,
    pub relationship: Relationship,
}

impl EdgeData {
    /// Does walking this edge multiply rows of the side it starts from?
    pub fn causes_fanout(&self) -> bool {
        if self.reverse {
            self.relationship.reverse_fans_out()
        } else {
            self.relationship.forward_fans_out()
        }
    }
}

/// An edge in a join path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinEdge {
    pub from: InstanceId,
    pub to: InstanceId,
    pub join: (CubeId, usize),
    pub ordinal: usize,
    pub reverse: bool,
    pub relationship: Relationship,
}

impl JoinEdge {
    fn new(from: InstanceId, to: InstanceId, data: &EdgeData) -> Self {
        Self {
            from,
            to,
            join: data.join,
            ordinal: data.ordinal,
            reverse: data.reverse,
            relationship: data.relationship,
        }
    }

    /// Does walking from `from` to `to` cause row multiplication?
    pub fn causes_fanout(&self) -> bool {
        self.fans_out_walking_from(self.from)
    }

    /// Fan-out when the edge is walked starting at `start` (either end).
    pub fn fans_out_walking_from(&self, start: InstanceId) -> bool {
        let forward = (start == self.from) != self.reverse;
        if forward {
            self.relationship.forward_fans_out()
        } else {
            self.relationship.reverse_fans_out()
        }
    }
}

/// Ordered edges from one instance to another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinPath {
    pub edges: Vec<JoinEdge>,
}

impl JoinPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn causes_fanout(&self) -> bool {
        self.edges.iter().any(JoinEdge::causes_fanout)
    }
}

/// Edges joining a root to a set of instances, parents before children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTree {
    pub root: InstanceId,
    pub edges: Vec<JoinEdge>,
}

impl JoinTree {
    pub fn single(root: InstanceId) -> Self {
        Self {
            root,
            edges: Vec::new(),
        }
    }

    /// Root first, then every joined instance in edge order.
    pub fn instances(&self) -> impl Iterator<Item = InstanceId> + '_ {
        std::iter::once(self.root).chain(self.edges.iter().map(|e| e.to))
    }

    pub fn contains(&self, instance: InstanceId) -> bool {
        self.instances().any(|i| i == instance)
    }

    pub fn causes_fanout(&self) -> bool {
        self.edges.iter().any(JoinEdge::causes_fanout)
    }

    /// Are rows of `instance` repeated by the joins in this tree?
    ///
    /// Walks the tree outward from `instance`; any edge that fans out in
    /// the walking direction multiplies its rows.
    pub fn multiplies(&self, instance: InstanceId) -> bool {
        let mut frontier = vec![instance];
        let mut seen = vec![instance];
        while let Some(current) = frontier.pop() {
            for edge in &self.edges {
                let next = if edge.from == current {
                    edge.to
                } else if edge.to == current {
                    edge.from
                } else {
                    continue;
                };
                if seen.contains(&next) {
                    continue;
                }
                if edge.fans_out_walking_from(current) {
                    return true;
                }
                seen.push(next);
                frontier.push(next);
            }
        }
        false
    }
}

/// Graph of cube instances connected by declared joins.
#[derive(Debug, Clone, Default)]
pub struct JoinGraph {
    graph: DiGraph<InstanceId, EdgeData>,
    /// Node index per instance id.
    nodes: Vec<NodeIndex>,
    names: Vec<String>,
    cube_of: Vec<CubeId>,
    by_name: HashMap<String, InstanceId>,
}

impl JoinGraph {
    /// Build the graph. `instances` must list every cube first (instance id
    /// equal to cube id), then alias instances.
    pub fn build(cubes: &[Cube], instances: &[CubeInstance]) -> Self {
        let mut graph = DiGraph::new();
        let nodes: Vec<NodeIndex> = instances.iter().map(|i| graph.add_node(i.id)).collect();

        let alias_node: HashMap<(CubeId, usize), InstanceId> = instances
            .iter()
            .filter_map(|i| i.via.map(|via| (via, i.id)))
            .collect();

        for cube in cubes {
            for (index, join) in cube.joins.iter().enumerate() {
                let source = InstanceId(cube.id.0);
                let target = alias_node
                    .get(&(cube.id, index))
                    .copied()
                    .unwrap_or(InstanceId(join.target.0));
                let (Some(&s), Some(&t)) = (nodes.get(source.0), nodes.get(target.0)) else {
                    continue;
                };
                let data = EdgeData {
                    join: (cube.id, index),
                    ordinal: join.ordinal,
                    reverse: false,
                    relationship: join.relationship,
                };
                graph.add_edge(s, t, data.clone());
                graph.add_edge(
                    t,
                    s,
                    EdgeData {
                        reverse: true,
                        ..data
                    },
                );
            }
        }

        Self {
            graph,
            nodes,
            names: instances.iter().map(|i| i.name.clone()).collect(),
            cube_of: instances.iter().map(|i| i.cube).collect(),
            by_name: instances.iter().map(|i| (i.name.clone(), i.id)).collect(),
        }
    }

    pub fn instance_id(&self, name: &str) -> GraphResult<InstanceId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownCube(name.into()))
    }

    pub fn instance_name(&self, id: InstanceId) -> &str {
        self.names.get(id.0).map(String::as_str).unwrap_or("")
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Alias instances of `cube`, in declaration order.
    pub fn aliases_of(&self, cube: CubeId) -> Vec<InstanceId> {
        (0..self.cube_of.len())
            .filter(|&i| self.cube_of[i] == cube && i != cube.0)
            .map(InstanceId)
            .collect()
    }
}

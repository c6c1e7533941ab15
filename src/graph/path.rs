//! Path finding over the join graph.
//!
//! BFS visits neighbors in ascending declaration ordinal, so among equally
//! short paths the one using the earliest declared joins wins, and the
//! result never depends on hash or insertion order.

use std::collections::{HashMap, VecDeque};

use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;

use super::{GraphError, GraphResult, JoinEdge, JoinGraph, JoinPath, JoinTree};
use crate::model::{CubeId, InstanceId};

/// Parent information for path reconstruction.
/// Stores the parent node and the edge used to reach the current node.
struct ParentInfo {
    parent: NodeIndex,
    edge_idx: EdgeIndex,
}

/// Result of one BFS: parent pointers plus discovery order.
struct Search {
    parents: HashMap<NodeIndex, ParentInfo>,
    discovered: Vec<NodeIndex>,
}

impl JoinGraph {
    /// Find the shortest path between two instances by name.
    pub fn find_path(&self, from: &str, to: &str) -> GraphResult<JoinPath> {
        let from_id = self.instance_id(from)?;
        let to_id = self.instance_id(to)?;
        self.find_path_between(from_id, to_id)
    }

    /// Find the shortest path between two instances.
    pub fn find_path_between(&self, from: InstanceId, to: InstanceId) -> GraphResult<JoinPath> {
        if from == to {
            return Ok(JoinPath::new());
        }
        let from_idx = self.node(from)?;
        let to_idx = self.node(to)?;

        let search = self.bfs(from_idx, Some(to_idx));
        if !search.parents.contains_key(&to_idx) {
            return Err(self.unreachable(from, to, &search));
        }
        Ok(JoinPath {
            edges: self.reconstruct_path(from_idx, to_idx, &search.parents),
        })
    }

    /// Join tree from `root` covering every target.
    ///
    /// One BFS from the root; the union of the root-to-target paths,
    /// deduplicated, ordered by when BFS discovered each joined instance.
    pub fn find_join_tree(&self, root: InstanceId, targets: &[InstanceId]) -> GraphResult<JoinTree> {
        let root_idx = self.node(root)?;
        let search = self.bfs(root_idx, None);

        let mut needed: HashMap<NodeIndex, JoinEdge> = HashMap::new();
        for &target in targets {
            if target == root {
                continue;
            }
            let target_idx = self.node(target)?;
            if !search.parents.contains_key(&target_idx) {
                return Err(self.unreachable(root, target, &search));
            }
            for edge in self.reconstruct_path(root_idx, target_idx, &search.parents) {
                if let Some(&idx) = self.nodes.get(edge.to.0) {
                    needed.entry(idx).or_insert(edge);
                }
            }
        }

        let edges = search
            .discovered
            .iter()
            .filter_map(|idx| needed.remove(idx))
            .collect();
        Ok(JoinTree { root, edges })
    }

    /// Check if a path exists between two instances.
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        self.find_path(from, to).is_ok()
    }

    fn node(&self, id: InstanceId) -> GraphResult<NodeIndex> {
        self.nodes
            .get(id.0)
            .copied()
            .ok_or_else(|| GraphError::UnknownCube(format!("#{}", id.0)))
    }

    /// Breadth-first search with neighbors sorted by (ordinal, direction).
    fn bfs(&self, start: NodeIndex, stop_at: Option<NodeIndex>) -> Search {
        let mut parents: HashMap<NodeIndex, ParentInfo> = HashMap::new();
        let mut discovered = Vec::new();
        let mut visited = vec![false; self.graph.node_count()];
        let mut queue = VecDeque::new();

        visited[start.index()] = true;
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            let mut edges: Vec<_> = self.graph.edges(current).collect();
            edges.sort_by_key(|e| (e.weight().ordinal, e.weight().reverse));

            for edge_ref in edges {
                let neighbor = edge_ref.target();
                if visited[neighbor.index()] {
                    continue;
                }
                visited[neighbor.index()] = true;
                parents.insert(
                    neighbor,
                    ParentInfo {
                        parent: current,
                        edge_idx: edge_ref.id(),
                    },
                );
                discovered.push(neighbor);
                if Some(neighbor) == stop_at {
                    return Search {
                        parents,
                        discovered,
                    };
                }
                queue.push_back(neighbor);
            }
        }

        Search {
            parents,
            discovered,
        }
    }

    /// Walk parent pointers back from destination to source.
    fn reconstruct_path(
        &self,
        from_idx: NodeIndex,
        to_idx: NodeIndex,
        parents: &HashMap<NodeIndex, ParentInfo>,
    ) -> Vec<JoinEdge> {
        let mut edges = Vec::new();
        let mut current = to_idx;

        while current != from_idx {
            let Some(info) = parents.get(&current) else {
                break;
            };
            edges.push(JoinEdge::new(
                self.graph[info.parent],
                self.graph[current],
                &self.graph[info.edge_idx],
            ));
            current = info.parent;
        }

        edges.reverse();
        edges
    }

    /// Error for an unreachable target: `AmbiguousJoin` when the target
    /// cube is reachable only under aliases, `NoPath` otherwise.
    fn unreachable(&self, from: InstanceId, to: InstanceId, search: &Search) -> GraphError {
        let target_cube = self.cube_of.get(to.0).copied().unwrap_or(CubeId(usize::MAX));
        if target_cube.0 == to.0 {
            let reachable_aliases: Vec<String> = self
                .aliases_of(target_cube)
                .into_iter()
                .filter(|alias| {
                    self.nodes
                        .get(alias.0)
                        .is_some_and(|idx| search.parents.contains_key(idx))
                })
                .map(|alias| self.instance_name(alias).to_string())
                .collect();
            if !reachable_aliases.is_empty() {
                return GraphError::AmbiguousJoin {
                    cube: self.instance_name(to).to_string(),
                    aliases: reachable_aliases,
                };
            }
        }
        GraphError::NoPath {
            from: self.instance_name(from).to_string(),
            to: self.instance_name(to).to_string(),
        }
    }
}

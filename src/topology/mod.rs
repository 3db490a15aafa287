//! Topology engine
//!
//! Structural analysis of a thread's fragment graph. Edges only record that
//! two fragments are connected; relation kind and confidence never weight
//! anything, and no metric ranks nodes.
//!
//! ```text
//!   F1 ── F2        F4
//!    \              │
//!     F3            F5      => 2 components, not connected, no diameter
//! ```
//!
//! Components come from a union-find pass; diameter and shortest paths from
//! breadth-first search. Graphs here are one thread's fragments, so all of
//! this is small-graph work.

mod union_find;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::types::{FragmentId, FragmentRelation, ThreadId};

pub use union_find::UnionFind;

/// Undirected edge, stored with its endpoints in sorted order
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StructuralEdge {
    a: FragmentId,
    b: FragmentId,
}

impl StructuralEdge {
    pub fn new(x: FragmentId, y: FragmentId) -> Self {
        if x <= y {
            Self { a: x, b: y }
        } else {
            Self { a: y, b: x }
        }
    }

    pub fn endpoints(&self) -> (&FragmentId, &FragmentId) {
        (&self.a, &self.b)
    }

    pub fn is_self_loop(&self) -> bool {
        self.a == self.b
    }
}

impl From<&FragmentRelation> for StructuralEdge {
    fn from(relation: &FragmentRelation) -> Self {
        Self::new(relation.source.clone(), relation.target.clone())
    }
}

/// Shape of the current graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphMetrics {
    pub node_count: usize,
    pub edge_count: usize,
    /// `2E / (N(N-1))`, 0 for fewer than two nodes
    pub density: f64,
    pub is_connected: bool,
    pub component_count: usize,
    /// Longest shortest path; only for connected graphs of two or more nodes
    pub diameter: Option<usize>,
}

/// Undirected structural graph over fragment ids
#[derive(Debug, Clone, Default)]
pub struct TopologyEngine {
    nodes: Vec<FragmentId>,
    index: BTreeMap<FragmentId, usize>,
    adjacency: Vec<BTreeSet<usize>>,
    edge_count: usize,
}

impl TopologyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the graph with `fragment_ids` and `edges`
    ///
    /// Edge endpoints missing from `fragment_ids` are added as nodes.
    /// Duplicate edges collapse and self-loops are dropped.
    pub fn build_graph<I>(&mut self, fragment_ids: &[FragmentId], edges: I)
    where
        I: IntoIterator<Item = StructuralEdge>,
    {
        self.clear();
        for id in fragment_ids {
            self.add_node(id);
        }
        for edge in edges {
            if edge.is_self_loop() {
                continue;
            }
            let a = self.add_node(&edge.a);
            let b = self.add_node(&edge.b);
            if self.adjacency[a].insert(b) {
                self.adjacency[b].insert(a);
                self.edge_count += 1;
            }
        }
    }

    fn add_node(&mut self, id: &FragmentId) -> usize {
        if let Some(&i) = self.index.get(id) {
            return i;
        }
        let i = self.nodes.len();
        self.nodes.push(id.clone());
        self.index.insert(id.clone(), i);
        self.adjacency.push(BTreeSet::new());
        i
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.index.clear();
        self.adjacency.clear();
        self.edge_count = 0;
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn contains(&self, id: &FragmentId) -> bool {
        self.index.contains_key(id)
    }

    /// Connected components, in order of their first node's insertion
    pub fn get_connected_components(&self) -> Vec<BTreeSet<FragmentId>> {
        let mut sets = UnionFind::new(self.nodes.len());
        for (a, neighbours) in self.adjacency.iter().enumerate() {
            for &b in neighbours.range(a + 1..) {
                sets.union(a, b);
            }
        }

        let mut slot_of_root: BTreeMap<usize, usize> = BTreeMap::new();
        let mut components: Vec<BTreeSet<FragmentId>> = Vec::new();
        for (i, id) in self.nodes.iter().enumerate() {
            let root = sets.find(i);
            let slot = *slot_of_root.entry(root).or_insert_with(|| {
                components.push(BTreeSet::new());
                components.len() - 1
            });
            components[slot].insert(id.clone());
        }
        components
    }

    /// Components, if there are more of them than known thread identities
    ///
    /// An empty result means no divergence.
    pub fn detect_structural_divergence(
        &self,
        known_thread_ids: &BTreeSet<ThreadId>,
    ) -> Vec<BTreeSet<FragmentId>> {
        let components = self.get_connected_components();
        if components.len() > known_thread_ids.len().max(1) {
            components
        } else {
            Vec::new()
        }
    }

    pub fn compute_metrics(&self) -> GraphMetrics {
        let node_count = self.nodes.len();
        let component_count = self.get_connected_components().len();
        let is_connected = node_count > 0 && component_count == 1;

        let density = if node_count > 1 {
            (2 * self.edge_count) as f64 / (node_count * (node_count - 1)) as f64
        } else {
            0.0
        };

        let diameter = if is_connected && node_count > 1 {
            (0..node_count)
                .map(|start| self.eccentricity(start))
                .max()
        } else {
            None
        };

        GraphMetrics {
            node_count,
            edge_count: self.edge_count,
            density,
            is_connected,
            component_count,
            diameter,
        }
    }

    /// Fewest-hop path from `from` to `to`, endpoints included
    pub fn get_shortest_path(&self, from: &FragmentId, to: &FragmentId) -> Option<Vec<FragmentId>> {
        let start = *self.index.get(from)?;
        let goal = *self.index.get(to)?;

        let parents = self.bfs(start);
        parents[goal]?;

        let mut path = vec![goal];
        let mut current = goal;
        while current != start {
            current = parents[current]?;
            path.push(current);
        }
        path.reverse();
        Some(path.into_iter().map(|i| self.nodes[i].clone()).collect())
    }

    /// BFS parent table; the start node is its own parent
    fn bfs(&self, start: usize) -> Vec<Option<usize>> {
        let mut parents = vec![None; self.nodes.len()];
        parents[start] = Some(start);
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for &next in &self.adjacency[node] {
                if parents[next].is_none() {
                    parents[next] = Some(node);
                    queue.push_back(next);
                }
            }
        }
        parents
    }

    fn eccentricity(&self, start: usize) -> usize {
        let mut distance = vec![usize::MAX; self.nodes.len()];
        distance[start] = 0;
        let mut queue = VecDeque::from([start]);
        let mut furthest = 0;
        while let Some(node) = queue.pop_front() {
            for &next in &self.adjacency[node] {
                if distance[next] == usize::MAX {
                    distance[next] = distance[node] + 1;
                    furthest = furthest.max(distance[next]);
                    queue.push_back(next);
                }
            }
        }
        furthest
    }
}

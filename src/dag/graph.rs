// src/dag/graph.rs

use std::collections::{BTreeSet, VecDeque};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::Serialize;

use crate::errors::{MonoflowError, Result};

/// A node of a [`Graph`]: stable dense index, explicit edges, and payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Node<T> {
    pub index: usize,
    pub parents_indexes: BTreeSet<usize>,
    pub children_indexes: BTreeSet<usize>,
    pub data: T,
}

/// Ordered directed acyclic graph.
///
/// Node `i` always lives at position `i`, so graphs derived with
/// [`Graph::map`] keep index correspondence with their source. Both the
/// artifact graph and the step graph use this shape.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct Graph<T> {
    nodes: Vec<Node<T>>,
}

impl<T> Graph<T> {
    /// Build a graph from payloads and the parent indexes of each payload.
    ///
    /// Children are derived as the inverse of parents. Fails on out-of-range
    /// indexes, self edges and cycles.
    pub fn from_parents(data: Vec<T>, parents: Vec<Vec<usize>>) -> Result<Self> {
        if data.len() != parents.len() {
            return Err(MonoflowError::ConfigError(format!(
                "graph has {} nodes but {} parent lists",
                data.len(),
                parents.len()
            )));
        }

        let len = data.len();
        let mut nodes: Vec<Node<T>> = data
            .into_iter()
            .enumerate()
            .map(|(index, data)| Node {
                index,
                parents_indexes: BTreeSet::new(),
                children_indexes: BTreeSet::new(),
                data,
            })
            .collect();

        for (index, node_parents) in parents.into_iter().enumerate() {
            for parent in node_parents {
                if parent >= len {
                    return Err(MonoflowError::ConfigError(format!(
                        "node {index} references unknown parent index {parent}"
                    )));
                }
                if parent == index {
                    return Err(MonoflowError::DagCycle(format!(
                        "node {index} depends on itself"
                    )));
                }
                nodes[index].parents_indexes.insert(parent);
                nodes[parent].children_indexes.insert(index);
            }
        }

        let graph = Self { nodes };
        graph.ensure_acyclic()?;
        Ok(graph)
    }

    fn ensure_acyclic(&self) -> Result<()> {
        // Edge direction: parent -> child.
        let mut g: DiGraphMap<usize, ()> = DiGraphMap::new();
        for node in &self.nodes {
            g.add_node(node.index);
            for parent in &node.parents_indexes {
                g.add_edge(*parent, node.index, ());
            }
        }

        match toposort(&g, None) {
            Ok(_) => Ok(()),
            Err(cycle) => Err(MonoflowError::DagCycle(format!(
                "cycle detected involving node {}",
                cycle.node_id()
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node<T>] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&Node<T>> {
        self.nodes.get(index)
    }

    /// Nodes without parents.
    pub fn heads(&self) -> impl Iterator<Item = &Node<T>> {
        self.nodes.iter().filter(|n| n.parents_indexes.is_empty())
    }

    /// Derive a graph with the same shape and new payloads.
    pub fn map<U, F>(&self, mut f: F) -> Graph<U>
    where
        F: FnMut(&Node<T>) -> U,
    {
        Graph {
            nodes: self
                .nodes
                .iter()
                .map(|n| Node {
                    index: n.index,
                    parents_indexes: n.parents_indexes.clone(),
                    children_indexes: n.children_indexes.clone(),
                    data: f(n),
                })
                .collect(),
        }
    }

    /// Breadth-first order from the heads in which a node appears only after
    /// all of its parents.
    ///
    /// A child is queued exactly once: when the last of its parents has been
    /// visited.
    pub fn topological_order(&self) -> Vec<usize> {
        let mut remaining: Vec<usize> = self
            .nodes
            .iter()
            .map(|n| n.parents_indexes.len())
            .collect();
        let mut queue: VecDeque<usize> = self.heads().map(|n| n.index).collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(index) = queue.pop_front() {
            order.push(index);
            for child in &self.nodes[index].children_indexes {
                remaining[*child] -= 1;
                if remaining[*child] == 0 {
                    queue.push_back(*child);
                }
            }
        }

        order
    }

    /// Transitive closure of parents for every node.
    pub fn ancestors(&self) -> Vec<BTreeSet<usize>> {
        let mut closure: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); self.nodes.len()];
        for index in self.topological_order() {
            let mut set = BTreeSet::new();
            for parent in &self.nodes[index].parents_indexes {
                set.insert(*parent);
                set.extend(closure[*parent].iter().copied());
            }
            closure[index] = set;
        }
        closure
    }
}

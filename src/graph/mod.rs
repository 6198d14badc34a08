//! The operation graph: a directed acyclic graph of build operations.
//!
//! The graph is owned by the host execution engine and treated as read-only
//! by the coordination logic; everything here references operations by
//! [`OperationId`] rather than holding them. Edges point from an operation to
//! the operations it depends on, so *consumers* of an operation are the
//! sources of its incoming edges.

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

mod operation;

pub use operation::{Operation, OperationStatus, ProjectRef, RunnerInfo};

/// Stable identity of an operation within one graph, valid for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(NodeIndex);

/// Directed graph of build operations.
///
/// Edge `a -> b` means `a` depends on `b`; `b` must finish before `a` starts.
/// Cycle rejection is the execution engine's concern - this crate only
/// requires that the input is a DAG.
pub struct OperationGraph {
    graph: DiGraph<Operation, ()>,
    by_name: HashMap<String, OperationId>,
}

impl OperationGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            by_name: HashMap::new(),
        }
    }

    /// Add an operation and return its id.
    ///
    /// Adding a second operation with an existing name returns the existing
    /// id and discards the new descriptor; names identify operations.
    pub fn add_operation(&mut self, operation: Operation) -> OperationId {
        if let Some(&id) = self.by_name.get(&operation.name) {
            return id;
        }
        let name = operation.name.clone();
        let id = OperationId(self.graph.add_node(operation));
        self.by_name.insert(name, id);
        id
    }

    /// Record that `from` depends on `to`. Duplicate edges are ignored.
    pub fn add_dependency(&mut self, from: OperationId, to: OperationId) {
        if !self.graph.contains_edge(from.0, to.0) {
            self.graph.add_edge(from.0, to.0, ());
        }
    }

    /// Look up an operation id by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<OperationId> {
        self.by_name.get(name).copied()
    }

    /// The operation behind an id.
    ///
    /// # Panics
    ///
    /// Panics if the id does not belong to this graph; ids are only ever
    /// minted by [`OperationGraph::add_operation`].
    #[must_use]
    pub fn operation(&self, id: OperationId) -> &Operation {
        &self.graph[id.0]
    }

    /// Direct dependencies of an operation.
    #[must_use]
    pub fn dependencies(&self, id: OperationId) -> Vec<OperationId> {
        self.graph
            .neighbors_directed(id.0, Direction::Outgoing)
            .map(OperationId)
            .collect()
    }

    /// Direct consumers (dependents) of an operation.
    #[must_use]
    pub fn consumers(&self, id: OperationId) -> Vec<OperationId> {
        self.graph
            .neighbors_directed(id.0, Direction::Incoming)
            .map(OperationId)
            .collect()
    }

    /// All operation ids, in insertion order.
    #[must_use]
    pub fn ids(&self) -> Vec<OperationId> {
        self.graph.node_indices().map(OperationId).collect()
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph has no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

impl Default for OperationGraph {
    fn default() -> Self {
        Self::new()
    }
}

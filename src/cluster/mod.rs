//! Clustering of operations whose cache eligibility is coupled.
//!
//! When an operation cannot be cache-verified (it has a cache-disabled
//! reason), the correctness of a dependent's cache entry cannot be
//! established either - the upstream output is unknowable without running it.
//! Such an operation is therefore grouped with every direct consumer into one
//! execution unit, transitively. In a cobuild, a whole cluster is owned by a
//! single agent: either the agent that built the disabled operation also
//! builds its dependents, or every agent rebuilds the cluster locally. The
//! first choice wins.
//!
//! Cluster ids must be identical across agents regardless of graph discovery
//! order, so they are derived from the *sorted* member list.

use crate::graph::{OperationGraph, OperationId};
use anyhow::Result;
use sha1::{Digest, Sha1};
use std::collections::HashMap;

mod disjoint_set;

pub use disjoint_set::DisjointSet;

/// Separator between hashed fields; also used by cache-key derivation.
pub(crate) const HASH_DELIMITER: &str = "|";

/// A maximal set of operations whose cache eligibility is coupled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    /// Deterministic cluster id, present only for cobuild-enabled runs.
    pub id: Option<String>,
    /// Member operations, sorted by operation name.
    pub operations: Vec<OperationId>,
}

/// Builds the cluster partition for one pass.
pub struct ClusterBuilder<'g> {
    graph: &'g OperationGraph,
    disabled_reasons: HashMap<OperationId, String>,
}

impl<'g> ClusterBuilder<'g> {
    /// Start a builder over all operations of `graph`.
    #[must_use]
    pub fn new(graph: &'g OperationGraph) -> Self {
        Self {
            graph,
            disabled_reasons: HashMap::new(),
        }
    }

    /// Annotate an operation as structurally unable to cache.
    pub fn mark_cache_disabled(&mut self, id: OperationId, reason: impl Into<String>) {
        self.disabled_reasons.insert(id, reason.into());
    }

    /// Compute the cluster partition.
    ///
    /// When `cobuild_context_id` is present, every cluster receives a
    /// deterministic id: the SHA-1 over the `(project folder, phase name)`
    /// pairs of its members, sorted by operation name. Permuting the
    /// discovery order of operations never changes the id.
    pub fn build(&self, cobuild_context_id: Option<&str>) -> Result<Vec<Cluster>> {
        let mut set: DisjointSet<OperationId> = DisjointSet::new();
        for id in self.graph.ids() {
            set.add(id);
        }

        for (&id, _reason) in &self.disabled_reasons {
            for consumer in self.graph.consumers(id) {
                set.union(id, consumer)?;
            }
        }

        let mut clusters: Vec<Cluster> = Vec::new();
        for mut operations in set.all_sets() {
            operations.sort_by(|&a, &b| {
                self.graph
                    .operation(a)
                    .name
                    .cmp(&self.graph.operation(b).name)
            });
            let id = cobuild_context_id.map(|_| self.cluster_id(&operations));
            clusters.push(Cluster { id, operations });
        }
        // Deterministic report ordering; the disjoint set yields components
        // in hash order.
        clusters.sort_by(|a, b| {
            let a_name = &self.graph.operation(a.operations[0]).name;
            let b_name = &self.graph.operation(b.operations[0]).name;
            a_name.cmp(b_name)
        });
        Ok(clusters)
    }

    /// Reason attributed to an operation, if any.
    #[must_use]
    pub fn disabled_reason(&self, id: OperationId) -> Option<&str> {
        self.disabled_reasons.get(&id).map(String::as_str)
    }

    fn cluster_id(&self, sorted_operations: &[OperationId]) -> String {
        let mut hasher = Sha1::new();
        for &id in sorted_operations {
            let operation = self.graph.operation(id);
            hasher.update(operation.project.project_relative_folder.as_bytes());
            hasher.update(HASH_DELIMITER.as_bytes());
            hasher.update(operation.phase_name.as_bytes());
            hasher.update(HASH_DELIMITER.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

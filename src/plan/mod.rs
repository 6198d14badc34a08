//! Build-plan analysis and the execution-plan debug report.
//!
//! Purely diagnostic: nothing here influences scheduling. The analyzer
//! layers the graph by BFS from the leaves (operations nobody consumes)
//! inward along dependencies, which yields the maximum parallelism width and
//! the depth of the deepest dependency chain. The waterfall and cluster
//! reports help debug cobuilds that fail to spread work across agents. The
//! text format is human-readable only; its stability is not guaranteed.

use crate::cluster::{Cluster, ClusterBuilder};
use crate::graph::{OperationGraph, OperationId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;
use tracing::debug;

/// Depth-leveled view of the operation graph.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    /// Depth of the deepest dependency chain, counting real operations only.
    pub depth: usize,
    /// Maximum parallelism: the widest level, counting real operations only.
    pub max_width: usize,
    /// Real-operation count per level, leaf level first.
    pub nodes_per_depth: Vec<usize>,
    /// Level membership, leaf level first, no-ops excluded, each level
    /// sorted by operation name.
    pub levels: Vec<Vec<OperationId>>,
}

/// Read-only analyzer over one operation graph.
pub struct BuildPlanAnalyzer<'g> {
    graph: &'g OperationGraph,
}

impl<'g> BuildPlanAnalyzer<'g> {
    /// Create an analyzer for `graph`.
    #[must_use]
    pub fn new(graph: &'g OperationGraph) -> Self {
        Self { graph }
    }

    /// Compute the depth-leveled partition. Runs in O(V+E) and terminates on
    /// any DAG.
    #[must_use]
    pub fn analyze(&self) -> BuildPlan {
        let all: Vec<OperationId> = self.graph.ids();
        let mut remaining: HashSet<OperationId> = all.iter().copied().collect();

        // Leaves: operations with no consumers. A dependency joins the next
        // level once every one of its consumers has been peeled off.
        let mut frontier: Vec<OperationId> = all
            .iter()
            .copied()
            .filter(|&id| self.graph.consumers(id).is_empty())
            .collect();

        let mut levels: Vec<Vec<OperationId>> = Vec::new();
        while !frontier.is_empty() {
            for &id in &frontier {
                remaining.remove(&id);
            }
            let mut real: Vec<OperationId> = frontier
                .iter()
                .copied()
                .filter(|&id| !self.graph.operation(id).runner.is_no_op)
                .collect();
            real.sort_by(|&a, &b| {
                self.graph
                    .operation(a)
                    .name
                    .cmp(&self.graph.operation(b).name)
            });
            if !real.is_empty() {
                levels.push(real);
            }

            let mut next: Vec<OperationId> = Vec::new();
            let mut queued: HashSet<OperationId> = HashSet::new();
            for &id in &frontier {
                for dependency in self.graph.dependencies(id) {
                    if !remaining.contains(&dependency) || queued.contains(&dependency) {
                        continue;
                    }
                    let ready = self
                        .graph
                        .consumers(dependency)
                        .iter()
                        .all(|consumer| !remaining.contains(consumer));
                    if ready {
                        next.push(dependency);
                        queued.insert(dependency);
                    }
                }
            }
            frontier = next;
        }

        let nodes_per_depth: Vec<usize> = levels.iter().map(Vec::len).collect();
        BuildPlan {
            depth: levels.len(),
            max_width: nodes_per_depth.iter().copied().max().unwrap_or(0),
            nodes_per_depth,
            levels,
        }
    }

    /// Log the plan's headline numbers and per-level membership at debug
    /// level.
    pub fn log_plan(&self, plan: &BuildPlan) {
        debug!("Build plan depth (deepest dependency tree): {}", plan.depth);
        debug!("Build plan width (maximum parallelism): {}", plan.max_width);
        debug!(
            "Nodes per depth: {}",
            plan.nodes_per_depth
                .iter()
                .rev()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        for (level_index, level) in plan.levels.iter().enumerate() {
            debug!(
                "Plan @ depth {} has {} nodes:",
                plan.levels.len() - 1 - level_index,
                level.len()
            );
            for &id in level {
                debug!("- {}", self.graph.operation(id).runner.name);
            }
        }
    }

    /// Render the waterfall chart plus the per-cluster report.
    ///
    /// Each operation gets a row placed after its latest dependency, tagged
    /// with its cluster index; each cluster gets a block listing its
    /// out-of-cluster dependencies, the cache-disabled reasons that caused
    /// the grouping, and its members.
    #[must_use]
    pub fn render_cluster_report(
        &self,
        clusters: &[Cluster],
        cluster_builder: &ClusterBuilder<'_>,
    ) -> String {
        let mut cluster_index_by_operation: HashMap<OperationId, usize> = HashMap::new();
        for (index, cluster) in clusters.iter().enumerate() {
            for &id in &cluster.operations {
                cluster_index_by_operation.insert(id, index);
            }
        }

        // Execution order: roots (no dependencies) first, BFS along
        // consumers, no-ops skipped.
        let mut execution_plan: Vec<OperationId> = Vec::new();
        let mut seen: HashSet<OperationId> = HashSet::new();
        let mut queue: VecDeque<OperationId> = self
            .graph
            .ids()
            .into_iter()
            .filter(|&id| self.graph.dependencies(id).is_empty())
            .collect();
        while let Some(id) = queue.pop_front() {
            if seen.insert(id) {
                if !self.graph.operation(id).runner.is_no_op {
                    execution_plan.push(id);
                }
                for consumer in self.graph.consumers(id) {
                    if !seen.contains(&consumer) {
                        queue.push_back(consumer);
                    }
                }
            }
        }

        // Waterfall spacing: one column past the latest dependency.
        let mut spacing: HashMap<OperationId, usize> = HashMap::new();
        for &id in &execution_plan {
            let offset = self
                .graph
                .dependencies(id)
                .iter()
                .filter_map(|dependency| spacing.get(dependency).map(|s| s + 1))
                .max()
                .unwrap_or(0);
            spacing.insert(id, offset);
        }
        execution_plan.sort_by_key(|id| (spacing[id], self.graph.operation(*id).name.clone()));

        let name_width = execution_plan
            .iter()
            .map(|&id| self.graph.operation(id).runner.name.len())
            .max()
            .unwrap_or(1);

        let mut report = String::new();
        let rule = "#".repeat(50);
        let _ = writeln!(report, "{rule}");
        for &id in &execution_plan {
            let operation = self.graph.operation(id);
            let _ = writeln!(
                report,
                "{:>width$}: {}({})",
                operation.runner.name,
                "-".repeat(spacing[&id]),
                cluster_index_by_operation.get(&id).copied().unwrap_or(0),
                width = name_width + 1
            );
        }
        let _ = writeln!(report, "{rule}");

        for (index, cluster) in clusters.iter().enumerate() {
            let members: HashSet<OperationId> = cluster.operations.iter().copied().collect();
            let mut all_dependencies: HashSet<OperationId> = HashSet::new();
            for &id in &cluster.operations {
                all_dependencies.extend(self.graph.dependencies(id));
            }

            let mut external: Vec<String> = all_dependencies
                .iter()
                .filter(|id| !members.contains(id))
                .map(|&id| {
                    let operation = self.graph.operation(id);
                    format!(
                        "{} ({})",
                        operation.project.package_name, operation.phase_name
                    )
                })
                .collect();
            external.sort();
            external.dedup();

            let mut reasons: Vec<String> = all_dependencies
                .iter()
                .filter_map(|&id| {
                    cluster_builder.disabled_reason(id).map(|reason| {
                        format!(
                            "  - ({}) \"{}\"",
                            self.graph.operation(id).runner.name,
                            reason
                        )
                    })
                })
                .collect();
            reasons.sort();

            let _ = writeln!(report, "Cluster {index}:");
            let _ = writeln!(
                report,
                "- Dependencies: {}",
                if external.is_empty() {
                    "none".to_string()
                } else {
                    external.join(", ")
                }
            );
            let _ = writeln!(
                report,
                "- Clustered by:\n{}",
                if reasons.is_empty() {
                    "  - none".to_string()
                } else {
                    reasons.join("\n")
                }
            );
            let members_line = cluster
                .operations
                .iter()
                .map(|&id| {
                    let operation = self.graph.operation(id);
                    if operation.runner.is_no_op {
                        format!("{} [SKIPPED]", operation.runner.name)
                    } else {
                        operation.runner.name.clone()
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(report, "- Operations: {members_line}");
            let _ = writeln!(report, "{}", "-".repeat(50));
        }
        let _ = writeln!(report, "{rule}");
        report
    }
}

//! Shared fixtures for unit and integration tests.
//!
//! Available to integration tests through the `test-utils` feature.

use crate::config::{OperationSettings, ProjectConfig};
use crate::coordinator::{ExecutionRecord, PassContext, PassHooks};
use crate::graph::{
    Operation, OperationGraph, OperationId, OperationStatus, ProjectRef, RunnerInfo,
};
use crate::hashing::ChangeAnalyzer;
use crate::metadata::{MetadataStore, OperationMetadata};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::RwLock;

/// A [`ChangeAnalyzer`] backed by fixed maps instead of a repository.
///
/// Every project resolves to a deterministic single-file hash map unless an
/// explicit map was configured, so two analyzers always agree. Hashes can be
/// swapped mid-test to simulate edited inputs between passes.
pub struct FixtureChangeAnalyzer {
    project_hashes: RwLock<HashMap<String, BTreeMap<String, String>>>,
    glob_hashes: RwLock<BTreeMap<String, String>>,
    no_vcs_root: bool,
}

impl FixtureChangeAnalyzer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            project_hashes: RwLock::new(HashMap::new()),
            glob_hashes: RwLock::new(BTreeMap::new()),
            no_vcs_root: false,
        }
    }

    /// Behave as if the workspace has no version-control root.
    #[must_use]
    pub fn without_vcs_root(mut self) -> Self {
        self.no_vcs_root = true;
        self
    }

    /// Record a hash returned by [`ChangeAnalyzer::glob_hashes`].
    #[must_use]
    pub fn with_glob_hash(self, path: impl Into<String>, hash: impl Into<String>) -> Self {
        self.glob_hashes
            .write()
            .unwrap()
            .insert(path.into(), hash.into());
        self
    }

    /// Pin a project's tracked-file hashes.
    #[must_use]
    pub fn with_project_hashes(
        self,
        package: impl Into<String>,
        hashes: BTreeMap<String, String>,
    ) -> Self {
        self.project_hashes
            .write()
            .unwrap()
            .insert(package.into(), hashes);
        self
    }

    /// Replace a project's hashes mid-test, simulating an edited input.
    pub fn set_project_hashes(&self, package: impl Into<String>, hashes: BTreeMap<String, String>) {
        self.project_hashes
            .write()
            .unwrap()
            .insert(package.into(), hashes);
    }
}

impl Default for FixtureChangeAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeAnalyzer for FixtureChangeAnalyzer {
    async fn file_hashes(
        &self,
        project: &ProjectRef,
    ) -> Result<Option<BTreeMap<String, String>>> {
        if self.no_vcs_root {
            return Ok(None);
        }
        let configured = self
            .project_hashes
            .read()
            .unwrap()
            .get(&project.package_name)
            .cloned();
        Ok(Some(configured.unwrap_or_else(|| {
            BTreeMap::from([(
                "src/index.ts".to_string(),
                format!("hash-of-{}", project.package_name),
            )])
        })))
    }

    async fn glob_hashes(
        &self,
        _patterns: &[String],
        _root: &Path,
    ) -> Result<BTreeMap<String, String>> {
        Ok(self.glob_hashes.read().unwrap().clone())
    }
}

/// A [`MetadataStore`] over a shared map.
pub struct InMemoryMetadataStore {
    entries: DashMap<String, OperationMetadata>,
}

impl InMemoryMetadataStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Names of the operations with saved metadata.
    #[must_use]
    pub fn saved_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn save(&self, operation_name: &str, metadata: &OperationMetadata) -> Result<()> {
        self.entries
            .insert(operation_name.to_string(), metadata.clone());
        Ok(())
    }

    async fn try_restore(&self, operation_name: &str) -> Result<Option<OperationMetadata>> {
        Ok(self.entries.get(operation_name).map(|e| e.value().clone()))
    }
}

/// A [`ProjectConfig`] with one settings block.
#[must_use]
pub fn project_config(phase: &str, output_folders: &[&str]) -> ProjectConfig {
    let mut config = ProjectConfig::default();
    config.operation_settings_by_name.insert(
        phase.to_string(),
        OperationSettings {
            output_folder_names: output_folders.iter().map(ToString::to_string).collect(),
            ..OperationSettings::default()
        },
    );
    config
}

/// A cacheable build operation for `package` at `packages/<package>`.
#[must_use]
pub fn build_operation(package: &str) -> Operation {
    Operation::new(
        ProjectRef::new(package, format!("packages/{package}")),
        "build",
        RunnerInfo::cacheable(format!("{package} (build)"), "cfg"),
    )
}

/// A chain of build operations: each package depends on the previous one.
#[must_use]
pub fn chain_graph(packages: &[&str]) -> OperationGraph {
    let mut graph = OperationGraph::new();
    let mut previous: Option<OperationId> = None;
    for &package in packages {
        let id = graph.add_operation(build_operation(package));
        if let Some(dependency) = previous {
            graph.add_dependency(id, dependency);
        }
        previous = Some(id);
    }
    graph
}

/// A diamond: `top` depends on both middle packages, which depend on `base`.
#[must_use]
pub fn diamond_graph(base: &str, left: &str, right: &str, top: &str) -> OperationGraph {
    let mut graph = OperationGraph::new();
    let base = graph.add_operation(build_operation(base));
    let left = graph.add_operation(build_operation(left));
    let right = graph.add_operation(build_operation(right));
    let top = graph.add_operation(build_operation(top));
    graph.add_dependency(left, base);
    graph.add_dependency(right, base);
    graph.add_dependency(top, left);
    graph.add_dependency(top, right);
    graph
}

/// Drives a [`PassHooks`] pipeline over a graph the way the execution engine
/// would: before-all, then each operation in dependency order (before-one,
/// simulated execution, after-one), then after-all.
pub struct PassDriver<'g> {
    graph: &'g OperationGraph,
    /// Status an operation reports when it actually executes. Defaults to
    /// [`OperationStatus::Success`].
    planned_statuses: HashMap<OperationId, OperationStatus>,
}

impl<'g> PassDriver<'g> {
    #[must_use]
    pub fn new(graph: &'g OperationGraph) -> Self {
        Self {
            graph,
            planned_statuses: HashMap::new(),
        }
    }

    /// Plan the status an operation reports if it executes locally.
    #[must_use]
    pub fn with_status(mut self, id: OperationId, status: OperationStatus) -> Self {
        self.planned_statuses.insert(id, status);
        self
    }

    /// Run one full pass and return every operation's final status.
    pub async fn run(
        &self,
        hooks: &PassHooks,
        pass: &PassContext,
    ) -> Result<HashMap<OperationId, OperationStatus>> {
        let mut records: Vec<ExecutionRecord> = self
            .graph
            .ids()
            .into_iter()
            .map(ExecutionRecord::new)
            .collect();
        hooks.run_before_all(&records, pass).await?;

        for &id in &self.topological_order() {
            let record = records
                .iter_mut()
                .find(|record| record.operation == id)
                .expect("record exists for every graph operation");

            if self.graph.operation(id).runner.is_no_op {
                record.status = OperationStatus::NoOp;
            } else if let Some(overridden) = hooks.run_before_one(record).await? {
                record.status = overridden;
            } else {
                record.status = self
                    .planned_statuses
                    .get(&id)
                    .copied()
                    .unwrap_or(OperationStatus::Success);
                record.duration_seconds = 1.0;
            }
            hooks.run_after_one(record).await?;
        }

        hooks.run_after_all().await?;
        Ok(records
            .into_iter()
            .map(|record| (record.operation, record.status))
            .collect())
    }

    fn topological_order(&self) -> Vec<OperationId> {
        let mut order = Vec::new();
        let mut done: HashSet<OperationId> = HashSet::new();
        let mut remaining: Vec<OperationId> = self.graph.ids();
        while !remaining.is_empty() {
            let ready: Vec<OperationId> = remaining
                .iter()
                .copied()
                .filter(|&id| {
                    self.graph
                        .dependencies(id)
                        .iter()
                        .all(|dep| done.contains(dep))
                })
                .collect();
            assert!(!ready.is_empty(), "operation graph contains a cycle");
            for id in &ready {
                done.insert(*id);
                order.push(*id);
            }
            remaining.retain(|id| !done.contains(id));
        }
        order
    }
}

//! Shared fixtures: a workspace bundling the stores several simulated agents
//! share, plus agent construction helpers.

#![allow(dead_code)]

use cairn::cache::{CacheStore, InMemoryCacheStore};
use cairn::config::{BuildCacheConfig, CobuildConfig, ProjectConfig};
use cairn::coordinator::{CoordinatorOptions, OperationCacheCoordinator, PassContext, PassHooks};
use cairn::graph::OperationGraph;
use cairn::hashing::ChangeAnalyzer;
use cairn::lock::{InMemoryLeaseStore, LeaseStore};
use cairn::metadata::MetadataStore;
use cairn::test_utils::{FixtureChangeAnalyzer, InMemoryMetadataStore, build_operation, project_config};
use std::collections::HashMap;
use std::sync::{Arc, Once};
use tempfile::TempDir;

static TRACING: Once = Once::new();

/// Honor `RUST_LOG` in test output. Safe to call from every test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// One coordinator wired into its own hook pipeline.
pub struct Agent {
    pub coordinator: Arc<OperationCacheCoordinator>,
    pub hooks: PassHooks,
}

/// The state all agents of one logical build share.
pub struct TestWorkspace {
    pub graph: Arc<OperationGraph>,
    pub cache_store: Arc<InMemoryCacheStore>,
    pub lease_store: Arc<InMemoryLeaseStore>,
    pub metadata_store: Arc<InMemoryMetadataStore>,
    pub analyzer: Arc<FixtureChangeAnalyzer>,
    pub temp: TempDir,
}

impl TestWorkspace {
    pub fn new(graph: OperationGraph) -> Self {
        init_tracing();
        Self {
            graph: Arc::new(graph),
            cache_store: Arc::new(InMemoryCacheStore::new()),
            lease_store: Arc::new(InMemoryLeaseStore::new()),
            metadata_store: Arc::new(InMemoryMetadataStore::new()),
            analyzer: Arc::new(FixtureChangeAnalyzer::new()),
            temp: TempDir::new().unwrap(),
        }
    }

    /// One build/dist settings block per package in the graph.
    pub fn default_project_configs(&self) -> HashMap<String, ProjectConfig> {
        self.graph
            .ids()
            .into_iter()
            .map(|id| self.graph.operation(id).project.package_name.clone())
            .map(|package| (package, project_config("build", &["dist"])))
            .collect()
    }

    pub fn agent(&self, cobuild: Option<CobuildConfig>) -> Agent {
        self.agent_with_configs(cobuild, self.default_project_configs())
    }

    pub fn agent_with_configs(
        &self,
        cobuild: Option<CobuildConfig>,
        project_configs: HashMap<String, ProjectConfig>,
    ) -> Agent {
        let log_folder = match &cobuild {
            Some(config) => self.temp.path().join(format!("logs-{}", config.runner_id)),
            None => self.temp.path().join("logs"),
        };
        let coordinator = Arc::new(OperationCacheCoordinator::new(CoordinatorOptions {
            graph: Arc::clone(&self.graph),
            build_cache_config: BuildCacheConfig::default(),
            cobuild_config: cobuild,
            project_configs,
            analyzer: Arc::clone(&self.analyzer) as Arc<dyn ChangeAnalyzer>,
            cache_store: Arc::clone(&self.cache_store) as Arc<dyn CacheStore>,
            lease_store: Arc::clone(&self.lease_store) as Arc<dyn LeaseStore>,
            metadata_store: Arc::clone(&self.metadata_store) as Arc<dyn MetadataStore>,
            workspace_root: self.temp.path().to_path_buf(),
            log_folder,
        }));
        let mut hooks = PassHooks::new();
        coordinator.attach(&mut hooks);
        Agent { coordinator, hooks }
    }
}

/// A graph of `build` operations, with `deps` as `(consumer, dependency)`
/// package-name pairs.
pub fn build_graph(packages: &[&str], deps: &[(&str, &str)]) -> OperationGraph {
    let mut graph = OperationGraph::new();
    for &package in packages {
        graph.add_operation(build_operation(package));
    }
    for &(consumer, dependency) in deps {
        let from = graph.get(&format!("{consumer}#build")).unwrap();
        let to = graph.get(&format!("{dependency}#build")).unwrap();
        graph.add_dependency(from, to);
    }
    graph
}

/// Cobuild settings for one agent within the shared `ctx` context.
pub fn cobuild(runner_id: &str) -> CobuildConfig {
    CobuildConfig {
        enabled: true,
        context_id: Some("ctx".into()),
        runner_id: runner_id.into(),
        ..CobuildConfig::default()
    }
}

/// An initial, incremental-allowed pass with an empty environment snapshot.
pub fn initial_pass() -> PassContext {
    PassContext::new(true, true).with_env(Default::default())
}

//! The cache/cobuild coordinator driving an execution pass.
//!
//! [`OperationCacheCoordinator`] owns the per-operation coordination state
//! for one pass and plugs into the engine's [`PassHooks`] pipeline:
//!
//! * before-all: derive cache-key inputs for every schedulable operation
//!   concurrently, compute the cluster partition, and assign cluster ids.
//! * before-one: build the operation's cache object lazily, attempt restores
//!   (published cobuild state first), and race for cluster ownership.
//! * after-one, primary tap: persist metadata, write the cache entry, publish
//!   the cluster's completed state, and tear down lock and log resources.
//! * after-one, suppression tap: revoke consumers' write permission when an
//!   operation was skipped or lost its own write permission.
//! * after-all: drop all per-operation state.
//!
//! The coordinator never blocks an operation on another agent: losing the
//! ownership race reports the operation as remotely executing and moves on.

use crate::cache::{
    BuildCacheParams, CacheStore, OperationBuildCache, build_additional_context, log_only_context,
};
use crate::cluster::ClusterBuilder;
use crate::config::{BuildCacheConfig, CobuildConfig, ProjectConfig};
use crate::core::CairnError;
use crate::graph::{Operation, OperationGraph, OperationId, OperationStatus};
use crate::hashing::ChangeAnalyzer;
use crate::lock::{CobuildLock, CompletedState, LeaseStore};
use crate::logfile::{CacheLogWriter, log_file_paths};
use crate::metadata::{MetadataStore, OperationMetadata};
use crate::plan::BuildPlanAnalyzer;
use anyhow::{Context, Result};
use dashmap::DashMap;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, warn};

mod context;
mod hooks;

pub use context::CacheKeyContext;
pub use hooks::{
    AfterAllHandler, AfterOneHandler, BeforeAllHandler, BeforeOneHandler, ExecutionRecord,
    PassContext, PassHooks,
};

/// How many operations have their cache-key inputs derived at once.
const PREPARE_CONCURRENCY: usize = 10;

/// Collaborators and configuration for an [`OperationCacheCoordinator`].
pub struct CoordinatorOptions {
    /// The pass's operation graph.
    pub graph: Arc<OperationGraph>,
    /// Workspace-wide cache settings.
    pub build_cache_config: BuildCacheConfig,
    /// Cobuild settings, absent when the feature is not configured.
    pub cobuild_config: Option<CobuildConfig>,
    /// Per-project cache configuration, keyed by package name.
    pub project_configs: HashMap<String, ProjectConfig>,
    /// Content-hashing collaborator.
    pub analyzer: Arc<dyn ChangeAnalyzer>,
    /// Cache entry backend.
    pub cache_store: Arc<dyn CacheStore>,
    /// Shared lease/state backend for cobuild coordination.
    pub lease_store: Arc<dyn LeaseStore>,
    /// Execution metadata backend.
    pub metadata_store: Arc<dyn MetadataStore>,
    /// Workspace root; project folders are resolved against it.
    pub workspace_root: PathBuf,
    /// Folder receiving per-operation cache log files.
    pub log_folder: PathBuf,
}

/// Coordinates build-cache restores/writes and cobuild ownership for the
/// operations of one graph.
pub struct OperationCacheCoordinator {
    graph: Arc<OperationGraph>,
    build_cache_config: BuildCacheConfig,
    cobuild_config: Option<CobuildConfig>,
    project_configs: HashMap<String, ProjectConfig>,
    analyzer: Arc<dyn ChangeAnalyzer>,
    cache_store: Arc<dyn CacheStore>,
    lease_store: Arc<dyn LeaseStore>,
    metadata_store: Arc<dyn MetadataStore>,
    workspace_root: PathBuf,
    log_folder: PathBuf,
    contexts: DashMap<OperationId, Arc<Mutex<CacheKeyContext>>>,
    env: RwLock<BTreeMap<String, String>>,
}

impl OperationCacheCoordinator {
    /// Create a coordinator. No work happens until the before-all phase.
    #[must_use]
    pub fn new(options: CoordinatorOptions) -> Self {
        Self {
            graph: options.graph,
            build_cache_config: options.build_cache_config,
            cobuild_config: options.cobuild_config,
            project_configs: options.project_configs,
            analyzer: options.analyzer,
            cache_store: options.cache_store,
            lease_store: options.lease_store,
            metadata_store: options.metadata_store,
            workspace_root: options.workspace_root,
            log_folder: options.log_folder,
            contexts: DashMap::new(),
            env: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register this coordinator's five taps on `hooks`.
    ///
    /// The suppression tap registers after the primary cache tap so that it
    /// observes any status rewrite (a failed cache write downgrading success
    /// to success-with-warnings).
    pub fn attach(self: &Arc<Self>, hooks: &mut PassHooks) {
        let coordinator = Arc::clone(self);
        hooks.on_before_all(
            "build-cache-setup",
            Box::new(move |records, pass| {
                let coordinator = Arc::clone(&coordinator);
                Box::pin(async move { coordinator.before_all(records, pass).await })
            }),
        );

        let coordinator = Arc::clone(self);
        hooks.on_before_one(
            "build-cache-restore",
            Box::new(move |record| {
                let coordinator = Arc::clone(&coordinator);
                Box::pin(async move { coordinator.before_one(record).await })
            }),
        );

        let coordinator = Arc::clone(self);
        hooks.on_after_one(
            "build-cache-write",
            Box::new(move |record| {
                let coordinator = Arc::clone(&coordinator);
                Box::pin(async move { coordinator.after_one(record).await })
            }),
        );

        let coordinator = Arc::clone(self);
        hooks.on_after_one(
            "cache-write-suppression",
            Box::new(move |record| {
                let coordinator = Arc::clone(&coordinator);
                Box::pin(async move { coordinator.suppress_consumer_writes(record).await })
            }),
        );

        let coordinator = Arc::clone(self);
        hooks.on_after_all(
            "build-cache-teardown",
            Box::new(move || {
                let coordinator = Arc::clone(&coordinator);
                Box::pin(async move { coordinator.after_all().await })
            }),
        );
    }

    /// Per-operation context, if the before-all phase created one.
    #[must_use]
    pub fn context(&self, id: OperationId) -> Option<Arc<Mutex<CacheKeyContext>>> {
        self.contexts.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Before-all phase: derive cache-key inputs for every schedulable
    /// operation, then cluster and report.
    pub async fn before_all(
        &self,
        records: &[ExecutionRecord],
        pass: &PassContext,
    ) -> Result<()> {
        *self.env.write().expect("env snapshot poisoned") = pass.env.clone();
        self.contexts.clear();

        // Detach the ids from the records before streaming; borrowing the
        // slice inside the stream runs afoul of the handler's lifetime bound.
        let ids: Vec<OperationId> = records.iter().map(|record| record.operation).collect();
        let prepared: Vec<(OperationId, CacheKeyContext)> = stream::iter(ids)
            .map(|id| self.prepare_context(id, pass))
            .buffer_unordered(PREPARE_CONCURRENCY)
            .try_collect()
            .await?;
        for (id, context) in prepared {
            self.contexts.insert(id, Arc::new(Mutex::new(context)));
        }

        if self.cobuild_config.as_ref().is_some_and(|c| c.enabled) {
            self.cluster_and_report().await?;
        }
        Ok(())
    }

    async fn prepare_context(
        &self,
        id: OperationId,
        pass: &PassContext,
    ) -> Result<(OperationId, CacheKeyContext)> {
        let operation = self.graph.operation(id);
        let file_hashes = self
            .analyzer
            .file_hashes(&operation.project)
            .await
            .with_context(|| format!("failed to hash inputs of '{}'", operation.name))?;
        let Some(file_hashes) = file_hashes else {
            return Err(CairnError::configuration(format!(
                "the build cache requires a supported version-control root, \
                 but none was found for project '{}'",
                operation.project.package_name
            ))
            .into());
        };

        let project_config = self.project_configs.get(&operation.project.package_name);
        let cache_disabled_reason = match project_config {
            Some(config) => config.cache_disabled_reason(&operation.phase_name),
            None => Some(format!(
                "project '{}' does not have a build cache configuration",
                operation.project.package_name
            )),
        };
        let operation_settings = project_config
            .and_then(|config| config.operation_settings(&operation.phase_name))
            .cloned();
        let renewal_interval = self
            .cobuild_config
            .as_ref()
            .map_or(std::time::Duration::from_secs(10), |c| c.renewal_interval());

        Ok((
            id,
            CacheKeyContext::new(
                pass.is_incremental_allowed,
                pass.is_initial,
                cache_disabled_reason,
                operation_settings,
                file_hashes,
                renewal_interval,
            ),
        ))
    }

    async fn cluster_and_report(&self) -> Result<()> {
        // Snapshot first; shard guards must not be held across awaits.
        let snapshot: Vec<(OperationId, Arc<Mutex<CacheKeyContext>>)> = self
            .contexts
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        let mut builder = ClusterBuilder::new(&self.graph);
        for (id, context) in snapshot {
            if let Some(reason) = context.lock().await.cache_disabled_reason.clone() {
                builder.mark_cache_disabled(id, reason);
            }
        }

        let context_id = self
            .cobuild_config
            .as_ref()
            .and_then(|c| c.context_id.as_deref());
        let clusters = builder.build(context_id)?;
        if context_id.is_some() {
            for cluster in &clusters {
                let Some(cluster_id) = &cluster.id else { continue };
                for &id in &cluster.operations {
                    if let Some(context) = self.context(id) {
                        context.lock().await.cobuild_cluster_id = Some(cluster_id.clone());
                    }
                }
            }
        }

        let analyzer = BuildPlanAnalyzer::new(&self.graph);
        let plan = analyzer.analyze();
        analyzer.log_plan(&plan);
        for line in analyzer.render_cluster_report(&clusters, &builder).lines() {
            debug!("{line}");
        }
        Ok(())
    }

    /// Before-one phase: attempt restores and race for cluster ownership.
    ///
    /// Returns a status override when the operation should not execute
    /// locally: a restore succeeded, or another agent owns the cluster.
    pub async fn before_one(
        &self,
        record: &ExecutionRecord,
    ) -> Result<Option<OperationStatus>> {
        if self.contexts.is_empty() {
            return Ok(None);
        }
        let operation = self.graph.operation(record.operation);
        if !operation.runner.cacheable {
            return Ok(None);
        }
        let Some(context) = self.context(record.operation) else {
            return Ok(None);
        };
        let mut context = context.lock().await;

        let outcome = self.run_before_one(record, operation, &mut context).await;
        if outcome.is_err()
            && let Some(writer) = context.log_writer.as_mut()
        {
            let _ = writer.close().await;
        }
        outcome
    }

    async fn run_before_one(
        &self,
        record: &ExecutionRecord,
        operation: &Operation,
        context: &mut CacheKeyContext,
    ) -> Result<Option<OperationStatus>> {
        if self.build_cache_config.enabled
            && !operation.runner.silent
            && context.log_writer.is_none()
        {
            context.log_writer =
                Some(CacheLogWriter::open(&self.log_folder, &operation.name).await?);
        }

        self.ensure_build_cache(operation, context).await?;

        let cobuild = self.cobuild_config.as_ref().filter(|c| c.is_active());
        if let Some(cobuild) = cobuild {
            if cobuild.leaf_log_only_allowed
                && context.build_cache.is_none()
                && self.graph.consumers(record.operation).is_empty()
            {
                self.ensure_log_only_cache(operation, context, cobuild).await?;
                if context.build_cache.is_some() {
                    debug!(operation = %operation.name, "leaf operation gets a log-files-only cache entry");
                } else {
                    warn!(operation = %operation.name, "log-files-only cache entry could not be created");
                }
            }
            self.ensure_cobuild_lock(operation, context, cobuild)?;
        }

        // Restore precedence: a peer's published completed state wins over
        // local incremental settings; otherwise a plain restore, at most one
        // attempt per operation when racing under a lock.
        if let Some(lock) = context.cobuild_lock.clone() {
            if let Some(state) = lock.completed_state().await? {
                if self
                    .try_restore(operation, context, Some(&state.cache_id))
                    .await?
                {
                    debug!(
                        operation = %operation.name,
                        status = %state.status,
                        "restored from a cobuild peer's published cache entry"
                    );
                    return Ok(Some(state.status));
                }
            } else if !context.is_cache_read_attempted
                && context.is_cache_read_allowed
                && self.try_restore(operation, context, None).await?
            {
                return Ok(Some(OperationStatus::FromCache));
            }
        } else if context.is_cache_read_allowed
            && self.try_restore(operation, context, None).await?
        {
            return Ok(Some(OperationStatus::FromCache));
        }

        if context.is_cache_write_allowed
            && let Some(lock) = context.cobuild_lock.clone()
        {
            if lock.try_acquire().await? {
                let renew_lock = Arc::clone(&lock);
                context.periodic_renewal.start(move || {
                    let lock = Arc::clone(&renew_lock);
                    async move {
                        lock.renew().await;
                    }
                });
            } else {
                if let Some(writer) = context.log_writer.as_mut() {
                    let _ = writer.close().await;
                }
                return Ok(Some(OperationStatus::RemoteExecuting));
            }
        }

        Ok(None)
    }

    async fn ensure_build_cache(
        &self,
        operation: &Operation,
        context: &mut CacheKeyContext,
    ) -> Result<()> {
        if context.build_cache.is_some() || !self.build_cache_config.enabled {
            return Ok(());
        }
        if let Some(reason) = &context.cache_disabled_reason {
            debug!(operation = %operation.name, %reason, "build cache disabled");
            return Ok(());
        }
        // A missing settings block always yields a disabled reason, so this
        // cannot fail once the reason check has passed.
        let Some(settings) = context.operation_settings.clone() else {
            return Ok(());
        };

        let env = self.env.read().expect("env snapshot poisoned").clone();
        let project_folder = self
            .workspace_root
            .join(&operation.project.project_relative_folder);
        let additional_context =
            build_additional_context(&settings, self.analyzer.as_ref(), &project_folder, &env)
                .await?;

        context.build_cache = Some(Arc::new(OperationBuildCache::new(BuildCacheParams {
            project: operation.project.clone(),
            phase_name: operation.phase_name.clone(),
            config_hash: operation.runner.config_hash.clone(),
            output_folder_names: settings.output_folder_names.clone(),
            file_hashes: context.file_hashes.clone(),
            additional_context,
            store: Arc::clone(&self.cache_store),
        })));
        Ok(())
    }

    async fn ensure_log_only_cache(
        &self,
        operation: &Operation,
        context: &mut CacheKeyContext,
        cobuild: &CobuildConfig,
    ) -> Result<()> {
        let mut additional_context = match context.operation_settings.clone() {
            Some(settings) => {
                let env = self.env.read().expect("env snapshot poisoned").clone();
                let project_folder = self
                    .workspace_root
                    .join(&operation.project.project_relative_folder);
                build_additional_context(
                    &settings,
                    self.analyzer.as_ref(),
                    &project_folder,
                    &env,
                )
                .await?
            }
            None => BTreeMap::new(),
        };
        additional_context.extend(log_only_context(cobuild));

        let output_folder_names = context
            .operation_settings
            .as_ref()
            .map(|settings| settings.output_folder_names.clone())
            .unwrap_or_default();

        context.build_cache = Some(Arc::new(OperationBuildCache::new(BuildCacheParams {
            project: operation.project.clone(),
            phase_name: operation.phase_name.clone(),
            config_hash: operation.runner.config_hash.clone(),
            output_folder_names,
            file_hashes: context.file_hashes.clone(),
            additional_context,
            store: Arc::clone(&self.cache_store),
        })));
        Ok(())
    }

    fn ensure_cobuild_lock(
        &self,
        operation: &Operation,
        context: &mut CacheKeyContext,
        cobuild: &CobuildConfig,
    ) -> Result<()> {
        if context.cobuild_lock.is_some() {
            return Ok(());
        }
        let Some(cache) = &context.build_cache else {
            return Ok(());
        };
        let Some(context_id) = &cobuild.context_id else {
            return Ok(());
        };
        let Some(cluster_id) = &context.cobuild_cluster_id else {
            return Err(CairnError::invariant(format!(
                "no cluster id was assigned for operation '{}'",
                operation.name
            ))
            .into());
        };
        context.cobuild_lock = Some(Arc::new(CobuildLock::new(
            context_id.as_str(),
            cobuild.runner_id.as_str(),
            cluster_id.as_str(),
            cache.cache_id(),
            cobuild.lease_duration(),
            Arc::clone(&self.lease_store),
        )));
        Ok(())
    }

    async fn try_restore(
        &self,
        operation: &Operation,
        context: &mut CacheKeyContext,
        override_id: Option<&str>,
    ) -> Result<bool> {
        context.is_cache_read_attempted = true;
        let Some(cache) = context.build_cache.clone() else {
            return Ok(false);
        };
        let restored = cache.try_restore(override_id).await?;
        if restored {
            context.cache_restored = true;
            if let Some(metadata) = self.metadata_store.try_restore(&operation.name).await? {
                debug!(
                    operation = %operation.name,
                    original_duration = metadata.duration_seconds,
                    "restored execution metadata"
                );
            }
            if let Some(writer) = context.log_writer.as_mut() {
                writer
                    .write_line(&format!("Restored '{}' from the build cache.", operation.name))
                    .await?;
            }
        }
        Ok(restored)
    }

    /// After-one phase, primary tap: metadata, cache write, completed-state
    /// publication, and resource teardown.
    ///
    /// A failed cache write never fails the build; a successful status is
    /// downgraded to success-with-warnings instead. Lock renewal stops and
    /// the log writer closes on every path.
    pub async fn after_one(&self, record: &mut ExecutionRecord) -> Result<()> {
        let operation = self.graph.operation(record.operation);
        if !operation.runner.cacheable {
            return Ok(());
        }
        if matches!(
            record.status,
            OperationStatus::NoOp | OperationStatus::RemoteExecuting
        ) {
            return Ok(());
        }
        let Some(context) = self.context(record.operation) else {
            return Ok(());
        };
        let mut context = context.lock().await;

        let outcome = self.run_after_one(record, operation, &mut context).await;

        if let Some(writer) = context.log_writer.as_mut() {
            let _ = writer.close().await;
        }
        context.periodic_renewal.stop();
        if let Some(lock) = &context.cobuild_lock {
            lock.release();
        }
        outcome
    }

    async fn run_after_one(
        &self,
        record: &mut ExecutionRecord,
        operation: &Operation,
        context: &mut CacheKeyContext,
    ) -> Result<()> {
        if !context.cache_restored && record.status != OperationStatus::Skipped {
            let (log_path, error_log_path) = log_file_paths(&self.log_folder, &operation.name);
            let metadata = OperationMetadata {
                duration_seconds: record.duration_seconds,
                cobuild_context_id: context
                    .cobuild_lock
                    .as_ref()
                    .map(|lock| lock.context_id().to_string()),
                cobuild_runner_id: context
                    .cobuild_lock
                    .as_ref()
                    .map(|lock| lock.runner_id().to_string()),
                log_path: Some(log_path),
                error_log_path: Some(error_log_path),
            };
            self.metadata_store.save(&operation.name, &metadata).await?;
        }

        let mut final_cache_id: Option<String> = None;
        let mut completed_state: Option<CompletedState> = None;
        if context.is_cache_write_allowed
            && let Some(lock) = &context.cobuild_lock
            && lock.owns_lease()
        {
            let qualified = match record.status {
                OperationStatus::Failure => {
                    format!("{}-{}-failed", lock.cache_id(), lock.context_id())
                }
                OperationStatus::SuccessWithWarning if !operation.runner.warnings_allowed => {
                    format!("{}-{}-warnings", lock.cache_id(), lock.context_id())
                }
                _ => lock.cache_id().to_string(),
            };
            if matches!(
                record.status,
                OperationStatus::Success
                    | OperationStatus::SuccessWithWarning
                    | OperationStatus::Failure
            ) {
                completed_state = Some(CompletedState {
                    status: record.status,
                    cache_id: qualified.clone(),
                });
                final_cache_id = Some(qualified);
            }
        }

        let build_successful = record.status == OperationStatus::Success
            || (record.status == OperationStatus::SuccessWithWarning
                && operation.runner.warnings_allowed
                && self.build_cache_config.allow_warnings_in_successful_build);

        // A lost lease makes every write for the cluster unsafe: another
        // agent may already own it and be producing its own entry.
        let lease_intact = context
            .cobuild_lock
            .as_ref()
            .is_none_or(|lock| lock.owns_lease());

        if !context.cache_restored
            && context.is_cache_write_allowed
            && lease_intact
            && (final_cache_id.is_some() || build_successful)
            && let Some(cache) = context.build_cache.clone()
        {
            let written = match cache.try_set(final_cache_id.as_deref()).await {
                Ok(written) => written,
                Err(error) => {
                    warn!(
                        operation = %operation.name,
                        %error,
                        "cache write failed"
                    );
                    false
                }
            };
            if written {
                // The entry must land before the state is published, or a
                // peer could observe a completed state whose cache id does
                // not exist yet.
                if let (Some(state), Some(lock)) = (&completed_state, &context.cobuild_lock) {
                    lock.set_completed_state(state).await?;
                }
            } else if record.status == OperationStatus::Success {
                record.status = OperationStatus::SuccessWithWarning;
                warn!(
                    operation = %operation.name,
                    "cache write failed; reporting success with warnings"
                );
                if let Some(writer) = context.log_writer.as_mut() {
                    writer
                        .write_line("The build cache entry could not be written.")
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// After-one phase, suppression tap: an operation that was skipped, or
    /// whose own cache write was disallowed, poisons its direct consumers'
    /// write permission. Runs after the primary tap so that status rewrites
    /// are already visible.
    pub async fn suppress_consumer_writes(&self, record: &ExecutionRecord) -> Result<()> {
        let mut block = record.status == OperationStatus::Skipped;
        if !block {
            block = match self.context(record.operation) {
                Some(context) => !context.lock().await.is_cache_write_allowed,
                None => true,
            };
        }

        if block {
            for consumer in self.graph.consumers(record.operation) {
                if let Some(context) = self.context(consumer) {
                    let mut context = context.lock().await;
                    if context.is_cache_write_allowed {
                        debug!(
                            operation = %self.graph.operation(consumer).name,
                            upstream = %self.graph.operation(record.operation).name,
                            "revoking cache write permission"
                        );
                        context.is_cache_write_allowed = false;
                    }
                }
            }
        }
        Ok(())
    }

    /// After-all phase: drop all per-operation state. Renewal timers stop on
    /// drop, so an abandoned pass cannot leak renewal loops.
    pub async fn after_all(&self) -> Result<()> {
        self.contexts.clear();
        Ok(())
    }
}

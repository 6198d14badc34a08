//! Per-operation build cache objects and cache-key derivation.
//!
//! A cache key addresses one operation's stored outputs. It is a SHA-256
//! digest over everything that determines those outputs: the runner's config
//! hash, the project and phase identity, the content hashes of the project's
//! tracked files, the declared output folders, and an "additional context"
//! map that folds in non-file-system state - declared environment-variable
//! values and content hashes of declared out-of-tree files. All maps are
//! sorted before hashing so the key is independent of discovery order.

use crate::cluster::HASH_DELIMITER;
use crate::config::{CobuildConfig, OperationSettings};
use crate::graph::ProjectRef;
use crate::hashing::ChangeAnalyzer;
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

mod store;

pub use store::{CacheStore, InMemoryCacheStore};

/// Inputs for constructing an [`OperationBuildCache`].
pub struct BuildCacheParams {
    /// Owning project.
    pub project: ProjectRef,
    /// Phase name, part of the key.
    pub phase_name: String,
    /// Hash of the runner configuration/command line.
    pub config_hash: String,
    /// Folders whose contents the cache entry captures.
    pub output_folder_names: Vec<String>,
    /// Content hashes of the project's tracked files.
    pub file_hashes: BTreeMap<String, String>,
    /// Extra key inputs: env values and out-of-tree file hashes.
    pub additional_context: BTreeMap<String, String>,
    /// Backend reached for restores and writes.
    pub store: Arc<dyn CacheStore>,
}

/// The build cache object for one operation, with its derived cache id.
pub struct OperationBuildCache {
    project: ProjectRef,
    phase_name: String,
    output_folder_names: Vec<String>,
    cache_id: String,
    store: Arc<dyn CacheStore>,
}

impl OperationBuildCache {
    /// Derive the cache id and build the cache object.
    #[must_use]
    pub fn new(params: BuildCacheParams) -> Self {
        let BuildCacheParams {
            project,
            phase_name,
            config_hash,
            output_folder_names,
            file_hashes,
            additional_context,
            store,
        } = params;

        let mut hasher = Sha256::new();
        for field in [&project.package_name, &phase_name, &config_hash] {
            hasher.update(field.as_bytes());
            hasher.update(HASH_DELIMITER.as_bytes());
        }
        for (path, hash) in &file_hashes {
            hasher.update(path.as_bytes());
            hasher.update(HASH_DELIMITER.as_bytes());
            hasher.update(hash.as_bytes());
            hasher.update(HASH_DELIMITER.as_bytes());
        }
        for (key, value) in &additional_context {
            hasher.update(key.as_bytes());
            hasher.update(HASH_DELIMITER.as_bytes());
            hasher.update(value.as_bytes());
            hasher.update(HASH_DELIMITER.as_bytes());
        }
        for folder in &output_folder_names {
            hasher.update(folder.as_bytes());
            hasher.update(HASH_DELIMITER.as_bytes());
        }
        let cache_id = hex::encode(hasher.finalize());

        Self {
            project,
            phase_name,
            output_folder_names,
            cache_id,
            store,
        }
    }

    /// The derived cache id.
    #[must_use]
    pub fn cache_id(&self) -> &str {
        &self.cache_id
    }

    /// The folders captured by this cache entry.
    #[must_use]
    pub fn output_folder_names(&self) -> &[String] {
        &self.output_folder_names
    }

    /// Attempt a restore, of `override_id` when given (used when a cobuild
    /// peer published a status-qualified id), otherwise of the derived id.
    pub async fn try_restore(&self, override_id: Option<&str>) -> Result<bool> {
        let cache_id = override_id.unwrap_or(&self.cache_id);
        let restored = self
            .store
            .try_restore(cache_id)
            .await
            .with_context(|| format!("cache restore failed for '{cache_id}'"))?;
        debug!(
            project = %self.project.package_name,
            phase = %self.phase_name,
            %cache_id,
            restored,
            "cache restore attempt"
        );
        Ok(restored)
    }

    /// Attempt to write the current outputs, under `override_id` when given.
    pub async fn try_set(&self, override_id: Option<&str>) -> Result<bool> {
        let cache_id = override_id.unwrap_or(&self.cache_id);
        let written = self
            .store
            .try_set(cache_id)
            .await
            .with_context(|| format!("cache write failed for '{cache_id}'"))?;
        debug!(
            project = %self.project.package_name,
            phase = %self.phase_name,
            %cache_id,
            written,
            "cache write attempt"
        );
        Ok(written)
    }
}

/// Assemble the additional-context map for an operation's cache key.
///
/// Declared environment variables contribute `$VAR -> value` entries (missing
/// variables contribute the empty string, so un-setting a variable changes
/// the key). Declared additional files contribute `file://<path> -> <hash>`
/// entries via the hashing collaborator's glob API, letting out-of-tree
/// inputs participate in the key.
pub async fn build_additional_context(
    settings: &OperationSettings,
    analyzer: &dyn ChangeAnalyzer,
    project_folder: &Path,
    env: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let mut context = BTreeMap::new();

    for name in &settings.depends_on_env_vars {
        let value = env.get(name).cloned().unwrap_or_default();
        context.insert(format!("${name}"), value);
    }

    if !settings.depends_on_additional_files.is_empty() {
        let hashes = analyzer
            .glob_hashes(&settings.depends_on_additional_files, project_folder)
            .await
            .context("failed to hash additional cache-key files")?;
        debug!(
            files = ?hashes.keys().collect::<Vec<_>>(),
            "including additional files in the cache key"
        );
        for (path, hash) in hashes {
            context.insert(format!("file://{path}"), hash);
        }
    }

    Ok(context)
}

/// Additional-context entries marking a log-files-only cache entry, used for
/// leaf operations that have no project cache of their own so that at least
/// their logs are shareable between cobuild agents.
#[must_use]
pub fn log_only_context(cobuild: &CobuildConfig) -> BTreeMap<String, String> {
    let mut context = BTreeMap::new();
    context.insert("logFilesOnly".to_string(), "1".to_string());
    if let Some(context_id) = &cobuild.context_id {
        context.insert("cobuildContextId".to_string(), context_id.clone());
    }
    context
}

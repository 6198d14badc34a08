//! Operation metadata persistence.
//!
//! When an operation's output is restored from cache, downstream reporting
//! still wants the original timing and log locations. The metadata store
//! keeps that small record per operation; it travels with the cache entry in
//! a full deployment, so a restore can bring it back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Execution metadata persisted alongside an operation's cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMetadata {
    /// Wall-clock duration of the original execution.
    pub duration_seconds: f64,
    /// Cobuild context the original execution ran under, if any.
    pub cobuild_context_id: Option<String>,
    /// Runner id of the agent that originally executed the operation.
    pub cobuild_runner_id: Option<String>,
    /// Path of the operation's log file.
    pub log_path: Option<PathBuf>,
    /// Path of the operation's error log file.
    pub error_log_path: Option<PathBuf>,
}

/// Save/restore interface for [`OperationMetadata`].
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Persist metadata for `operation_name`.
    async fn save(&self, operation_name: &str, metadata: &OperationMetadata) -> Result<()>;

    /// Restore previously saved metadata, if any.
    async fn try_restore(&self, operation_name: &str) -> Result<Option<OperationMetadata>>;
}

/// File-backed [`MetadataStore`]: one JSON sidecar per operation under a
/// state folder.
pub struct FsMetadataStore {
    root: PathBuf,
}

impl FsMetadataStore {
    /// Create a store rooted at `root`. The folder is created lazily on the
    /// first save.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, operation_name: &str) -> PathBuf {
        // Operation names contain '#'; keep filenames portable.
        let file_name: String = operation_name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(format!("{file_name}.metadata.json"))
    }
}

#[async_trait]
impl MetadataStore for FsMetadataStore {
    async fn save(&self, operation_name: &str, metadata: &OperationMetadata) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to create {}", self.root.display()))?;
        let path = self.path_for(operation_name);
        let contents = serde_json::to_vec_pretty(metadata)?;
        tokio::fs::write(&path, contents)
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }

    async fn try_restore(&self, operation_name: &str) -> Result<Option<OperationMetadata>> {
        let path = self.path_for(operation_name);
        match tokio::fs::read(&path).await {
            Ok(contents) => {
                let metadata = serde_json::from_slice(&contents)
                    .with_context(|| format!("malformed metadata file {}", path.display()))?;
                Ok(Some(metadata))
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => {
                Err(error).with_context(|| format!("failed to read {}", path.display()))
            }
        }
    }
}

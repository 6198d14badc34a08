//! The content-hashing collaborator seam.
//!
//! Computing tracked-file hashes belongs to the host orchestrator (usually by
//! asking the version-control system); this crate only consumes the results.
//! [`hash_globs`] is provided for implementations that need to hash
//! out-of-tree files declared as extra cache-key inputs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

use crate::graph::ProjectRef;

/// Computes content hashes over a project's inputs.
#[async_trait]
pub trait ChangeAnalyzer: Send + Sync {
    /// Content hashes of the project's tracked files, keyed by
    /// project-relative path.
    ///
    /// Returns `None` when the workspace has no supported version-control
    /// root; the coordinator turns that into a pass-fatal configuration
    /// error.
    async fn file_hashes(
        &self,
        project: &ProjectRef,
    ) -> Result<Option<BTreeMap<String, String>>>;

    /// Content hashes of the files matching `patterns` under `root`, keyed
    /// by root-relative path.
    async fn glob_hashes(
        &self,
        patterns: &[String],
        root: &Path,
    ) -> Result<BTreeMap<String, String>>;
}

/// Hash the files matching `patterns` (relative to `root`) with SHA-256.
///
/// Matches are keyed by their root-relative path so the result is stable
/// across machines. Directories are skipped.
pub fn hash_globs(patterns: &[String], root: &Path) -> Result<BTreeMap<String, String>> {
    let mut hashes = BTreeMap::new();
    for pattern in patterns {
        let full_pattern = root.join(pattern);
        let full_pattern = full_pattern
            .to_str()
            .with_context(|| format!("non-UTF-8 glob pattern under {}", root.display()))?;
        for entry in glob::glob(full_pattern)
            .with_context(|| format!("invalid glob pattern '{pattern}'"))?
        {
            let path = entry.context("failed to read glob match")?;
            if !path.is_file() {
                continue;
            }
            let contents = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let digest = hex::encode(Sha256::digest(&contents));
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            hashes.insert(relative, digest);
        }
    }
    Ok(hashes)
}

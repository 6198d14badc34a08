//! Per-operation cache log files.
//!
//! The host orchestrator owns the real terminal collation and log-splitting
//! machinery; the cache subsystem only needs a small writer for its own
//! `*.cache.log` file that can be closed from guaranteed-cleanup paths.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// The `(log, error log)` paths for an operation's cache log files.
#[must_use]
pub fn log_file_paths(log_folder: &Path, operation_name: &str) -> (PathBuf, PathBuf) {
    let stem = sanitize(operation_name);
    (
        log_folder.join(format!("{stem}.cache.log")),
        log_folder.join(format!("{stem}.cache.error.log")),
    )
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Append-style writer for an operation's cache log.
pub struct CacheLogWriter {
    path: PathBuf,
    file: Option<File>,
}

impl CacheLogWriter {
    /// Create the log folder if needed and open the log file for writing.
    pub async fn open(log_folder: &Path, operation_name: &str) -> Result<Self> {
        tokio::fs::create_dir_all(log_folder)
            .await
            .with_context(|| format!("failed to create {}", log_folder.display()))?;
        let (path, _) = log_file_paths(log_folder, operation_name);
        let file = File::create(&path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the writer is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Write one line. Lines written after close are discarded.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }
        Ok(())
    }

    /// Flush and close the file. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        Ok(())
    }
}

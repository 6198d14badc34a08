//! Error types for cache and cobuild coordination.
//!
//! Most async seams in this crate return [`anyhow::Result`] with context
//! attached at each layer; the typed [`CairnError`] enum exists for the
//! failure modes callers genuinely branch on. Use
//! [`CairnError::configuration`] and [`CairnError::invariant`] rather than
//! constructing variants by hand.

use thiserror::Error;

/// The main error type for cache and cobuild coordination failures.
///
/// Lock acquisition failure and lease renewal failure are deliberately *not*
/// variants here: neither is an error. A lost acquisition race means another
/// agent owns the cluster and the operation becomes remotely-executing; a
/// failed renewal flags the lease as lost so later writes are skipped.
#[derive(Debug, Error)]
pub enum CairnError {
    /// The workspace is not set up for caching. Fatal to the pass and
    /// surfaced to the user with the message as-is.
    #[error("configuration error: {message}")]
    Configuration {
        /// User-facing description of the misconfiguration.
        message: String,
    },

    /// A coordinator invariant was broken. This indicates a bug in the
    /// orchestration logic, not a user mistake.
    #[error("internal error: {message}")]
    InvariantViolation {
        /// Description of the broken invariant, for bug reports.
        message: String,
    },

    /// A cache entry write was rejected or the store was unreachable.
    ///
    /// Recovered locally: the coordinator downgrades a successful operation
    /// to success-with-warnings instead of failing the build.
    #[error("cache write failed for '{cache_id}': {reason}")]
    CacheWrite {
        /// The cache id whose write failed.
        cache_id: String,
        /// Store-provided reason, if any.
        reason: String,
    },

    /// A configuration file could not be parsed.
    #[error("invalid configuration file {path}: {reason}")]
    ConfigParse {
        /// Path of the offending file.
        path: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// I/O error from the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error, typically from the completed-state or
    /// metadata records.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CairnError {
    /// Build a [`CairnError::Configuration`] from any displayable message.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Build a [`CairnError::InvariantViolation`] from any displayable message.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }
}

//! Per-operation coordination state.

use crate::cache::OperationBuildCache;
use crate::config::OperationSettings;
use crate::lock::{CobuildLock, PeriodicRenewal};
use crate::logfile::CacheLogWriter;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Everything the coordinator tracks for one operation across a pass.
///
/// A context is created in the before-all phase for every schedulable
/// operation and lives until the after-all phase clears the map. The two
/// permission flags start from the pass-level settings; `is_cache_write_allowed`
/// may be revoked later by the write-suppression tap when an upstream
/// operation is skipped or itself loses write permission.
pub struct CacheKeyContext {
    /// Whether restores may be attempted for this operation.
    pub is_cache_read_allowed: bool,
    /// Whether this operation's outputs may be written to the cache.
    pub is_cache_write_allowed: bool,
    /// Why caching is structurally impossible, if it is. Feeds clustering.
    pub cache_disabled_reason: Option<String>,
    /// The project's settings block for this phase, if declared.
    pub operation_settings: Option<OperationSettings>,
    /// Content hashes of the project's tracked files.
    pub file_hashes: BTreeMap<String, String>,
    /// Lazily constructed build cache object.
    pub build_cache: Option<Arc<OperationBuildCache>>,
    /// The cluster id assigned during clustering, cobuild runs only.
    pub cobuild_cluster_id: Option<String>,
    /// Lazily constructed lock over the operation's cluster.
    pub cobuild_lock: Option<Arc<CobuildLock>>,
    /// Renewal timer driving the lock's lease while the operation runs.
    pub periodic_renewal: PeriodicRenewal,
    /// Whether this operation's outputs came out of the cache.
    pub cache_restored: bool,
    /// Whether a restore was already attempted, successful or not.
    pub is_cache_read_attempted: bool,
    /// Open cache log file for the operation, if any.
    pub log_writer: Option<CacheLogWriter>,
}

impl CacheKeyContext {
    /// Create the initial context for one operation.
    #[must_use]
    pub fn new(
        is_cache_read_allowed: bool,
        is_cache_write_allowed: bool,
        cache_disabled_reason: Option<String>,
        operation_settings: Option<OperationSettings>,
        file_hashes: BTreeMap<String, String>,
        renewal_interval: Duration,
    ) -> Self {
        Self {
            is_cache_read_allowed,
            is_cache_write_allowed,
            cache_disabled_reason,
            operation_settings,
            file_hashes,
            build_cache: None,
            cobuild_cluster_id: None,
            cobuild_lock: None,
            periodic_renewal: PeriodicRenewal::new(renewal_interval),
            cache_restored: false,
            is_cache_read_attempted: false,
            log_writer: None,
        }
    }
}

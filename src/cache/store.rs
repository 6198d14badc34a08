//! The physical cache storage collaborator.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Get/set interface over the cache backend (local disk, remote blob store).
///
/// Both operations are best-effort booleans: `false` from `try_restore` means
/// "no entry", `false` from `try_set` means "the write was rejected". Errors
/// are reserved for transport faults; callers treat a failed or rejected
/// write as a local degradation, never as a build failure.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Restore the entry addressed by `cache_id` into the workspace.
    async fn try_restore(&self, cache_id: &str) -> Result<bool>;

    /// Store the current outputs under `cache_id`.
    async fn try_set(&self, cache_id: &str) -> Result<bool>;
}

/// In-memory [`CacheStore`] recording every restore and write.
///
/// Supports injected write rejection and write errors so failure handling can
/// be tested without a real backend.
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: Mutex<HashSet<String>>,
    restores: Mutex<Vec<String>>,
    writes: Mutex<Vec<String>>,
    reject_writes: AtomicBool,
    break_writes: AtomicBool,
}

impl InMemoryCacheStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate an entry, as if a previous run had written it.
    pub fn seed(&self, cache_id: impl Into<String>) {
        self.entries.lock().expect("entry set poisoned").insert(cache_id.into());
    }

    /// Whether an entry exists.
    #[must_use]
    pub fn contains(&self, cache_id: &str) -> bool {
        self.entries.lock().expect("entry set poisoned").contains(cache_id)
    }

    /// Every restore attempt, in order.
    #[must_use]
    pub fn restore_log(&self) -> Vec<String> {
        self.restores.lock().expect("restore log poisoned").clone()
    }

    /// Every write attempt, in order.
    #[must_use]
    pub fn write_log(&self) -> Vec<String> {
        self.writes.lock().expect("write log poisoned").clone()
    }

    /// Make subsequent writes return `Ok(false)`.
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Make subsequent writes return an error, simulating an unreachable
    /// backend.
    pub fn break_writes(&self, broken: bool) {
        self.break_writes.store(broken, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn try_restore(&self, cache_id: &str) -> Result<bool> {
        self.restores
            .lock()
            .expect("restore log poisoned")
            .push(cache_id.to_string());
        Ok(self.contains(cache_id))
    }

    async fn try_set(&self, cache_id: &str) -> Result<bool> {
        if self.break_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("cache store unreachable"));
        }
        self.writes
            .lock()
            .expect("write log poisoned")
            .push(cache_id.to_string());
        if self.reject_writes.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.entries
            .lock()
            .expect("entry set poisoned")
            .insert(cache_id.to_string());
        Ok(true)
    }
}

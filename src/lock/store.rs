//! The shared lease/state store collaborator.
//!
//! This is the only resource genuinely shared across agent processes. All
//! mutual exclusion relies on the store's own conditional-write atomicity;
//! no client-side locking coordinates agents.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// An exclusive, time-bounded claim over a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Runner id of the agent holding the lease.
    pub holder: String,
    /// Instant after which the lease counts as abandoned.
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Whether the lease is still live.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Key-value backend with compare-and-swap lease semantics.
///
/// Implementations must make `try_acquire` and `renew` atomic with respect to
/// concurrent callers (in any process): two agents racing `try_acquire` for
/// the same key within one lease window must see exactly one success.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Conditionally write a lease: succeeds only when no live lease exists
    /// for `key`, or the live lease is already held by `holder`.
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool>;

    /// Extend the lease's expiry, only if `holder` still holds a live lease.
    async fn renew(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool>;

    /// Non-blocking read of an opaque state record.
    async fn read(&self, key: &str) -> Result<Option<String>>;

    /// Write an opaque state record.
    async fn write(&self, key: &str, value: String) -> Result<()>;
}

/// In-memory [`LeaseStore`] with real conditional-write semantics.
///
/// The reference implementation: useful for single-process builds, and shared
/// between racing coordinator instances in tests to simulate multiple agents
/// against one backend.
#[derive(Default)]
pub struct InMemoryLeaseStore {
    leases: Mutex<HashMap<String, Lease>>,
    states: Mutex<HashMap<String, String>>,
}

impl InMemoryLeaseStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lease for `key`, live or not. Test observability.
    #[must_use]
    pub fn lease(&self, key: &str) -> Option<Lease> {
        self.leases.lock().expect("lease table poisoned").get(key).cloned()
    }

    /// Force-expire the lease for `key`, simulating an abandoned agent.
    pub fn expire(&self, key: &str) {
        if let Some(lease) = self.leases.lock().expect("lease table poisoned").get_mut(key) {
            lease.expires_at = Utc::now() - chrono::TimeDelta::seconds(1);
        }
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let mut leases = self.leases.lock().expect("lease table poisoned");
        let now = Utc::now();
        if let Some(existing) = leases.get(key)
            && existing.is_live(now)
            && existing.holder != holder
        {
            return Ok(false);
        }
        leases.insert(
            key.to_string(),
            Lease {
                holder: holder.to_string(),
                expires_at: now + chrono::TimeDelta::from_std(ttl)?,
            },
        );
        Ok(true)
    }

    async fn renew(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let mut leases = self.leases.lock().expect("lease table poisoned");
        let now = Utc::now();
        match leases.get_mut(key) {
            Some(lease) if lease.holder == holder && lease.is_live(now) => {
                lease.expires_at = now + chrono::TimeDelta::from_std(ttl)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.states.lock().expect("state table poisoned").get(key).cloned())
    }

    async fn write(&self, key: &str, value: String) -> Result<()> {
        self.states
            .lock()
            .expect("state table poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }
}

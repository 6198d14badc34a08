//! The cobuild distributed-lock protocol.
//!
//! Each cluster of coupled operations is guarded by one [`CobuildLock`]: a
//! leasable, renewable claim stored in the shared [`LeaseStore`]. Agents race
//! `try_acquire` without blocking - the loser treats the cluster as remotely
//! executing and moves on. The winner renews the lease on a fixed interval
//! while the work runs, publishes a [`CompletedState`] when it finishes, and
//! then simply stops renewing: there is no explicit unlock round-trip, so a
//! crashed agent's lease times out on its own and any peer can take over.

use crate::graph::OperationStatus;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

mod renewal;
mod store;

pub use renewal::PeriodicRenewal;
pub use store::{InMemoryLeaseStore, Lease, LeaseStore};

/// Shared record written by the lock holder once a cluster's representative
/// operation finishes. Other agents observing it short-circuit to a restore
/// of `cache_id` instead of rebuilding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedState {
    /// Terminal status the holder reported.
    pub status: OperationStatus,
    /// Cache id the holder wrote, possibly status-qualified (`-failed`,
    /// `-warnings`).
    pub cache_id: String,
}

/// Lifecycle of a cobuild lock, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockLifecycle {
    /// Never acquired, or acquisition lost to another agent.
    Unlocked,
    /// Lease acquired and live.
    Held,
    /// A renewal round-trip is in flight.
    Renewing,
    /// Renewal stopped deliberately; the lease will expire on its own.
    Released,
    /// A renewal failed: the lease was stolen or the store is unreachable.
    /// Ownership can no longer be assumed.
    Expired,
}

/// A leasable, renewable distributed lock over one cluster of operations.
pub struct CobuildLock {
    context_id: String,
    runner_id: String,
    cluster_id: String,
    cache_id: String,
    lease_duration: Duration,
    store: Arc<dyn LeaseStore>,
    lifecycle: Mutex<LockLifecycle>,
    lease_lost: AtomicBool,
}

impl CobuildLock {
    /// Create an unlocked lock for `cluster_id` within the cobuild context.
    ///
    /// `cache_id` is the cache key of the cluster's representative build
    /// cache; it seeds the completed-state record published after execution.
    pub fn new(
        context_id: impl Into<String>,
        runner_id: impl Into<String>,
        cluster_id: impl Into<String>,
        cache_id: impl Into<String>,
        lease_duration: Duration,
        store: Arc<dyn LeaseStore>,
    ) -> Self {
        Self {
            context_id: context_id.into(),
            runner_id: runner_id.into(),
            cluster_id: cluster_id.into(),
            cache_id: cache_id.into(),
            lease_duration,
            store,
            lifecycle: Mutex::new(LockLifecycle::Unlocked),
            lease_lost: AtomicBool::new(false),
        }
    }

    /// The cobuild context this lock belongs to.
    #[must_use]
    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// This agent's runner id.
    #[must_use]
    pub fn runner_id(&self) -> &str {
        &self.runner_id
    }

    /// The cluster this lock guards.
    #[must_use]
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// The unqualified cache id of the cluster's representative cache.
    #[must_use]
    pub fn cache_id(&self) -> &str {
        &self.cache_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> LockLifecycle {
        *self.lifecycle.lock().expect("lock lifecycle poisoned")
    }

    /// Whether this agent may still rely on owning the cluster.
    #[must_use]
    pub fn owns_lease(&self) -> bool {
        !self.lease_lost.load(Ordering::SeqCst)
            && matches!(self.lifecycle(), LockLifecycle::Held | LockLifecycle::Renewing)
    }

    fn lock_key(&self) -> String {
        format!("cobuild:{}:lock:{}", self.context_id, self.cluster_id)
    }

    fn completed_key(&self) -> String {
        format!("cobuild:{}:completed:{}", self.context_id, self.cluster_id)
    }

    /// Attempt a conditional lease write. Never blocks; `Ok(false)` means
    /// another agent owns the cluster and the caller must treat the
    /// operation as remotely executing.
    pub async fn try_acquire(&self) -> Result<bool> {
        let acquired = self
            .store
            .try_acquire(&self.lock_key(), &self.runner_id, self.lease_duration)
            .await
            .context("lease store rejected the acquire request")?;
        if acquired {
            *self.lifecycle.lock().expect("lock lifecycle poisoned") = LockLifecycle::Held;
            debug!(
                cluster = %self.cluster_id,
                runner = %self.runner_id,
                "acquired cobuild lock"
            );
        } else {
            debug!(
                cluster = %self.cluster_id,
                runner = %self.runner_id,
                "cobuild lock held by another agent"
            );
        }
        Ok(acquired)
    }

    /// Extend the lease while the work is still running.
    ///
    /// Returns whether ownership survives. A failed renewal (lease stolen or
    /// store unreachable) permanently marks the lease lost; the caller must
    /// treat all subsequent cache/state writes for this cluster as unsafe.
    /// Never retried.
    pub async fn renew(&self) -> bool {
        {
            let mut lifecycle = self.lifecycle.lock().expect("lock lifecycle poisoned");
            if !matches!(*lifecycle, LockLifecycle::Held | LockLifecycle::Renewing) {
                return false;
            }
            *lifecycle = LockLifecycle::Renewing;
        }
        let renewed = self
            .store
            .renew(&self.lock_key(), &self.runner_id, self.lease_duration)
            .await;
        let mut lifecycle = self.lifecycle.lock().expect("lock lifecycle poisoned");
        match renewed {
            Ok(true) => {
                *lifecycle = LockLifecycle::Held;
                true
            }
            Ok(false) => {
                warn!(
                    cluster = %self.cluster_id,
                    "cobuild lease was stolen or expired; treating it as lost"
                );
                *lifecycle = LockLifecycle::Expired;
                self.lease_lost.store(true, Ordering::SeqCst);
                false
            }
            Err(error) => {
                warn!(
                    cluster = %self.cluster_id,
                    %error,
                    "cobuild lease renewal failed; treating the lease as lost"
                );
                *lifecycle = LockLifecycle::Expired;
                self.lease_lost.store(true, Ordering::SeqCst);
                false
            }
        }
    }

    /// Stop relying on the lease. The lease record itself is left to expire,
    /// which doubles as crash recovery for agents that never reach this call.
    pub fn release(&self) {
        let mut lifecycle = self.lifecycle.lock().expect("lock lifecycle poisoned");
        if matches!(*lifecycle, LockLifecycle::Held | LockLifecycle::Renewing) {
            *lifecycle = LockLifecycle::Released;
        }
    }

    /// Non-blocking read of the cluster's completed state. Usable by any
    /// agent, lock holder or not.
    pub async fn completed_state(&self) -> Result<Option<CompletedState>> {
        let raw = self
            .store
            .read(&self.completed_key())
            .await
            .context("failed to read cobuild completed state")?;
        raw.map(|value| {
            serde_json::from_str(&value).context("malformed cobuild completed state record")
        })
        .transpose()
    }

    /// Publish the cluster's completed state. Called by the lock holder after
    /// the cache entry for `state.cache_id` has been written.
    pub async fn set_completed_state(&self, state: &CompletedState) -> Result<()> {
        let value = serde_json::to_string(state)?;
        self.store
            .write(&self.completed_key(), value)
            .await
            .context("failed to publish cobuild completed state")
    }
}

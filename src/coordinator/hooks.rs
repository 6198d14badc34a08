//! The execution pass hook pipeline.
//!
//! The host execution engine drives a pass through four hook points:
//! before-all, before-one, after-one, and after-all. Subsystems register
//! named taps; taps at one point run strictly in registration order, and the
//! ordering between taps is part of the contract (the cache-write suppression
//! tap must observe the status the primary cache tap may have rewritten).
//!
//! Before-one taps may override the operation's status: the first tap to
//! return one wins and the engine skips local execution.

use crate::graph::{OperationId, OperationStatus};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::collections::BTreeMap;

/// Pass-level settings, fixed for the duration of one pass.
#[derive(Debug, Clone)]
pub struct PassContext {
    /// Whether this is the first pass of the session. Only initial passes
    /// may write cache entries; watch-mode repasses reuse but never publish.
    pub is_initial: bool,
    /// Whether incremental behavior (cache reads) is allowed.
    pub is_incremental_allowed: bool,
    /// Environment snapshot used for cache-key derivation.
    pub env: BTreeMap<String, String>,
}

impl PassContext {
    /// A pass context capturing the current process environment.
    ///
    /// Non-Unicode environment values are captured lossily rather than
    /// panicking; they only ever feed cache-key derivation.
    #[must_use]
    pub fn new(is_initial: bool, is_incremental_allowed: bool) -> Self {
        Self {
            is_initial,
            is_incremental_allowed,
            env: std::env::vars_os()
                .map(|(key, value)| {
                    (
                        key.to_string_lossy().into_owned(),
                        value.to_string_lossy().into_owned(),
                    )
                })
                .collect(),
        }
    }

    /// Replace the environment snapshot, mainly for tests.
    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

/// The engine's record of one operation within a pass.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    /// The operation this record tracks.
    pub operation: OperationId,
    /// Current status; the engine updates it as execution progresses.
    pub status: OperationStatus,
    /// Wall-clock duration of the execution, filled in before after-one.
    pub duration_seconds: f64,
}

impl ExecutionRecord {
    /// A fresh, not-yet-executed record.
    #[must_use]
    pub fn new(operation: OperationId) -> Self {
        Self {
            operation,
            status: OperationStatus::Ready,
            duration_seconds: 0.0,
        }
    }
}

/// Handler invoked once per pass before any operation runs.
pub type BeforeAllHandler = Box<
    dyn for<'a> Fn(&'a [ExecutionRecord], &'a PassContext) -> BoxFuture<'a, Result<()>>
        + Send
        + Sync,
>;

/// Handler invoked before one operation executes. Returning a status skips
/// local execution and reports that status instead.
pub type BeforeOneHandler = Box<
    dyn for<'a> Fn(&'a ExecutionRecord) -> BoxFuture<'a, Result<Option<OperationStatus>>>
        + Send
        + Sync,
>;

/// Handler invoked after one operation finishes. May rewrite the status.
pub type AfterOneHandler =
    Box<dyn for<'a> Fn(&'a mut ExecutionRecord) -> BoxFuture<'a, Result<()>> + Send + Sync>;

/// Handler invoked once per pass after all operations settle.
pub type AfterAllHandler = Box<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Named, ordered taps for the four hook points of a pass.
#[derive(Default)]
pub struct PassHooks {
    before_all: Vec<(&'static str, BeforeAllHandler)>,
    before_one: Vec<(&'static str, BeforeOneHandler)>,
    after_one: Vec<(&'static str, AfterOneHandler)>,
    after_all: Vec<(&'static str, AfterAllHandler)>,
}

impl PassHooks {
    /// An empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a before-all tap.
    pub fn on_before_all(&mut self, name: &'static str, handler: BeforeAllHandler) {
        self.before_all.push((name, handler));
    }

    /// Register a before-one tap.
    pub fn on_before_one(&mut self, name: &'static str, handler: BeforeOneHandler) {
        self.before_one.push((name, handler));
    }

    /// Register an after-one tap. Taps run in registration order.
    pub fn on_after_one(&mut self, name: &'static str, handler: AfterOneHandler) {
        self.after_one.push((name, handler));
    }

    /// Register an after-all tap.
    pub fn on_after_all(&mut self, name: &'static str, handler: AfterAllHandler) {
        self.after_all.push((name, handler));
    }

    /// Run all before-all taps in order. The first error aborts the pass.
    pub async fn run_before_all(
        &self,
        records: &[ExecutionRecord],
        pass: &PassContext,
    ) -> Result<()> {
        for (name, handler) in &self.before_all {
            handler(records, pass)
                .await
                .with_context(|| format!("'{name}' before-all tap failed"))?;
        }
        Ok(())
    }

    /// Run before-one taps in order until one returns a status override.
    pub async fn run_before_one(
        &self,
        record: &ExecutionRecord,
    ) -> Result<Option<OperationStatus>> {
        for (name, handler) in &self.before_one {
            if let Some(status) = handler(record)
                .await
                .with_context(|| format!("'{name}' before-one tap failed"))?
            {
                return Ok(Some(status));
            }
        }
        Ok(None)
    }

    /// Run all after-one taps in order.
    pub async fn run_after_one(&self, record: &mut ExecutionRecord) -> Result<()> {
        for (name, handler) in &self.after_one {
            handler(record)
                .await
                .with_context(|| format!("'{name}' after-one tap failed"))?;
        }
        Ok(())
    }

    /// Run all after-all taps in order.
    pub async fn run_after_all(&self) -> Result<()> {
        for (name, handler) in &self.after_all {
            handler()
                .await
                .with_context(|| format!("'{name}' after-all tap failed"))?;
        }
        Ok(())
    }
}

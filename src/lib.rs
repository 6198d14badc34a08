//! Cairn - build cache and cobuild coordination for monorepo orchestrators
//!
//! Cairn is the caching brain of a monorepo task orchestrator. Given a
//! dependency graph of build operations (one per project/phase), it decides
//! for each operation whether its output can be restored from a
//! content-addressed cache, whether it must be executed locally, and - when
//! several independent build agents cooperate on the same logical build (a
//! "cobuild") - which agent is responsible for producing a given result and
//! how the other agents discover that result without duplicating work.
//!
//! # Architecture Overview
//!
//! The crate is organized around a small set of collaborating pieces:
//!
//! - [`graph`] - the operation graph: projects, phases, runner capabilities,
//!   and the dependency/consumer relationships between operations
//! - [`cluster`] - disjoint-set clustering of operations whose cache
//!   eligibility is coupled, plus deterministic cluster-id derivation
//! - [`lock`] - the cobuild lease protocol: a renewable distributed lock per
//!   cluster plus the shared completed-state record other agents observe
//! - [`cache`] - per-operation build cache objects and cache-key derivation
//! - [`plan`] - build-plan analysis: maximum parallelism, depth layering, and
//!   the waterfall/cluster debug report
//! - [`coordinator`] - the orchestrator that ties everything together through
//!   four ordered lifecycle hooks (before-all, before-one, after-one,
//!   after-all)
//!
//! External machinery stays behind narrow traits: content hashing
//! ([`hashing::ChangeAnalyzer`]), cache storage ([`cache::CacheStore`]), the
//! shared lease/state store ([`lock::LeaseStore`]), and operation metadata
//! persistence ([`metadata::MetadataStore`]). The host execution engine that
//! actually spawns build commands is not part of this crate; it drives the
//! [`coordinator::PassHooks`] pipeline and honors the status overrides
//! the coordinator returns.
//!
//! # Cobuild Model
//!
//! Multiple agents share a lease/state store. For every cluster of coupled
//! operations exactly one agent wins a time-bounded lease and executes the
//! work; the winner publishes a `{status, cache_id}` completed-state record
//! after writing the cache entry, and every other agent restores from that
//! cache id instead of rebuilding. A crashed agent never wedges the build:
//! its lease simply expires and any peer may reacquire it.

// Core functionality modules
pub mod cache;
pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod core;
pub mod graph;
pub mod lock;
pub mod plan;

// Collaborator seams
pub mod hashing;
pub mod metadata;

// Supporting modules
pub mod logfile;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

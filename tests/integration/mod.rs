//! Integration test suite for cairn
//!
//! End-to-end tests that drive the coordinator through the full hook
//! pipeline the way a host execution engine would, with in-memory cache and
//! lease backends shared between simulated agents.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! Tests are organized by functionality area:
//! - **cache_scenarios**: single-agent cache miss/hit/invalidation passes
//! - **clustering**: cache-disabled clustering observed through a full pass
//! - **cobuild_scenarios**: multi-agent races, published completed states,
//!   status-qualified cache ids, and crash recovery

mod common;

mod cache_scenarios;
mod clustering;
mod cobuild_scenarios;

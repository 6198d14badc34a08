//! Core types shared across the crate: the error taxonomy and common
//! result aliases.
//!
//! Cairn distinguishes three classes of failure:
//! - [`CairnError::Configuration`] - the workspace cannot support caching at
//!   all (for example, no supported version-control root for content
//!   hashing). Fatal to the whole pass and surfaced to the user.
//! - [`CairnError::InvariantViolation`] - a coordinator bug (missing cluster
//!   id, missing context lookup). Fatal, surfaced as an internal error.
//! - Everything else is recovered locally: a failed cache write downgrades a
//!   successful operation to "success with warnings", a lost lease simply
//!   disables further cache writes for that cluster, and a failed lock
//!   acquisition is a normal outcome (another agent owns the work).

pub mod error;

pub use error::CairnError;

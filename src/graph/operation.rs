//! Operation identity and runner capability descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal and in-flight states an operation can report to the coordinator.
///
/// The execution engine owns the state machine; the coordinator only reads
/// statuses and, in two cases, overrides them: a successful restore yields
/// [`OperationStatus::FromCache`], and losing the cobuild lease race yields
/// [`OperationStatus::RemoteExecuting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    /// Not yet executed.
    Ready,
    /// The operation completed cleanly.
    Success,
    /// The operation completed but emitted warnings.
    SuccessWithWarning,
    /// The operation failed.
    Failure,
    /// The engine skipped the operation (incremental skip logic). Output
    /// integrity cannot be guaranteed, so dependents must not write cache.
    Skipped,
    /// The operation's output was restored from the build cache.
    FromCache,
    /// The operation has nothing to execute.
    NoOp,
    /// Another cobuild agent owns this operation's cluster; it is not
    /// executed locally and must not fail the build.
    RemoteExecuting,
}

impl OperationStatus {
    /// Whether this status represents a completed, usable output.
    #[must_use]
    pub fn is_success_like(self) -> bool {
        matches!(
            self,
            Self::Success | Self::SuccessWithWarning | Self::FromCache
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ready => "ready",
            Self::Success => "success",
            Self::SuccessWithWarning => "success with warnings",
            Self::Failure => "failure",
            Self::Skipped => "skipped",
            Self::FromCache => "from cache",
            Self::NoOp => "no-op",
            Self::RemoteExecuting => "remote executing",
        };
        write!(f, "{text}")
    }
}

/// The project an operation belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectRef {
    /// Package name, unique within the workspace.
    pub package_name: String,
    /// Folder of the project relative to the workspace root. Participates in
    /// cluster-id hashing, so it must be stable across agents.
    pub project_relative_folder: String,
}

impl ProjectRef {
    /// Create a project reference.
    pub fn new(package_name: impl Into<String>, folder: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            project_relative_folder: folder.into(),
        }
    }
}

/// Capability descriptor for the runner behind an operation.
///
/// Capabilities are modeled as plain flags rather than runner subtypes; the
/// coordinator only ever asks "can this be cached?", "does it produce
/// output?", and so on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerInfo {
    /// Display name of the runner, used in reports and log lines.
    pub name: String,
    /// Whether the runner's output may be cached at all.
    pub cacheable: bool,
    /// Whether the runner produces no console output worth capturing.
    pub silent: bool,
    /// Whether the runner has nothing to execute. No-ops are excluded from
    /// parallelism accounting.
    pub is_no_op: bool,
    /// Whether warnings still count as a successful build for this runner.
    pub warnings_allowed: bool,
    /// Hash of the runner's command/configuration, a cache-key input.
    pub config_hash: String,
}

impl RunnerInfo {
    /// A cacheable runner with the given name and config hash, defaulting to
    /// the common capability set.
    pub fn cacheable(name: impl Into<String>, config_hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cacheable: true,
            silent: false,
            is_no_op: false,
            warnings_allowed: false,
            config_hash: config_hash.into(),
        }
    }

    /// A runner with nothing to execute.
    pub fn no_op(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cacheable: false,
            silent: true,
            is_no_op: true,
            warnings_allowed: false,
            config_hash: String::new(),
        }
    }
}

/// A node in the build graph: one phase of one project.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Stable operation name, conventionally `<package>#<phase>`.
    pub name: String,
    /// Owning project.
    pub project: ProjectRef,
    /// Phase/task name within the project (for example `build` or `test`).
    pub phase_name: String,
    /// Runner capabilities.
    pub runner: RunnerInfo,
}

impl Operation {
    /// Create an operation named `<package>#<phase>`.
    pub fn new(project: ProjectRef, phase_name: impl Into<String>, runner: RunnerInfo) -> Self {
        let phase_name = phase_name.into();
        Self {
            name: format!("{}#{}", project.package_name, phase_name),
            project,
            phase_name,
            runner,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

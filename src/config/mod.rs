//! Build-cache and cobuild configuration.
//!
//! Configuration comes from two levels: workspace-wide settings
//! ([`BuildCacheConfig`], [`CobuildConfig`]) and per-project settings
//! ([`ProjectConfig`]) carrying one [`OperationSettings`] block per phase.
//! Everything deserializes from TOML and is trivially constructible in code.

use crate::core::CairnError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Workspace-wide build cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildCacheConfig {
    /// Master switch for the cache subsystem.
    pub enabled: bool,
    /// Whether a build that succeeded with warnings may still be treated as
    /// successful for cache-write purposes.
    pub allow_warnings_in_successful_build: bool,
}

impl Default for BuildCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_warnings_in_successful_build: false,
        }
    }
}

impl BuildCacheConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        load_toml(path)
    }
}

/// Cobuild (multi-agent) settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CobuildConfig {
    /// Whether cobuild coordination is enabled at all.
    pub enabled: bool,
    /// Identifier shared by all agents cooperating on one logical build.
    /// Cobuild locking is skipped when absent even if `enabled` is set.
    pub context_id: Option<String>,
    /// This agent's identity in the lease store. Defaults to a random UUID
    /// per process.
    pub runner_id: String,
    /// Whether leaf operations without a project cache may get a
    /// log-files-only cache entry so their logs are still shareable.
    pub leaf_log_only_allowed: bool,
    /// Seconds between lease renewals while a lock is held.
    pub renewal_interval_seconds: u64,
}

impl Default for CobuildConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            context_id: None,
            runner_id: uuid::Uuid::new_v4().to_string(),
            leaf_log_only_allowed: false,
            renewal_interval_seconds: 10,
        }
    }
}

impl CobuildConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        load_toml(path)
    }

    /// The renewal interval as a [`Duration`].
    #[must_use]
    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_interval_seconds)
    }

    /// Lease duration: three renewal intervals, so a single missed renewal
    /// does not drop ownership.
    #[must_use]
    pub fn lease_duration(&self) -> Duration {
        self.renewal_interval() * 3
    }

    /// Whether the cobuild feature is actually usable: enabled and carrying
    /// a context id.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.enabled && self.context_id.is_some()
    }
}

/// Per-operation cache settings within a project.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OperationSettings {
    /// Folders (project-relative) captured by the cache entry.
    pub output_folder_names: Vec<String>,
    /// Environment variables whose values participate in the cache key.
    pub depends_on_env_vars: Vec<String>,
    /// Glob patterns (project-relative) of extra files hashed into the key.
    pub depends_on_additional_files: Vec<String>,
    /// Opt this operation out of caching entirely.
    pub disable_build_cache: bool,
}

/// A project's cache configuration: one settings block per phase name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    /// Settings keyed by phase/operation name.
    pub operation_settings_by_name: HashMap<String, OperationSettings>,
}

impl ProjectConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        load_toml(path)
    }

    /// Settings for a phase, if declared.
    #[must_use]
    pub fn operation_settings(&self, phase_name: &str) -> Option<&OperationSettings> {
        self.operation_settings_by_name.get(phase_name)
    }

    /// Why caching is structurally impossible for a phase, if it is.
    ///
    /// `None` means the phase is cacheable. The reasons are user-facing and
    /// show up in the cluster report.
    #[must_use]
    pub fn cache_disabled_reason(&self, phase_name: &str) -> Option<String> {
        let Some(settings) = self.operation_settings(phase_name) else {
            return Some(format!(
                "no build cache settings are defined for the '{phase_name}' operation"
            ));
        };
        if settings.disable_build_cache {
            return Some(format!(
                "caching is disabled for the '{phase_name}' operation by project configuration"
            ));
        }
        if settings.output_folder_names.is_empty() {
            return Some(format!(
                "the '{phase_name}' operation declares no output folders to cache"
            ));
        }
        None
    }
}

fn load_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&contents).map_err(|error| {
        CairnError::ConfigParse {
            path: path.display().to_string(),
            reason: error.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn cobuild_lease_is_three_renewal_intervals() {
        let config = CobuildConfig {
            renewal_interval_seconds: 10,
            ..CobuildConfig::default()
        };
        assert_eq!(config.lease_duration(), Duration::from_secs(30));
    }

    #[test]
    fn cobuild_requires_context_id_to_be_active() {
        let mut config = CobuildConfig {
            enabled: true,
            ..CobuildConfig::default()
        };
        assert!(!config.is_active());
        config.context_id = Some("ctx".into());
        assert!(config.is_active());
    }

    #[test]
    fn disabled_reasons_cover_the_structural_cases() {
        let mut project = ProjectConfig::default();
        assert!(
            project
                .cache_disabled_reason("build")
                .unwrap()
                .contains("no build cache settings")
        );

        project.operation_settings_by_name.insert(
            "build".into(),
            OperationSettings {
                disable_build_cache: true,
                ..OperationSettings::default()
            },
        );
        assert!(
            project
                .cache_disabled_reason("build")
                .unwrap()
                .contains("disabled")
        );

        project.operation_settings_by_name.insert(
            "build".into(),
            OperationSettings::default(),
        );
        assert!(
            project
                .cache_disabled_reason("build")
                .unwrap()
                .contains("no output folders")
        );

        project.operation_settings_by_name.insert(
            "build".into(),
            OperationSettings {
                output_folder_names: vec!["dist".into()],
                ..OperationSettings::default()
            },
        );
        assert_eq!(project.cache_disabled_reason("build"), None);
    }

    #[test]
    fn project_config_parses_from_toml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("project.toml");
        fs::write(
            &path,
            r#"
[operation_settings_by_name.build]
output_folder_names = ["dist", "lib"]
depends_on_env_vars = ["NODE_ENV"]
depends_on_additional_files = ["config/*.json"]

[operation_settings_by_name.test]
disable_build_cache = true
"#,
        )
        .unwrap();

        let config = ProjectConfig::load(&path).unwrap();
        let build = config.operation_settings("build").unwrap();
        assert_eq!(build.output_folder_names, vec!["dist", "lib"]);
        assert_eq!(build.depends_on_env_vars, vec!["NODE_ENV"]);
        assert!(config.cache_disabled_reason("test").is_some());
    }

    #[test]
    fn invalid_toml_reports_the_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.toml");
        fs::write(&path, "not = [valid").unwrap();
        let error = BuildCacheConfig::load(&path).unwrap_err();
        assert!(error.to_string().contains("broken.toml"));
    }
}

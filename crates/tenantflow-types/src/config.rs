//! Controller configuration types.
//!
//! `ControllerConfig` represents the top-level `config.toml` that controls
//! the shared volume, supported engines, deletion policy and engine timeouts.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::workflow::EngineType;

/// Top-level configuration for the controller.
///
/// Loaded from `~/.tenantflow/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Root of the shared volume. Defaults to `<data dir>/volume` when unset.
    #[serde(default)]
    pub shared_volume_path: Option<PathBuf>,

    /// What deleting a terminal workflow does to its record.
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    /// Upper bound for handing a workflow to its engine.
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,

    /// Upper bound for the best-effort engine notification on stop.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Organizations provisioned on startup.
    #[serde(default = "default_organizations")]
    pub default_organizations: Vec<String>,

    /// Supported execution engines.
    #[serde(default = "default_engines")]
    pub engines: Vec<EngineConfig>,
}

fn default_dispatch_timeout_ms() -> u64 {
    10_000
}

fn default_stop_timeout_ms() -> u64 {
    5_000
}

fn default_organizations() -> Vec<String> {
    vec!["default".to_string()]
}

fn default_engines() -> Vec<EngineConfig> {
    ["cwl", "yadage", "serial"]
        .into_iter()
        .map(|name| EngineConfig {
            name: name.to_string(),
            queue: format!("{name}-default-queue"),
            command: None,
        })
        .collect()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            shared_volume_path: None,
            deletion_policy: DeletionPolicy::default(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            default_organizations: default_organizations(),
            engines: default_engines(),
        }
    }
}

impl ControllerConfig {
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Look up the configuration of an engine by type.
    pub fn engine_types(&self) -> Vec<EngineType> {
        self.engines.iter().map(|e| EngineType::new(&e.name)).collect()
    }
}

/// An execution engine the controller may dispatch to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine type accepted in submissions (e.g. "cwl").
    pub name: String,
    /// Queue the engine consumes dispatch requests from.
    pub queue: String,
    /// Command line launched per workflow by the process dispatcher.
    /// Without a command the workflow waits for an external engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Deletion policy for terminal workflows.
///
/// - Hard: the record is removed
/// - Soft: the record is tombstoned and hidden from queries
///
/// The workspace is released under both policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionPolicy {
    #[default]
    Hard,
    Soft,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_config_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.deletion_policy, DeletionPolicy::Hard);
        assert_eq!(config.default_organizations, vec!["default"]);
        assert_eq!(config.stop_timeout(), Duration::from_secs(5));
        let engines: Vec<_> = config.engine_types();
        assert_eq!(
            engines,
            vec![EngineType::new("cwl"), EngineType::new("yadage"), EngineType::new("serial")]
        );
        assert_eq!(config.engines[1].queue, "yadage-default-queue");
    }

    #[test]
    fn test_controller_config_partial_toml() {
        let config: ControllerConfig = toml::from_str(
            r#"
deletion_policy = "soft"
stop_timeout_ms = 250

[[engines]]
name = "cwl"
queue = "cwl-queue"
command = "run-cwl-workflow"
"#,
        )
        .unwrap();
        assert_eq!(config.deletion_policy, DeletionPolicy::Soft);
        assert_eq!(config.stop_timeout_ms, 250);
        assert_eq!(config.dispatch_timeout_ms, 10_000);
        assert_eq!(config.engines.len(), 1);
        assert_eq!(config.engine_types(), vec![EngineType::new("cwl")]);
        assert_eq!(config.engines[0].command.as_deref(), Some("run-cwl-workflow"));
    }
}

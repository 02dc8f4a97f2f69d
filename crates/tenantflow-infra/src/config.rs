//! Controller configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.tenantflow/` in
//! production) and deserializes it into [`ControllerConfig`]. Falls back to
//! defaults when the file is missing or malformed.

use std::path::{Path, PathBuf};

use tenantflow_types::config::ControllerConfig;

/// Environment variable overriding the shared volume root.
pub const SHARED_VOLUME_ENV: &str = "SHARED_VOLUME_PATH";

/// Load configuration from `{data_dir}/config.toml`.
///
/// - Missing file: defaults.
/// - Unreadable or unparsable file: logs a warning and returns defaults.
/// - `SHARED_VOLUME_PATH` overrides `shared_volume_path` in every case.
pub async fn load_controller_config(data_dir: &Path) -> ControllerConfig {
    let config = read_config_file(data_dir).await;
    apply_volume_override(config, std::env::var(SHARED_VOLUME_ENV).ok())
}

async fn read_config_file(data_dir: &Path) -> ControllerConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return ControllerConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return ControllerConfig::default();
        }
    };

    match toml::from_str::<ControllerConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            ControllerConfig::default()
        }
    }
}

fn apply_volume_override(mut config: ControllerConfig, volume: Option<String>) -> ControllerConfig {
    if let Some(volume) = volume.filter(|v| !v.trim().is_empty()) {
        config.shared_volume_path = Some(PathBuf::from(volume));
    }
    config
}

/// Root of the shared volume: configured path or `{data_dir}/volume`.
pub fn volume_root(config: &ControllerConfig, data_dir: &Path) -> PathBuf {
    config
        .shared_volume_path
        .clone()
        .unwrap_or_else(|| data_dir.join("volume"))
}

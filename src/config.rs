use crate::error::{PlangateError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlangateConfig {
    #[serde(default)]
    pub locking: LockingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LockingConfig {
    #[serde(default)]
    pub backend: LockBackendKind,
}

/// Which lock store adapter to construct at startup. Selection happens
/// here, in configuration, never by runtime type inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LockBackendKind {
    /// Record files under the shared data directory.
    #[default]
    Filesystem,
    /// Process-local table; for tests and single-process deployments.
    Memory,
}

impl PlangateConfig {
    pub fn load(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            log::debug!("Config file not found at {config_path:?}, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&config_path).map_err(|e| {
            PlangateError::ConfigFile(format!("Failed to read {}: {e}", config_path.display()))
        })?;
        let config: PlangateConfig = toml::from_str(&contents)
            .map_err(|e| PlangateError::InvalidConfig(format!("Failed to parse config.toml: {e}")))?;

        log::debug!("Loaded config from {config_path:?}");
        Ok(config)
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let config_path = data_dir.join(CONFIG_FILE_NAME);

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PlangateError::ConfigFile(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| PlangateError::InvalidConfig(format!("Failed to serialize config: {e}")))?;

        fs::write(&config_path, contents).map_err(|e| {
            PlangateError::ConfigFile(format!("Failed to write {}: {e}", config_path.display()))
        })?;
        log::debug!("Saved config to {config_path:?}");
        Ok(())
    }
}

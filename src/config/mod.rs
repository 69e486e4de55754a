//! Configuration module
//!
//! Handles loading and managing engine configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine run configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker pool size; 1 means effectively serial
    pub parallelism: usize,

    /// Upper bound, in seconds, on waiting for the pool to drain
    pub await_bound_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: 1,
            await_bound_secs: 86_400,
        }
    }
}

impl EngineConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

        let config: Self = if path
            .as_ref()
            .extension()
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false)
        {
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content).context("Failed to parse JSON config")?
        };

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = if path
            .as_ref()
            .extension()
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false)
        {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Pool size clamped to the contract minimum of 1
    pub fn effective_parallelism(&self) -> usize {
        self.parallelism.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.parallelism, 1);
        assert_eq!(config.await_bound_secs, 86_400);
    }

    #[test]
    fn test_parallelism_clamps_to_one() {
        let config = EngineConfig {
            parallelism: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.effective_parallelism(), 1);
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");

        let config = EngineConfig {
            parallelism: 8,
            await_bound_secs: 600,
        };
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.parallelism, 8);
        assert_eq!(loaded.await_bound_secs, 600);
    }

    #[test]
    fn test_yaml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");

        let config = EngineConfig {
            parallelism: 2,
            await_bound_secs: 30,
        };
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.parallelism, 2);
        assert_eq!(loaded.await_bound_secs, 30);
    }
}

//! Configuration loading and management
//!
//! Handles parsing of `.tick/config.toml`. Every key is optional.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// File name of the configuration inside the `.tick` directory
pub const CONFIG_FILE: &str = "config.toml";

/// Default priority assigned to new tasks
pub const DEFAULT_PRIORITY: u8 = 2;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Prefix for generated task ids (`<prefix>-<hex>`)
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,

    /// Priority for tasks created without an explicit one
    #[serde(default = "default_priority")]
    pub default_priority: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id_prefix: default_id_prefix(),
            default_priority: default_priority(),
        }
    }
}

fn default_id_prefix() -> String {
    "tick".to_string()
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

impl Config {
    /// Load configuration from a `config.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a `.tick` directory, or return defaults
    /// when no config file exists
    pub fn load_from_dir(tick_dir: &Path) -> Result<Self> {
        let config_path = tick_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let prefix = self.id_prefix.trim();
        if prefix.is_empty() {
            return Err(Error::InvalidConfig(
                "id_prefix cannot be empty".to_string(),
            ));
        }
        if prefix.len() > 16 {
            return Err(Error::InvalidConfig(
                "id_prefix must be at most 16 characters".to_string(),
            ));
        }
        if !prefix.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(Error::InvalidConfig(
                "id_prefix must be alphanumeric".to_string(),
            ));
        }
        if self.default_priority > 4 {
            return Err(Error::InvalidConfig(format!(
                "default_priority must be between 0 and 4, got {}",
                self.default_priority
            )));
        }
        Ok(())
    }

    /// Id prefix normalized the way ids are stored
    pub fn prefix(&self) -> String {
        self.id_prefix.trim().to_ascii_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().expect("tempdir");
        let config = Config::load_from_dir(dir.path()).expect("load");
        assert_eq!(config, Config::default());
        assert_eq!(config.prefix(), "tick");
        assert_eq!(config.default_priority, 2);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE), "default_priority = 1\n").expect("write");
        let config = Config::load_from_dir(dir.path()).expect("load");
        assert_eq!(config.id_prefix, "tick");
        assert_eq!(config.default_priority, 1);
    }

    #[test]
    fn rejects_out_of_range_priority() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE), "default_priority = 9\n").expect("write");
        let err = Config::load_from_dir(dir.path()).expect_err("should fail");
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn rejects_non_alphanumeric_prefix() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE), "id_prefix = \"ti-ck\"\n").expect("write");
        let err = Config::load_from_dir(dir.path()).expect_err("should fail");
        assert!(err.to_string().contains("alphanumeric"));
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        let config = Config {
            id_prefix: "proj".to_string(),
            default_priority: 0,
        };
        config.save(&path).expect("save");
        assert_eq!(Config::load(&path).expect("load"), config);
    }
}

//! Configuration file support for segue
//!
//! Reads from .segue/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Routing settings
    #[serde(default)]
    pub routing: RoutingConfig,
}

/// Database-related configuration
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite file. The SEGUE_DB_PATH environment variable
    /// overrides this; when neither is set, "segue.db" in the working
    /// directory is used.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Routing-related configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RoutingConfig {
    /// Campaign key applied when an outbound send names none.
    /// Default: "default"
    #[serde(default = "default_campaign")]
    pub default_campaign: String,

    /// Actor recorded on system-initiated handoffs (owner reconciliation).
    /// Default: "system"
    #[serde(default = "default_actor")]
    pub reconcile_actor: String,
}

fn default_campaign() -> String {
    "default".to_string()
}

fn default_actor() -> String {
    "system".to_string()
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_campaign: default_campaign(),
            reconcile_actor: default_actor(),
        }
    }
}

impl Config {
    /// Load config from .segue/config.toml
    /// Returns default config if file doesn't exist
    pub fn load() -> Self {
        if let Some(path) = Self::find_config_path() {
            if let Ok(contents) = std::fs::read_to_string(&path) {
                if let Ok(config) = toml::from_str(&contents) {
                    return config;
                }
            }
        }
        Self::default()
    }

    /// Find config.toml by walking up directory tree
    fn find_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut dir = current_dir.as_path();

        loop {
            let config_path = dir.join(".segue").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
        None
    }

    /// Effective database path: SEGUE_DB_PATH, then the config file, then
    /// "segue.db".
    pub fn db_path(&self) -> PathBuf {
        if let Ok(path) = std::env::var("SEGUE_DB_PATH") {
            return PathBuf::from(path);
        }
        self.database
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("segue.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.routing.default_campaign, "default");
        assert_eq!(config.routing.reconcile_actor, "system");
        assert!(config.database.path.is_none());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[database]
path = "/var/lib/segue/routing.db"

[routing]
default_campaign = "greek"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.database.path.as_deref(),
            Some(std::path::Path::new("/var/lib/segue/routing.db"))
        );
        assert_eq!(config.routing.default_campaign, "greek");
        assert_eq!(config.routing.reconcile_actor, "system");
    }
}

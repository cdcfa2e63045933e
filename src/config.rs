use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::page::PageLimits;

/// Prefix for environment overrides, e.g. `PAGESCRIPT_PAGE__EXECUTION_TIMEOUT_MS`.
pub const ENV_PREFIX: &str = "PAGESCRIPT_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid configuration value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Configuration for pagescript
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub page: PageLimits,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON file holding the script collection
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("pagescript-scripts.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Entries kept in the console view before the oldest are dropped
    pub max_entries: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self { max_entries: 500 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Defaults, then `file` if given, then environment overrides.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Config = Self::figment(file).extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Create config from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.console.max_entries == 0 {
            return Err(ConfigError::Invalid {
                key: "console.max_entries".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.page.execution_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "page.execution_timeout_ms".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.page.memory_limit_mb == 0 {
            return Err(ConfigError::Invalid {
                key: "page.memory_limit_mb".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

//! Layered file + environment configuration loading.

use std::path::Path;

use thiserror::Error;

use crate::error::{Classified, ErrorKind};

use super::model::Config;

const DEFAULT_CONFIG_PATH: &str = "/etc/cts/config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Classified for ConfigError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Configuration
    }
}

impl Config {
    /// Reads `CTS_CONFIG_FILE` (default `/etc/cts/config.toml`) if it
    /// exists, falling back to defaults; then applies the handful of
    /// environment-variable overrides operators need without editing
    /// the file. Does not validate — call `validate()` explicitly
    /// before use.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CTS_CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let mut config = if Path::new(&path).exists() {
            tracing::info!(path = %path, "loading configuration from file");
            Self::from_file(&path)?
        } else {
            tracing::info!(path = %path, "config file not found, using defaults");
            Config::default()
        };

        if let Ok(address) = std::env::var("CTS_CATALOG_ADDRESS") {
            config.catalog.address = address;
        }
        if let Ok(root) = std::env::var("CTS_WORKING_DIR_ROOT") {
            config.driver.working_dir_root = root;
        }
        if let Ok(level) = std::env::var("CTS_LOG_LEVEL") {
            config.logging.level = level;
        }

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }
}

//! The root configuration value: global settings plus the task list
//! consumed at boot.

use serde::{Deserialize, Serialize};

use crate::task::TaskConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub address: String,
    pub datacenter: Option<String>,
    pub namespace: Option<String>,
    pub wait_timeout_secs: u64,
    pub stale: bool,
    pub tls: Option<TlsConfig>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8500".to_string(),
            datacenter: None,
            namespace: None,
            wait_timeout_secs: 60,
            stale: false,
            tls: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub ca_path: String,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            output: LogOutput::Stdout,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub working_dir_root: String,
    pub engine_binary: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            working_dir_root: "/var/run/cts".to_string(),
            engine_binary: "terraform".to_string(),
        }
    }
}

/// The immutable, validated root of everything the controller needs
/// to boot: consumed by `StateStore::SetTask` for every configured
/// task at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub catalog: CatalogConfig,
    pub logging: LoggingConfig,
    pub driver: DriverConfig,
    pub tasks: Vec<TaskConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig::default(),
            logging: LoggingConfig::default(),
            driver: DriverConfig::default(),
            tasks: Vec::new(),
        }
    }
}

impl Config {
    /// Checks non-empty addresses, positive intervals, buffer-period
    /// invariants, task-name uniqueness, and TLS file existence when
    /// TLS is configured. Never panics; always returns an error
    /// describing what's wrong.
    pub fn validate(&self) -> Result<(), String> {
        if self.catalog.address.trim().is_empty() {
            return Err("catalog.address must not be empty".to_string());
        }
        if self.catalog.wait_timeout_secs == 0 {
            return Err("catalog.wait_timeout_secs must be > 0".to_string());
        }
        if let Some(tls) = &self.catalog.tls {
            validate_file(&tls.ca_path, "catalog.tls.ca_path")?;
            if let Some(cert) = &tls.cert_path {
                validate_file(cert, "catalog.tls.cert_path")?;
            }
            if let Some(key) = &tls.key_path {
                validate_file(key, "catalog.tls.key_path")?;
            }
        }
        if self.driver.working_dir_root.trim().is_empty() {
            return Err("driver.working_dir_root must not be empty".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for task in &self.tasks {
            task.validate()?;
            if !seen.insert(task.name.clone()) {
                return Err(format!("duplicate task name: {}", task.name));
            }
        }
        Ok(())
    }
}

fn validate_file(path: &str, label: &str) -> Result<(), String> {
    if path.trim().is_empty() {
        return Err(format!("{label} must not be empty"));
    }
    if !std::path::Path::new(path).exists() {
        return Err(format!("{label} does not exist: {path}"));
    }
    Ok(())
}

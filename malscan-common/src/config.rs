//! Configuration file loading and environment lookup
//!
//! Resolution priority used throughout malscan:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing config file is not an error: a warning is logged and the
//! compiled defaults apply. A config file that exists but cannot be parsed is
//! a configuration error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "MALSCAN_CONFIG";

/// Logging section of the TOML config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset (e.g. "info", "malscan_engine=debug")
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Results store section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSection {
    pub url: Option<String>,
    pub index: Option<String>,
    pub doc_type: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Name of the store container when the engine provisions it
    pub container_name: Option<String>,
    pub image: Option<String>,
}

/// Container runtime section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSection {
    /// Runtime endpoint, e.g. `tcp://localhost:2375` (diagnostics only)
    pub endpoint: Option<String>,
    /// Path or name of the runtime CLI binary
    pub binary: Option<String>,
    /// Shared volume the sample is copied into
    pub volume: Option<String>,
    /// Mount point of the shared volume inside worker containers
    pub mount_path: Option<String>,
    pub dashboard_name: Option<String>,
    pub dashboard_image: Option<String>,
    pub dashboard_port: Option<u16>,
}

/// Scan limits section (durations in seconds)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSection {
    pub timeout_secs: Option<u64>,
    pub detect_timeout_secs: Option<u64>,
    pub worker_timeout_secs: Option<u64>,
    pub max_concurrent_workers: Option<usize>,
    pub max_file_size: Option<u64>,
    pub start_dashboard: Option<bool>,
}

/// On-disk TOML configuration
///
/// Every field is optional; absent values fall through to environment
/// variables or compiled defaults in the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub scan: ScanSection,
    /// TOML file listing analysis plugins (`[[plugin]]` tables)
    pub plugins_file: Option<PathBuf>,
}

/// Read an environment variable, treating an empty value as unset
pub fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Candidate config file locations for the current platform, in priority order
pub fn config_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("malscan").join("config.toml"));
    }
    if cfg!(unix) {
        candidates.push(PathBuf::from("/etc/malscan/config.toml"));
    }
    candidates
}

/// Load the TOML configuration
///
/// `explicit` (CLI flag) wins over `MALSCAN_CONFIG`, which wins over the
/// platform candidates. An explicitly named file must exist; implicit
/// locations are skipped when missing.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let named = explicit
        .map(Path::to_path_buf)
        .or_else(|| env_var(CONFIG_ENV_VAR).map(PathBuf::from));

    if let Some(path) = named {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return read_toml_config(&path);
    }

    for candidate in config_file_candidates() {
        if candidate.exists() {
            return read_toml_config(&candidate);
        }
    }

    warn!("No config file found, using environment and compiled defaults");
    Ok(TomlConfig::default())
}

/// Parse a TOML config file
pub fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    debug!(path = %path.display(), "Loaded config file");
    Ok(config)
}

//! Configuration resolution for malscan-engine
//!
//! Resolves the engine's runtime configuration once at startup with
//! ENV → TOML → compiled default priority (CLI flags are applied by `main`
//! on top of the result). The resolved [`ScanConfig`] is threaded by value
//! through constructors; nothing reads the environment after startup.

use malscan_common::config::{env_var, TomlConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Default URL of an engine-provisioned results store
pub const LOCAL_STORE_URL: &str = "http://localhost:9200";

pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_DETECT_TIMEOUT: Duration = Duration::from_secs(2 * 60);
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(2 * 60);
pub const DEFAULT_MAX_CONCURRENT_WORKERS: usize = 10;
pub const DEFAULT_MAX_FILE_SIZE: u64 = 512 * 1024 * 1024;

/// Name fragment carried by every execution unit the engine creates
pub const UNIT_NAME_PREFIX: &str = "malice";

/// Results store connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub url: String,
    pub index: String,
    pub doc_type: String,
    pub username: String,
    pub password: String,
    /// Unit name used when the engine provisions the store itself
    pub container_name: String,
    pub image: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: LOCAL_STORE_URL.to_string(),
            index: "malice".to_string(),
            doc_type: "samples".to_string(),
            username: String::new(),
            password: String::new(),
            container_name: "malice-elastic".to_string(),
            image: "malice/elasticsearch:6.8".to_string(),
        }
    }
}

impl StoreConfig {
    /// Resolve from `MALICE_ELASTICSEARCH_*` over the TOML `[store]` section
    pub fn resolve(toml: &TomlConfig) -> Self {
        let defaults = Self::default();
        let section = &toml.store;
        let pick = |env: &str, file: &Option<String>, default: String| {
            env_var(env)
                .or_else(|| file.clone().filter(|v| !v.is_empty()))
                .unwrap_or(default)
        };

        Self {
            url: pick("MALICE_ELASTICSEARCH_URL", &section.url, defaults.url),
            index: pick("MALICE_ELASTICSEARCH_INDEX", &section.index, defaults.index),
            doc_type: pick("MALICE_ELASTICSEARCH_TYPE", &section.doc_type, defaults.doc_type),
            username: pick(
                "MALICE_ELASTICSEARCH_USERNAME",
                &section.username,
                defaults.username,
            ),
            password: pick(
                "MALICE_ELASTICSEARCH_PASSWORD",
                &section.password,
                defaults.password,
            ),
            container_name: section
                .container_name
                .clone()
                .unwrap_or(defaults.container_name),
            image: section.image.clone().unwrap_or(defaults.image),
        }
    }

    /// True when the URL is the local default, meaning the engine must
    /// provision the store unit itself
    pub fn is_local_default(&self) -> bool {
        self.url.trim_end_matches('/').eq_ignore_ascii_case(LOCAL_STORE_URL)
    }
}

/// Optional dashboard unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardConfig {
    pub name: String,
    pub image: String,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            name: "malice-kibana".to_string(),
            image: "malice/kibana:6.8".to_string(),
            port: 443,
        }
    }
}

/// Container runtime settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Runtime endpoint (`DOCKER_HOST`), used for diagnostics only
    pub endpoint: String,
    /// CLI binary driven by the adapter
    pub binary: String,
    /// Shared volume every worker mounts
    pub volume: String,
    /// Mount point of the shared volume inside units
    pub mount_path: String,
    /// Image of the short-lived helper unit used to populate the volume
    pub helper_image: String,
    pub dashboard: DashboardConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            endpoint: "tcp://localhost:2375".to_string(),
            binary: "docker".to_string(),
            volume: "malice".to_string(),
            mount_path: "/malware".to_string(),
            helper_image: "busybox:latest".to_string(),
            dashboard: DashboardConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Resolve from `DOCKER_HOST` over the TOML `[runtime]` section
    pub fn resolve(toml: &TomlConfig) -> Self {
        let defaults = Self::default();
        let section = &toml.runtime;

        Self {
            endpoint: env_var("DOCKER_HOST")
                .or_else(|| section.endpoint.clone())
                .unwrap_or(defaults.endpoint),
            binary: section.binary.clone().unwrap_or(defaults.binary),
            volume: section.volume.clone().unwrap_or(defaults.volume),
            mount_path: section.mount_path.clone().unwrap_or(defaults.mount_path),
            helper_image: defaults.helper_image,
            dashboard: DashboardConfig {
                name: section
                    .dashboard_name
                    .clone()
                    .unwrap_or(defaults.dashboard.name),
                image: section
                    .dashboard_image
                    .clone()
                    .unwrap_or(defaults.dashboard.image),
                port: section.dashboard_port.unwrap_or(defaults.dashboard.port),
            },
        }
    }

    /// Host and port of the runtime endpoint, for log output
    ///
    /// Unix sockets and unparseable endpoints yield `None`.
    pub fn endpoint_host_port(&self) -> Option<(String, u16)> {
        let rest = self
            .endpoint
            .strip_prefix("tcp://")
            .or_else(|| self.endpoint.strip_prefix("http://"))
            .or_else(|| self.endpoint.strip_prefix("https://"))?;
        let authority = rest.split('/').next()?;
        let (host, port) = authority.rsplit_once(':')?;
        if host.is_empty() {
            return None;
        }
        Some((host.to_string(), port.parse().ok()?))
    }
}

/// Time and resource ceilings of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanLimits {
    /// Overall deadline covering every phase of a scan
    pub scan_timeout: Duration,
    /// Content-type detection sub-deadline
    pub detect_timeout: Duration,
    /// Per-worker sub-deadline
    pub worker_timeout: Duration,
    pub max_concurrent_workers: usize,
    pub max_file_size: u64,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            detect_timeout: DEFAULT_DETECT_TIMEOUT,
            worker_timeout: DEFAULT_WORKER_TIMEOUT,
            max_concurrent_workers: DEFAULT_MAX_CONCURRENT_WORKERS,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl ScanLimits {
    pub fn resolve(toml: &TomlConfig) -> Self {
        let defaults = Self::default();
        let section = &toml.scan;
        let secs = |v: Option<u64>, default: Duration| {
            v.filter(|s| *s > 0).map(Duration::from_secs).unwrap_or(default)
        };

        Self {
            scan_timeout: secs(section.timeout_secs, defaults.scan_timeout),
            detect_timeout: secs(section.detect_timeout_secs, defaults.detect_timeout),
            worker_timeout: secs(section.worker_timeout_secs, defaults.worker_timeout),
            // A zero ceiling would never admit anything
            max_concurrent_workers: section
                .max_concurrent_workers
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_workers),
            max_file_size: section.max_file_size.unwrap_or(defaults.max_file_size),
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanConfig {
    pub store: StoreConfig,
    pub runtime: RuntimeConfig,
    pub limits: ScanLimits,
    /// Plugin registry file; `None` selects the built-in plugin set
    pub plugins_file: Option<PathBuf>,
    /// Ensure the dashboard unit before each scan
    pub start_dashboard: bool,
}

impl ScanConfig {
    /// Resolve the full configuration from environment and TOML
    pub fn resolve(toml: &TomlConfig) -> Self {
        let config = Self {
            store: StoreConfig::resolve(toml),
            runtime: RuntimeConfig::resolve(toml),
            limits: ScanLimits::resolve(toml),
            plugins_file: toml.plugins_file.clone(),
            start_dashboard: toml.scan.start_dashboard.unwrap_or(false),
        };
        debug!(
            store_url = %config.store.url,
            index = %config.store.index,
            runtime = %config.runtime.endpoint,
            "Resolved scan configuration"
        );
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_default_url_matches_case_insensitively() {
        let mut store = StoreConfig::default();
        assert!(store.is_local_default());

        store.url = "HTTP://LOCALHOST:9200/".to_string();
        assert!(store.is_local_default());

        store.url = "http://es.internal:9200".to_string();
        assert!(!store.is_local_default());
    }

    #[test]
    fn endpoint_host_port_parsing() {
        let mut runtime = RuntimeConfig::default();
        assert_eq!(
            runtime.endpoint_host_port(),
            Some(("localhost".to_string(), 2375))
        );

        runtime.endpoint = "tcp://192.168.99.100:2376".to_string();
        assert_eq!(
            runtime.endpoint_host_port(),
            Some(("192.168.99.100".to_string(), 2376))
        );

        runtime.endpoint = "unix:///var/run/docker.sock".to_string();
        assert_eq!(runtime.endpoint_host_port(), None);
    }

    #[test]
    fn zero_limits_fall_back_to_defaults() {
        let mut toml = TomlConfig::default();
        toml.scan.max_concurrent_workers = Some(0);
        toml.scan.timeout_secs = Some(0);
        toml.scan.worker_timeout_secs = Some(30);

        let limits = ScanLimits::resolve(&toml);
        assert_eq!(limits.max_concurrent_workers, DEFAULT_MAX_CONCURRENT_WORKERS);
        assert_eq!(limits.scan_timeout, DEFAULT_SCAN_TIMEOUT);
        assert_eq!(limits.worker_timeout, Duration::from_secs(30));
    }
}

//! Execution-unit runtime adapter
//!
//! The orchestrator drives containers only through [`ContainerRuntime`].
//! [`DockerCli`] implements it on top of the `docker` binary; tests supply
//! in-memory fakes.

mod docker_cli;

pub use docker_cli::DockerCli;

use crate::config::{RuntimeConfig, StoreConfig};
use crate::models::{PluginDescriptor, Sample};
use std::collections::BTreeMap;
use thiserror::Error;

/// Alias workers use to reach an engine-provisioned store unit
pub const STORE_LINK_ALIAS: &str = "elasticsearch";

/// Runtime adapter errors
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Daemon unreachable or CLI missing
    #[error("Runtime unavailable: {0}")]
    Unavailable(String),

    #[error("`{command}` exited with {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to parse runtime output: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One execution unit as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDescriptor {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    /// Runtime state, e.g. "running", "exited"
    pub state: String,
}

impl UnitDescriptor {
    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.trim_start_matches('/') == name)
    }

    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }

    pub fn display_name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or(&self.id)
    }
}

/// Host-to-unit port mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBinding {
    pub host: u16,
    pub unit: u16,
}

/// Long-lived infrastructure unit (results store, dashboard)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfraUnit {
    pub name: String,
    pub image: String,
    pub ports: Vec<PortBinding>,
    pub env: BTreeMap<String, String>,
    /// Unit names to link to
    pub links: Vec<String>,
}

impl InfraUnit {
    /// The results store unit
    pub fn store(config: &StoreConfig) -> Self {
        Self {
            name: config.container_name.clone(),
            image: config.image.clone(),
            ports: vec![PortBinding {
                host: 9200,
                unit: 9200,
            }],
            env: BTreeMap::new(),
            links: Vec::new(),
        }
    }

    /// The dashboard unit, linked to the store
    pub fn dashboard(runtime: &RuntimeConfig, store: &StoreConfig) -> Self {
        Self {
            name: runtime.dashboard.name.clone(),
            image: runtime.dashboard.image.clone(),
            ports: vec![PortBinding {
                host: runtime.dashboard.port,
                unit: 443,
            }],
            env: BTreeMap::new(),
            links: vec![store.container_name.clone()],
        }
    }
}

/// Everything needed to run one worker unit to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRun {
    pub plugin: String,
    pub unit_name: String,
    pub image: String,
    pub volume: String,
    pub mount_path: String,
    pub env: BTreeMap<String, String>,
    /// Unit arguments, target last
    pub args: Vec<String>,
    /// `name:alias` link to the store unit
    pub link: Option<String>,
    /// Stream unit output to the log
    pub emit_logs: bool,
}

/// Scan-wide inputs shared by every [`PluginRun`] of one scan
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub scan_id: &'a str,
    pub store: &'a StoreConfig,
    pub runtime: &'a RuntimeConfig,
    /// Store unit provisioned by the engine
    pub store_in_runtime: bool,
    pub emit_logs: bool,
}

impl PluginRun {
    /// Build the run of `plugin` against `target` (a hash for intel workers,
    /// the sample's name in the shared volume otherwise)
    pub fn new(plugin: &PluginDescriptor, target: &str, ctx: RunContext<'_>) -> Self {
        let mut env = BTreeMap::new();
        env.insert("MALICE_SCANID".to_string(), ctx.scan_id.to_string());

        let (store_url, link) = if ctx.store_in_runtime {
            (
                format!("http://{}:9200", STORE_LINK_ALIAS),
                Some(format!("{}:{}", ctx.store.container_name, STORE_LINK_ALIAS)),
            )
        } else {
            (ctx.store.url.clone(), None)
        };
        env.insert("MALICE_ELASTICSEARCH_URL".to_string(), store_url);
        env.insert(
            "MALICE_ELASTICSEARCH_INDEX".to_string(),
            ctx.store.index.clone(),
        );
        if !ctx.store.username.is_empty() {
            env.insert(
                "MALICE_ELASTICSEARCH_USERNAME".to_string(),
                ctx.store.username.clone(),
            );
            env.insert(
                "MALICE_ELASTICSEARCH_PASSWORD".to_string(),
                ctx.store.password.clone(),
            );
        }
        for (key, value) in &plugin.env {
            env.insert(key.clone(), value.clone());
        }

        let mut args = plugin.args.clone();
        args.push("-t".to_string());
        args.push(target.to_string());

        Self {
            plugin: plugin.name.clone(),
            unit_name: plugin.unit_name(ctx.scan_id),
            image: plugin.image.clone(),
            volume: ctx.runtime.volume.clone(),
            mount_path: ctx.runtime.mount_path.clone(),
            env,
            args,
            link,
            emit_logs: ctx.emit_logs,
        }
    }
}

/// Container runtime operations used by the orchestrator
#[async_trait::async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Daemon handshake; returns the server version
    async fn info(&self) -> Result<String, RuntimeError>;

    /// Enumerate units; fails with [`RuntimeError::Unavailable`] when the
    /// daemon cannot be reached
    async fn list_all(&self, include_stopped: bool) -> Result<Vec<UnitDescriptor>, RuntimeError>;

    /// Running unit with exactly this name, if any
    async fn is_running(&self, name: &str) -> Result<Option<UnitDescriptor>, RuntimeError> {
        Ok(self
            .list_all(false)
            .await?
            .into_iter()
            .find(|unit| unit.has_name(name)))
    }

    async fn remove(
        &self,
        id: &str,
        force: bool,
        remove_volumes: bool,
        remove_links: bool,
    ) -> Result<(), RuntimeError>;

    /// Copy the sample into `volume` under its sha256
    async fn copy_to_volume(&self, volume: &str, sample: &Sample) -> Result<(), RuntimeError>;

    /// Ensure an infrastructure unit is running (start or create it)
    async fn start_infra(&self, unit: &InfraUnit) -> Result<(), RuntimeError>;

    /// Run one worker unit to completion
    async fn run_plugin(&self, run: &PluginRun) -> Result<(), RuntimeError>;
}

//! `docker` CLI runtime adapter
//!
//! Each operation spawns the CLI with `tokio::process::Command` and parses
//! `--format '{{json .}}'` output. The CLI resolves its daemon endpoint
//! itself (`DOCKER_HOST` is inherited).

use super::{ContainerRuntime, InfraUnit, PluginRun, RuntimeError, UnitDescriptor};
use crate::config::RuntimeConfig;
use crate::models::Sample;
use serde::Deserialize;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// One line of `docker ps --format '{{json .}}'`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    /// Comma-separated
    names: String,
    image: String,
    #[serde(default)]
    state: String,
}

impl From<PsLine> for UnitDescriptor {
    fn from(line: PsLine) -> Self {
        Self {
            id: line.id,
            names: line
                .names
                .split(',')
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
            image: line.image,
            state: line.state,
        }
    }
}

fn parse_ps_output(stdout: &str) -> Result<Vec<UnitDescriptor>, RuntimeError> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str::<PsLine>(line)
                .map(UnitDescriptor::from)
                .map_err(|e| RuntimeError::Parse(format!("{}: {}", e, line)))
        })
        .collect()
}

/// Runtime adapter driving the `docker` binary
#[derive(Debug, Clone)]
pub struct DockerCli {
    config: RuntimeConfig,
}

impl DockerCli {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Run the CLI and capture its output; a spawn failure means the
    /// runtime itself is unavailable
    async fn output(&self, args: &[String]) -> Result<Output, RuntimeError> {
        debug!(binary = %self.config.binary, args = ?args, "Invoking runtime CLI");
        self.command(args).output().await.map_err(|e| {
            RuntimeError::Unavailable(format!("cannot execute {}: {}", self.config.binary, e))
        })
    }

    /// Like [`Self::output`], mapping a non-zero exit to `CommandFailed`
    async fn run(&self, args: &[String]) -> Result<Output, RuntimeError> {
        let output = self.output(args).await?;
        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: format!("{} {}", self.config.binary, args.join(" ")),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    async fn copy_via_helper(&self, helper: &str, sample: &Sample) -> Result<(), RuntimeError> {
        let destination = format!(
            "{}:{}/{}",
            helper,
            self.config.mount_path.trim_end_matches('/'),
            sample.sha256()
        );
        self.run(&[
            "cp".to_string(),
            sample.path.to_string_lossy().into_owned(),
            destination,
        ])
        .await?;
        Ok(())
    }
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[async_trait::async_trait]
impl ContainerRuntime for DockerCli {
    async fn info(&self) -> Result<String, RuntimeError> {
        let output = self.output(&args(&["version", "--format", "{{.Server.Version}}"])).await?;
        if !output.status.success() {
            return Err(RuntimeError::Unavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn list_all(&self, include_stopped: bool) -> Result<Vec<UnitDescriptor>, RuntimeError> {
        let mut ps = args(&["ps", "--no-trunc", "--format", "{{json .}}"]);
        if include_stopped {
            ps.push("--all".to_string());
        }

        let output = self.output(&ps).await?;
        if !output.status.success() {
            return Err(RuntimeError::Unavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        parse_ps_output(&String::from_utf8_lossy(&output.stdout))
    }

    async fn remove(
        &self,
        id: &str,
        force: bool,
        remove_volumes: bool,
        remove_links: bool,
    ) -> Result<(), RuntimeError> {
        let mut rm = args(&["rm"]);
        if force {
            rm.push("--force".to_string());
        }
        if remove_volumes {
            rm.push("--volumes".to_string());
        }
        if remove_links {
            rm.push("--link".to_string());
        }
        rm.push(id.to_string());

        self.run(&rm).await?;
        debug!(unit = %id, "Removed unit");
        Ok(())
    }

    async fn copy_to_volume(&self, volume: &str, sample: &Sample) -> Result<(), RuntimeError> {
        self.run(&args(&["volume", "create", volume])).await?;

        let helper = format!("malice_copy_{}", uuid::Uuid::new_v4().simple());
        let mount = format!("{}:{}", volume, self.config.mount_path);
        self.run(&args(&[
            "create",
            "--name",
            &helper,
            "--volume",
            &mount,
            &self.config.helper_image,
            "true",
        ]))
        .await?;

        let copied = self.copy_via_helper(&helper, sample).await;

        if let Err(e) = self.run(&args(&["rm", "--force", &helper])).await {
            warn!(unit = %helper, error = %e, "Failed to remove copy helper unit");
        }

        copied?;
        info!(sha256 = %sample.sha256(), volume = %volume, "Copied sample into shared volume");
        Ok(())
    }

    async fn start_infra(&self, unit: &InfraUnit) -> Result<(), RuntimeError> {
        let existing = self
            .list_all(true)
            .await?
            .into_iter()
            .find(|u| u.has_name(&unit.name));

        match existing {
            Some(u) if u.is_running() => {
                debug!(unit = %unit.name, "Infrastructure unit already running");
                return Ok(());
            }
            Some(_) => {
                info!(unit = %unit.name, "Starting stopped infrastructure unit");
                self.run(&args(&["start", &unit.name])).await?;
                return Ok(());
            }
            None => {}
        }

        let mut run = args(&["run", "--detach", "--name", &unit.name]);
        for port in &unit.ports {
            run.push("--publish".to_string());
            run.push(format!("{}:{}", port.host, port.unit));
        }
        for (key, value) in &unit.env {
            run.push("--env".to_string());
            run.push(format!("{}={}", key, value));
        }
        for link in &unit.links {
            run.push("--link".to_string());
            run.push(link.clone());
        }
        run.push(unit.image.clone());

        info!(unit = %unit.name, image = %unit.image, "Creating infrastructure unit");
        self.run(&run).await?;
        Ok(())
    }

    async fn run_plugin(&self, run: &PluginRun) -> Result<(), RuntimeError> {
        let mut cmd = args(&["run", "--rm", "--name", &run.unit_name]);
        cmd.push("--volume".to_string());
        cmd.push(format!("{}:{}:ro", run.volume, run.mount_path));
        cmd.push("--workdir".to_string());
        cmd.push(run.mount_path.clone());
        if let Some(link) = &run.link {
            cmd.push("--link".to_string());
            cmd.push(link.clone());
        }
        for (key, value) in &run.env {
            cmd.push("--env".to_string());
            cmd.push(format!("{}={}", key, value));
        }
        cmd.push(run.image.clone());
        cmd.extend(run.args.iter().cloned());

        debug!(plugin = %run.plugin, unit = %run.unit_name, "Running worker unit");

        // The CLI client dies with a dropped future; the unit itself is
        // removed separately by the dispatcher
        let output = self
            .command(&cmd)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                RuntimeError::Unavailable(format!("cannot execute {}: {}", self.config.binary, e))
            })?;

        if run.emit_logs {
            for line in String::from_utf8_lossy(&output.stdout).lines() {
                info!(plugin = %run.plugin, "{}", line);
            }
        }

        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: format!("{} run {}", self.config.binary, run.image),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

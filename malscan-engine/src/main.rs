//! malscan - Malware Scan Orchestration Engine
//!
//! Runs a file through a set of containerized scanner plugins and records
//! the results in an Elasticsearch results store.
//!
//! Commands:
//! - `scan <path>`: scan one file
//! - `watch <dir>`: scan every file created in a folder
//! - `serve`: HTTP API (`/health`, `/info`, `POST /scan`)
//! - `elk`: start the results store and dashboard units

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use malscan_common::config::load_toml_config;
use malscan_common::events::{EventBus, ScanEvent};
use malscan_engine::config::ScanConfig;
use malscan_engine::services::{
    DockerCli, ElasticsearchConnector, MagicByteDetector, PluginRegistry, ScanOrchestrator,
    StorePool,
};
use malscan_engine::watch::FolderWatcher;
use malscan_engine::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Parser)]
#[command(name = "malscan", version, about = "Malware scan orchestration engine")]
struct Cli {
    /// Config file (default: MALSCAN_CONFIG, then the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan a file
    Scan {
        path: String,
        /// Stream plugin output into the log
        #[arg(long)]
        logs: bool,
    },
    /// Scan every file created in a folder
    Watch { dir: PathBuf },
    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Start the results store and dashboard
    Elk {
        #[arg(long)]
        logs: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let toml_config = load_toml_config(cli.config.as_deref())?;

    // RUST_LOG wins over the config file
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&toml_config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        built = env!("BUILD_TIMESTAMP"),
        profile = env!("BUILD_PROFILE"),
        "Starting malscan"
    );

    let config = ScanConfig::resolve(&toml_config);
    let registry = PluginRegistry::load_or_builtin(config.plugins_file.as_deref())
        .context("Failed to load plugin registry")?;
    info!(plugins = registry.all().len(), "Plugin registry loaded");

    let runtime = Arc::new(DockerCli::new(config.runtime.clone()));
    match config.runtime.endpoint_host_port() {
        Some((host, port)) => info!(host = %host, port = port, "Container runtime endpoint"),
        None => info!(endpoint = %config.runtime.endpoint, "Container runtime endpoint"),
    }

    let pool = Arc::new(StorePool::new(Arc::new(ElasticsearchConnector::default())));
    let event_bus = EventBus::new(100);

    let orchestrator = Arc::new(ScanOrchestrator::new(
        config,
        runtime,
        pool,
        Arc::new(MagicByteDetector::new()),
        Arc::new(registry),
        event_bus.clone(),
    ));

    match orchestrator.runtime().info().await {
        Ok(version) => info!(version = %version, "Container runtime reachable"),
        Err(e) => warn!(error = %e, "Container runtime not reachable yet"),
    }

    match cli.command {
        Command::Scan { path, logs } => {
            if logs {
                spawn_event_logger(&event_bus);
            }
            let report = orchestrator.scan(&path, logs).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Watch { dir } => {
            spawn_event_logger(&event_bus);
            FolderWatcher::new(orchestrator, dir)?.run().await?;
        }
        Command::Serve { port } => {
            let app = malscan_engine::build_router(AppState::new(orchestrator));
            let addr = format!("0.0.0.0:{}", port);
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("Listening on http://{}", addr);
            info!("Health check: http://{}/health", addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        Command::Elk { logs } => {
            if logs {
                spawn_event_logger(&event_bus);
            }
            orchestrator.start_infrastructure().await?;
            let dashboard = &orchestrator.config().runtime.dashboard;
            info!(
                "Dashboard available at https://localhost:{} ({})",
                dashboard.port, dashboard.name
            );
        }
    }

    Ok(())
}

/// Log every scan event
fn spawn_event_logger(bus: &EventBus) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ScanEvent::WorkerFinished {
                    plugin,
                    outcome,
                    elapsed_ms,
                    ..
                }) => info!(plugin = %plugin, outcome = %outcome, elapsed_ms, "Worker finished"),
                Ok(event) => info!(
                    run_id = %event.run_id(),
                    event = event.event_type(),
                    "Scan event"
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged")
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

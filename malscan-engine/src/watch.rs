//! Folder watch trigger
//!
//! Every regular file created in the watched folder is scanned. Scan
//! failures are logged and watching continues; a watcher error ends the
//! loop.

use crate::services::ScanOrchestrator;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Watch folder does not exist: {0}")]
    Missing(PathBuf),

    #[error("Watch path is not a folder: {0}")]
    NotAFolder(PathBuf),

    #[error("File watcher failed: {0}")]
    Notify(#[from] notify::Error),

    #[error("File watcher channel closed")]
    ChannelClosed,
}

/// Scans files as they appear in a folder
pub struct FolderWatcher {
    orchestrator: Arc<ScanOrchestrator>,
    folder: PathBuf,
}

impl FolderWatcher {
    pub fn new(orchestrator: Arc<ScanOrchestrator>, folder: impl Into<PathBuf>) -> Result<Self, WatchError> {
        let folder = folder.into();
        match std::fs::metadata(&folder) {
            Ok(meta) if meta.is_dir() => Ok(Self {
                orchestrator,
                folder,
            }),
            Ok(_) => Err(WatchError::NotAFolder(folder)),
            Err(_) => Err(WatchError::Missing(folder)),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Watch until ctrl-c
    pub async fn run(self) -> Result<(), WatchError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Watch until `shutdown` resolves or the watcher fails
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), WatchError>
    where
        F: Future<Output = ()>,
    {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if event_tx.send(res).is_err() {
                    debug!("Watch loop gone, dropping file event");
                }
            },
            Config::default(),
        )?;
        watcher.watch(&self.folder, RecursiveMode::NonRecursive)?;
        info!(folder = %self.folder.display(), "Watching folder for new samples");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(folder = %self.folder.display(), "Stopped watching folder");
                    return Ok(());
                }
                received = event_rx.recv() => match received {
                    Some(Ok(event)) => {
                        for path in created_files(&event) {
                            self.scan_in_background(path);
                        }
                    }
                    Some(Err(e)) => {
                        error!(folder = %self.folder.display(), error = %e, "Watch error");
                        return Err(WatchError::Notify(e));
                    }
                    None => return Err(WatchError::ChannelClosed),
                },
            }
        }
    }

    fn scan_in_background(&self, path: PathBuf) {
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            let path = path.to_string_lossy().into_owned();
            info!(path = %path, "New sample in watched folder");
            if let Err(e) = orchestrator.scan(&path, false).await {
                error!(path = %path, code = e.code(), error = %e, "Watched sample scan failed");
            }
        });
    }
}

/// Regular files created by `event`
fn created_files(event: &Event) -> Vec<PathBuf> {
    if !matches!(event.kind, EventKind::Create(_)) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|path| std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false))
        .cloned()
        .collect()
}

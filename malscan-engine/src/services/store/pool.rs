//! Execute-once results store pool
//!
//! The first `init` call starts the connection; every other call, concurrent
//! or later and whatever configuration it passes, observes the recorded
//! outcome. The connection runs in its own task, so it completes and records
//! its outcome even when the caller that started it goes away. Readers never
//! block on an initialization in flight: they see `NotInitialized` until it
//! completes.

use super::{ResultStore, StoreConnector};
use crate::config::StoreConfig;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, error};

/// Pool errors
///
/// `Clone + PartialEq` so every caller observes an identical recorded value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Initialization was attempted without a store configuration
    #[error("database cannot be nil")]
    NilDatabase,

    /// No initialization has completed yet
    #[error("results store pool not initialized")]
    NotInitialized,

    /// The connection task ended without reporting an outcome
    #[error("results store initialization was abandoned before completing")]
    InitAborted,

    #[error("results store connection failed: {0}")]
    Connect(String),
}

/// Lifecycle of the pool
#[derive(Clone)]
pub enum PoolState {
    Uninitialized,
    Initializing,
    Ready(Arc<dyn ResultStore>),
    Failed(PoolError),
}

impl PoolState {
    pub fn name(&self) -> &'static str {
        match self {
            PoolState::Uninitialized => "uninitialized",
            PoolState::Initializing => "initializing",
            PoolState::Ready(_) => "ready",
            PoolState::Failed(_) => "failed",
        }
    }

    fn outcome(&self) -> Option<Result<Arc<dyn ResultStore>, PoolError>> {
        match self {
            PoolState::Ready(store) => Some(Ok(store.clone())),
            PoolState::Failed(e) => Some(Err(e.clone())),
            PoolState::Uninitialized | PoolState::Initializing => None,
        }
    }
}

impl fmt::Debug for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolState::Ready(store) => write!(f, "Ready({})", store.describe()),
            PoolState::Failed(e) => write!(f, "Failed({:?})", e),
            other => f.write_str(other.name()),
        }
    }
}

/// Shared results store connection with execute-once initialization
pub struct StorePool {
    connector: Arc<dyn StoreConnector>,
    state: Arc<RwLock<PoolState>>,
    /// Signalled when the connection task records an outcome
    completed: Arc<Notify>,
    attempts: AtomicUsize,
}

impl StorePool {
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            connector,
            state: Arc::new(RwLock::new(PoolState::Uninitialized)),
            completed: Arc::new(Notify::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Initialize the pool, or observe the outcome of the first initialization
    ///
    /// `None` records [`PoolError::NilDatabase`] when it is the first call.
    pub async fn init(
        &self,
        config: Option<&StoreConfig>,
    ) -> Result<Arc<dyn ResultStore>, PoolError> {
        if let Some(outcome) = self.state.read().await.outcome() {
            return outcome;
        }

        {
            let mut state = self.state.write().await;
            if let Some(outcome) = state.outcome() {
                return outcome;
            }
            if matches!(*state, PoolState::Uninitialized) {
                match config {
                    None => {
                        error!("Results store initialization failed: no configuration");
                        *state = PoolState::Failed(PoolError::NilDatabase);
                        return Err(PoolError::NilDatabase);
                    }
                    Some(config) => {
                        *state = PoolState::Initializing;
                        self.attempts.fetch_add(1, Ordering::SeqCst);
                        self.spawn_connect(config.clone());
                    }
                }
            }
        }

        self.wait_for_outcome().await
    }

    /// Connect in a detached task that records the outcome itself
    fn spawn_connect(&self, config: StoreConfig) {
        let connector = self.connector.clone();
        let state = self.state.clone();
        let completed = self.completed.clone();

        tokio::spawn(async move {
            debug!(url = %config.url, index = %config.index, "Connecting to results store");
            let connecting = tokio::spawn(async move { connector.connect(&config).await });

            let outcome = match connecting.await {
                Ok(Ok(store)) => PoolState::Ready(store),
                Ok(Err(e)) => PoolState::Failed(PoolError::Connect(e.to_string())),
                Err(e) => {
                    error!(error = %e, "Results store connection task did not finish");
                    PoolState::Failed(PoolError::InitAborted)
                }
            };
            if let PoolState::Failed(e) = &outcome {
                error!(error = %e, "Results store initialization failed");
            }

            {
                let mut state = state.write().await;
                // A reset while connecting discards this outcome
                if matches!(*state, PoolState::Initializing) {
                    *state = outcome;
                }
            }
            completed.notify_waiters();
        });
    }

    async fn wait_for_outcome(&self) -> Result<Arc<dyn ResultStore>, PoolError> {
        loop {
            let notified = self.completed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.state.read().await;
                if let Some(outcome) = state.outcome() {
                    return outcome;
                }
                if matches!(*state, PoolState::Uninitialized) {
                    return Err(PoolError::NotInitialized);
                }
            }
            notified.await;
        }
    }

    /// Shared store handle
    ///
    /// Fails with [`PoolError::NotInitialized`] until an initialization has
    /// completed, and with the recorded error if it failed.
    pub async fn get(&self) -> Result<Arc<dyn ResultStore>, PoolError> {
        self.state
            .read()
            .await
            .outcome()
            .unwrap_or(Err(PoolError::NotInitialized))
    }

    /// Current lifecycle state
    pub async fn state(&self) -> PoolState {
        self.state.read().await.clone()
    }

    /// Number of real connection attempts made
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Return to `Uninitialized` (test isolation only)
    pub async fn reset(&self) {
        *self.state.write().await = PoolState::Uninitialized;
        self.attempts.store(0, Ordering::SeqCst);
        self.completed.notify_waiters();
    }
}

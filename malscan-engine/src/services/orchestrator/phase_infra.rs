//! Phase 2: INFRA_CHECK
//!
//! - Runtime reachable (fatal otherwise)
//! - Stopped units left by earlier runs removed (failures only logged)
//! - Results store unit running when the store URL is the local default
//! - Dashboard unit, when enabled (failures only logged)
//! - Results store pool initialized

use super::ScanOrchestrator;
use crate::config::UNIT_NAME_PREFIX;
use crate::error::ScanError;
use crate::models::{ScanRun, ScanState};
use crate::services::runtime::{InfraUnit, UnitDescriptor};
use crate::services::store::ResultStore;
use std::sync::Arc;

/// Infrastructure ready for registration
#[derive(Clone)]
pub struct InfraReady {
    pub store: Arc<dyn ResultStore>,
    /// The store unit is engine-provisioned
    pub store_in_runtime: bool,
}

/// Stopped units the engine created for an earlier scan: worker units and
/// copy helpers (`malice_*`) or the bare engine name. Running units may
/// belong to a scan in another engine process and are left alone.
/// Infrastructure units use a hyphenated name and are never stale.
fn is_stale(unit: &UnitDescriptor) -> bool {
    if unit.is_running() {
        return false;
    }
    let worker_prefix = format!("{}_", UNIT_NAME_PREFIX);
    unit.names.iter().any(|name| {
        let name = name.trim_start_matches('/');
        name == UNIT_NAME_PREFIX || name.starts_with(&worker_prefix)
    })
}

impl ScanOrchestrator {
    pub(super) async fn phase_infra(&self, run: &mut ScanRun) -> Result<InfraReady, ScanError> {
        self.transition(run, ScanState::InfraCheck);
        tracing::info!(run_id = %run.run_id, "Phase 2: INFRA_CHECK");

        let units = self
            .runtime
            .list_all(true)
            .await
            .map_err(|source| ScanError::RuntimeUnavailable { source })?;

        self.remove_stale_units(&units).await;

        let store_in_runtime = self.config.store.is_local_default();
        if store_in_runtime {
            self.ensure_store_unit().await?;
        }

        if self.config.start_dashboard {
            if let Err(e) = self.ensure_dashboard_unit().await {
                tracing::warn!(error = %e, "Dashboard unavailable, continuing without it");
            }
        }

        let store = self.init_store_pool().await?;

        Ok(InfraReady {
            store,
            store_in_runtime,
        })
    }

    /// Start the results store and dashboard units and connect the pool
    ///
    /// Unlike a scan, a dashboard failure is an error here.
    pub async fn start_infrastructure(&self) -> Result<(), ScanError> {
        self.runtime
            .info()
            .await
            .map_err(|source| ScanError::RuntimeUnavailable { source })?;

        self.ensure_store_unit().await?;
        self.ensure_dashboard_unit().await?;
        self.init_store_pool().await?;

        tracing::info!(
            dashboard = %self.config.runtime.dashboard.name,
            port = self.config.runtime.dashboard.port,
            "Results store and dashboard running"
        );
        Ok(())
    }

    async fn remove_stale_units(&self, units: &[UnitDescriptor]) {
        for unit in units.iter().filter(|u| is_stale(u)) {
            match self.runtime.remove(&unit.id, true, true, false).await {
                Ok(()) => tracing::debug!(unit = %unit.display_name(), "Removed stale unit"),
                Err(e) => tracing::warn!(
                    unit = %unit.display_name(),
                    error = %e,
                    "Failed to remove stale unit"
                ),
            }
        }
    }

    async fn ensure_store_unit(&self) -> Result<(), ScanError> {
        let unit = InfraUnit::store(&self.config.store);
        self.ensure_unit(&unit).await
    }

    async fn ensure_dashboard_unit(&self) -> Result<(), ScanError> {
        let unit = InfraUnit::dashboard(&self.config.runtime, &self.config.store);
        self.ensure_unit(&unit).await
    }

    async fn ensure_unit(&self, unit: &InfraUnit) -> Result<(), ScanError> {
        let running = self
            .runtime
            .is_running(&unit.name)
            .await
            .map_err(|source| ScanError::RuntimeUnavailable { source })?;

        if running.is_some() {
            tracing::debug!(unit = %unit.name, "Infrastructure unit running");
            return Ok(());
        }

        tracing::info!(unit = %unit.name, "Infrastructure unit NOT running, starting now");
        self.runtime
            .start_infra(unit)
            .await
            .map_err(|e| ScanError::InfraStart {
                unit: unit.name.clone(),
                source: Box::new(e),
            })
    }

    async fn init_store_pool(&self) -> Result<Arc<dyn ResultStore>, ScanError> {
        Ok(self.pool.init(Some(&self.config.store)).await?)
    }
}

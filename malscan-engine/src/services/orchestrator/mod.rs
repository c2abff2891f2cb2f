//! Scan orchestrator
//!
//! # State Progression
//! VALIDATING → INFRA_CHECK → REGISTERING → INTEL_DISPATCH → TYPE_DETECT →
//! WORKER_DISPATCH → AGGREGATING → COMPLETED (or FAILED on any fatal error)
//!
//! # Architecture
//! Each state is handled by a dedicated `phase_*` method in its own module.
//! Phases return typed results; the first fatal [`ScanError`] ends the scan.
//! Worker failures never end a scan: they are recorded per worker and
//! summarized in the [`ScanReport`].
//!
//! One overall deadline bounds every phase. Infrastructure and registration
//! are cut off when it fires, and no phase starts after it has passed.
//! Detection runs under the smaller of its own timeout and the remaining
//! budget; workers run under their own timeout and are abandoned (not
//! killed) when the overall deadline fires.

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::models::{ScanReport, ScanRun, ScanState};
use crate::services::registry::PluginRegistry;
use crate::services::runtime::ContainerRuntime;
use crate::services::store::StorePool;
use crate::services::type_detector::TypeDetector;
use chrono::Utc;
use malscan_common::events::{EventBus, ScanEvent};
use std::future::Future;
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};

mod dispatcher;
mod phase_aggregating;
mod phase_detecting;
mod phase_dispatching;
mod phase_infra;
mod phase_intel;
mod phase_registering;
mod phase_validating;

pub use dispatcher::{DispatchHandle, OutcomeEvents, WorkerDispatcher};
pub use phase_infra::InfraReady;

/// Scan orchestration service
///
/// Collaborators are injected; the orchestrator holds no global state.
pub struct ScanOrchestrator {
    config: ScanConfig,
    runtime: Arc<dyn ContainerRuntime>,
    pool: Arc<StorePool>,
    detector: Arc<dyn TypeDetector>,
    registry: Arc<PluginRegistry>,
    event_bus: EventBus,
}

/// Deadline error for a scan that never reached worker dispatch
fn deadline_before_dispatch() -> ScanError {
    ScanError::ScanDeadlineExceeded {
        finished: 0,
        outstanding: 0,
    }
}

/// Run `phase`, giving up when `deadline` fires
async fn before_deadline<T, F>(deadline: Instant, phase: F) -> Result<T, ScanError>
where
    F: Future<Output = Result<T, ScanError>>,
{
    match timeout_at(deadline, phase).await {
        Ok(result) => result,
        Err(_) => Err(deadline_before_dispatch()),
    }
}

/// Fail fast once `deadline` has passed
fn ensure_before(deadline: Instant) -> Result<(), ScanError> {
    if Instant::now() >= deadline {
        return Err(deadline_before_dispatch());
    }
    Ok(())
}

impl ScanOrchestrator {
    pub fn new(
        config: ScanConfig,
        runtime: Arc<dyn ContainerRuntime>,
        pool: Arc<StorePool>,
        detector: Arc<dyn TypeDetector>,
        registry: Arc<PluginRegistry>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            config,
            runtime,
            pool,
            detector,
            registry,
            event_bus,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<StorePool> {
        &self.pool
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Scan the file at `path` under the configured overall deadline
    ///
    /// `emit_logs` streams worker unit output into the log.
    pub async fn scan(&self, path: &str, emit_logs: bool) -> Result<ScanReport, ScanError> {
        let deadline = Instant::now() + self.config.limits.scan_timeout;
        self.scan_with_deadline(path, emit_logs, deadline).await
    }

    /// Scan the file at `path`, giving up at `deadline`
    pub async fn scan_with_deadline(
        &self,
        path: &str,
        emit_logs: bool,
        deadline: Instant,
    ) -> Result<ScanReport, ScanError> {
        let mut run = ScanRun::new(path);
        let start_time = Instant::now();

        tracing::info!(run_id = %run.run_id, path = %path, "Starting scan");
        self.event_bus.emit_lossy(ScanEvent::ScanStarted {
            run_id: run.run_id,
            path: path.to_string(),
            timestamp: Utc::now(),
        });

        let result = self
            .execute_phases(&mut run, path, emit_logs, deadline, start_time)
            .await;

        match &result {
            Ok(report) => {
                self.transition(&mut run, ScanState::Completed);
                tracing::info!(
                    run_id = %run.run_id,
                    scan_id = %report.scan_id,
                    completed = report.counts.completed,
                    timed_out = report.counts.timed_out,
                    errored = report.counts.errored,
                    skipped = report.counts.skipped,
                    elapsed_ms = report.elapsed_ms,
                    "Scan completed"
                );
                self.event_bus.emit_lossy(ScanEvent::ScanCompleted {
                    run_id: run.run_id,
                    scan_id: report.scan_id.to_string(),
                    sha256: report.sha256.clone(),
                    mime: report.mime.clone(),
                    completed: report.counts.completed,
                    timed_out: report.counts.timed_out,
                    errored: report.counts.errored,
                    skipped: report.counts.skipped,
                    elapsed_ms: report.elapsed_ms,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                let failed_in = run.state;
                self.transition(&mut run, ScanState::Failed);
                tracing::error!(
                    run_id = %run.run_id,
                    state = %failed_in,
                    stage = %e.stage(),
                    code = e.code(),
                    error = %e,
                    "Scan failed"
                );
                self.event_bus.emit_lossy(ScanEvent::ScanFailed {
                    run_id: run.run_id,
                    stage: e.stage().to_string(),
                    code: e.code().to_string(),
                    message: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }

        result
    }

    async fn execute_phases(
        &self,
        run: &mut ScanRun,
        path: &str,
        emit_logs: bool,
        deadline: Instant,
        start_time: Instant,
    ) -> Result<ScanReport, ScanError> {
        // Phase 1: VALIDATING
        let validated = self.phase_validating(run, path)?;

        // Phase 2: INFRA_CHECK
        ensure_before(deadline)?;
        let infra = before_deadline(deadline, self.phase_infra(run)).await?;

        // Phase 3: REGISTERING
        ensure_before(deadline)?;
        let (mut sample, record) =
            before_deadline(deadline, self.phase_registering(run, validated, &infra)).await?;

        // Phase 4: INTEL_DISPATCH (outcomes logged, never fatal)
        ensure_before(deadline)?;
        let intel = self
            .phase_intel(run, &sample, &record, emit_logs, deadline)
            .await;

        // Phase 5: TYPE_DETECT
        ensure_before(deadline)?;
        let mime = self
            .phase_detecting(run, &mut sample, &record, &infra, deadline)
            .await?;

        // Phase 6: WORKER_DISPATCH
        ensure_before(deadline)?;
        let dispatched = self.phase_dispatching(run, &sample, &record, &mime, emit_logs);

        // Phase 7: AGGREGATING
        self.phase_aggregating(run, &record, mime, intel, dispatched, deadline, start_time)
            .await
    }

    /// Move to `state`, logging and broadcasting the transition
    fn transition(&self, run: &mut ScanRun, state: ScanState) {
        let transition = run.transition_to(state);
        tracing::debug!(
            run_id = %run.run_id,
            from = %transition.old_state,
            to = %transition.new_state,
            "State transition"
        );
        self.event_bus.emit_lossy(ScanEvent::StateChanged {
            run_id: transition.run_id,
            old_state: transition.old_state.to_string(),
            new_state: transition.new_state.to_string(),
            timestamp: transition.transitioned_at,
        });
    }
}

//! Phase 4: INTEL_DISPATCH
//!
//! Intel workers look the sample up by hash alone, so they run before type
//! detection. They share the worker dispatcher and the overall deadline but
//! never fail the scan.

use super::{OutcomeEvents, ScanOrchestrator, WorkerDispatcher};
use crate::models::{Sample, ScanRecord, ScanRun, ScanState, WorkerOutcome};
use crate::services::runtime::{PluginRun, RunContext};
use tokio::time::Instant;

impl ScanOrchestrator {
    pub(super) async fn phase_intel(
        &self,
        run: &mut ScanRun,
        sample: &Sample,
        record: &ScanRecord,
        emit_logs: bool,
        deadline: Instant,
    ) -> Vec<WorkerOutcome> {
        self.transition(run, ScanState::IntelDispatch);
        tracing::info!(run_id = %run.run_id, "Phase 4: INTEL_DISPATCH");

        let plugins = self.registry.intel_plugins();
        if plugins.is_empty() {
            tracing::debug!(scan_id = %record.scan_id, "No intel plugins enabled");
            return Vec::new();
        }

        let ctx = self.run_context(record, emit_logs);
        let runs: Vec<PluginRun> = plugins
            .iter()
            .map(|plugin| PluginRun::new(plugin, sample.hashes.get(plugin.hash), ctx))
            .collect();

        match self
            .dispatcher(run)
            .dispatch(runs, record.scan_id.as_str(), deadline)
            .await
        {
            Ok(outcomes) => outcomes,
            Err(e) => {
                tracing::warn!(
                    scan_id = %record.scan_id,
                    error = %e,
                    "Intel dispatch abandoned"
                );
                Vec::new()
            }
        }
    }

    /// Dispatcher configured with this engine's limits, publishing events
    /// for `run`
    pub(super) fn dispatcher(&self, run: &ScanRun) -> WorkerDispatcher {
        WorkerDispatcher::new(
            self.runtime.clone(),
            self.config.limits.max_concurrent_workers,
            self.config.limits.worker_timeout,
        )
        .with_events(OutcomeEvents::new(self.event_bus.clone(), run.run_id))
    }

    pub(super) fn run_context<'a>(&'a self, record: &'a ScanRecord, emit_logs: bool) -> RunContext<'a> {
        RunContext {
            scan_id: record.scan_id.as_str(),
            store: &self.config.store,
            runtime: &self.config.runtime,
            store_in_runtime: record.store_in_runtime,
            emit_logs,
        }
    }
}

//! Phase 6: WORKER_DISPATCH
//!
//! Select the enabled non-intel plugins that accept the detected type and
//! start them behind the concurrency gate. Collection happens in
//! AGGREGATING, where the overall deadline applies.

use super::{DispatchHandle, ScanOrchestrator};
use crate::models::{Sample, ScanRecord, ScanRun, ScanState};
use crate::services::runtime::PluginRun;

impl ScanOrchestrator {
    pub(super) fn phase_dispatching(
        &self,
        run: &mut ScanRun,
        sample: &Sample,
        record: &ScanRecord,
        mime: &str,
        emit_logs: bool,
    ) -> DispatchHandle {
        self.transition(run, ScanState::WorkerDispatch);
        tracing::info!(run_id = %run.run_id, "Phase 6: WORKER_DISPATCH");

        let plugins = self.registry.plugins_for_mime(mime);
        tracing::info!(
            scan_id = %record.scan_id,
            mime_type = %mime,
            workers = plugins.len(),
            max_concurrent = self.config.limits.max_concurrent_workers,
            "Dispatching workers"
        );

        let ctx = self.run_context(record, emit_logs);
        let runs: Vec<PluginRun> = plugins
            .iter()
            .map(|plugin| PluginRun::new(plugin, sample.sha256(), ctx))
            .collect();

        self.dispatcher(run).spawn(runs, record.scan_id.as_str())
    }
}

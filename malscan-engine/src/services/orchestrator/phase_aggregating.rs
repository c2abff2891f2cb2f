//! Phase 7: AGGREGATING
//!
//! Wait for every dispatched worker to reach a terminal state, or for the
//! overall deadline. Results themselves are written to the store by the
//! workers; the engine only tallies outcomes.

use super::{DispatchHandle, ScanOrchestrator};
use crate::error::ScanError;
use crate::models::{OutcomeCounts, ScanRecord, ScanReport, ScanRun, ScanState, WorkerOutcome};
use tokio::time::Instant;

impl ScanOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub(super) async fn phase_aggregating(
        &self,
        run: &mut ScanRun,
        record: &ScanRecord,
        mime: String,
        intel: Vec<WorkerOutcome>,
        dispatched: DispatchHandle,
        deadline: Instant,
        start_time: Instant,
    ) -> Result<ScanReport, ScanError> {
        self.transition(run, ScanState::Aggregating);
        tracing::info!(
            run_id = %run.run_id,
            outstanding = dispatched.total(),
            "Phase 7: AGGREGATING"
        );

        let outcomes = dispatched.collect(deadline).await?;
        let counts = OutcomeCounts::tally(&outcomes);

        Ok(ScanReport {
            run_id: run.run_id,
            scan_id: record.scan_id.clone(),
            sha256: record.sha256.clone(),
            mime,
            intel: intel.iter().map(WorkerOutcome::summary).collect(),
            workers: outcomes.iter().map(WorkerOutcome::summary).collect(),
            counts,
            started_at: run.started_at,
            elapsed_ms: start_time.elapsed().as_millis() as u64,
        })
    }
}

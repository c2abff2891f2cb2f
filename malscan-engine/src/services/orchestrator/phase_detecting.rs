//! Phase 5: TYPE_DETECT
//!
//! Detection runs under the smaller of its own timeout and the remaining
//! overall budget. Running out of the overall budget is a scan deadline
//! failure, not a detection timeout. The detected type is written back to the
//! seed document on a best-effort basis.

use super::{deadline_before_dispatch, InfraReady, ScanOrchestrator};
use crate::error::ScanError;
use crate::models::{Sample, ScanRecord, ScanRun, ScanState};
use tokio::time::{timeout, Instant};

impl ScanOrchestrator {
    pub(super) async fn phase_detecting(
        &self,
        run: &mut ScanRun,
        sample: &mut Sample,
        record: &ScanRecord,
        infra: &InfraReady,
        deadline: Instant,
    ) -> Result<String, ScanError> {
        self.transition(run, ScanState::TypeDetect);
        tracing::info!(run_id = %run.run_id, "Phase 5: TYPE_DETECT");

        let detect_timeout = self.config.limits.detect_timeout;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(deadline_before_dispatch());
        }
        let budget = detect_timeout.min(remaining);

        let mime = match timeout(budget, self.detector.detect(sample)).await {
            Ok(Ok(mime)) => mime,
            Ok(Err(e)) => {
                return Err(ScanError::Detection {
                    source: Box::new(e),
                })
            }
            Err(_) if budget < detect_timeout => return Err(deadline_before_dispatch()),
            Err(_) => return Err(ScanError::DetectionTimeout { timeout: budget }),
        };

        tracing::debug!(
            scan_id = %record.scan_id,
            detector = self.detector.name(),
            mime_type = %mime,
            sha256 = %sample.sha256(),
            "Detected content type"
        );
        sample.mime = Some(mime.clone());

        if let Err(e) = infra.store.update_mime(&record.scan_id, &mime).await {
            tracing::warn!(
                scan_id = %record.scan_id,
                error = %e,
                "Failed to record content type in results store"
            );
        }

        Ok(mime)
    }
}

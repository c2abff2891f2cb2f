//! Phase 1: VALIDATING
//!
//! Input path checks. No side effects happen before this phase succeeds.

use super::ScanOrchestrator;
use crate::error::ScanError;
use crate::models::{ScanRun, ScanState};
use crate::services::path_validator::{self, ValidatedPath};

impl ScanOrchestrator {
    pub(super) fn phase_validating(
        &self,
        run: &mut ScanRun,
        path: &str,
    ) -> Result<ValidatedPath, ScanError> {
        self.transition(run, ScanState::Validating);
        tracing::info!(run_id = %run.run_id, "Phase 1: VALIDATING");

        let validated = path_validator::validate(path, self.config.limits.max_file_size)?;

        tracing::debug!(
            run_id = %run.run_id,
            path = %validated.path.display(),
            size = validated.size,
            "Sample path accepted"
        );
        Ok(validated)
    }
}

//! Phase 3: REGISTERING
//!
//! Hash the sample (the only time it is hashed), persist the seed document
//! to obtain the scan id, then copy the sample into the shared volume.
//! Any failure here is fatal.

use super::{InfraReady, ScanOrchestrator};
use crate::error::ScanError;
use crate::models::{Sample, ScanDocument, ScanRecord, ScanRun, ScanState};
use crate::services::hasher;
use crate::services::path_validator::ValidatedPath;
use chrono::Utc;

impl ScanOrchestrator {
    pub(super) async fn phase_registering(
        &self,
        run: &mut ScanRun,
        validated: ValidatedPath,
        infra: &InfraReady,
    ) -> Result<(Sample, ScanRecord), ScanError> {
        self.transition(run, ScanState::Registering);
        tracing::info!(run_id = %run.run_id, "Phase 3: REGISTERING");

        let hashes = hasher::hash_file(&validated.path)
            .await
            .map_err(|e| ScanError::Registration {
                message: "hash sample".to_string(),
                source: Box::new(e),
            })?;
        let sample = Sample::new(validated.path, validated.size, hashes);

        tracing::info!(
            run_id = %run.run_id,
            name = %sample.file_name(),
            size = sample.size,
            md5 = %sample.hashes.md5,
            sha1 = %sample.hashes.sha1,
            sha256 = %sample.hashes.sha256,
            "Sample hashed"
        );

        let document = ScanDocument::new(&sample, self.registry.plugins_by_category(), Utc::now());
        let scan_id = infra
            .store
            .store_sample(&document)
            .await
            .map_err(|e| ScanError::Registration {
                message: "persist seed document".to_string(),
                source: Box::new(e),
            })?;

        self.runtime
            .copy_to_volume(&self.config.runtime.volume, &sample)
            .await
            .map_err(|e| ScanError::Registration {
                message: "copy sample into shared volume".to_string(),
                source: Box::new(e),
            })?;

        tracing::info!(run_id = %run.run_id, scan_id = %scan_id, "Sample registered");

        let record = ScanRecord {
            scan_id,
            sha256: sample.hashes.sha256.clone(),
            created_at: document.scan_date,
            store_in_runtime: infra.store_in_runtime,
        };
        Ok((sample, record))
    }
}

//! Scan identity, persisted seed document and scan report

use super::{OutcomeCounts, OutcomeSummary, Sample};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Version of the seed document layout written to the results store
pub const SCAN_DOCUMENT_SCHEMA_VERSION: u32 = 1;

/// Store-issued scan identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanId(pub String);

impl ScanId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ScanId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A registered scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub scan_id: ScanId,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
    /// The store unit was provisioned by the engine (workers reach it by
    /// link rather than by URL)
    pub store_in_runtime: bool,
}

/// `file` section of the seed document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSection {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub sha512: String,
    pub mime: Option<String>,
}

/// Seed document persisted when a scan is registered
///
/// Workers later enrich the same document through the store; the engine
/// writes only these fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanDocument {
    pub schema_version: u32,
    pub file: FileSection,
    /// category → worker name → enabled
    pub plugins: BTreeMap<String, BTreeMap<String, bool>>,
    pub scan_date: DateTime<Utc>,
}

impl ScanDocument {
    pub fn new(
        sample: &Sample,
        plugins: BTreeMap<String, BTreeMap<String, bool>>,
        scan_date: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_version: SCAN_DOCUMENT_SCHEMA_VERSION,
            file: FileSection {
                name: sample.file_name(),
                path: sample.path.to_string_lossy().into_owned(),
                size: sample.size,
                md5: sample.hashes.md5.clone(),
                sha1: sample.hashes.sha1.clone(),
                sha256: sample.hashes.sha256.clone(),
                sha512: sample.hashes.sha512.clone(),
                mime: sample.mime.clone(),
            },
            plugins,
            scan_date,
        }
    }
}

/// Result of a completed scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub run_id: Uuid,
    pub scan_id: ScanId,
    pub sha256: String,
    pub mime: String,
    pub intel: Vec<OutcomeSummary>,
    pub workers: Vec<OutcomeSummary>,
    pub counts: OutcomeCounts,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SampleHashes;
    use std::path::PathBuf;

    #[test]
    fn document_carries_schema_version_and_hashes() {
        let sample = Sample::new(
            PathBuf::from("/samples/invoice.pdf"),
            10_240,
            SampleHashes {
                md5: "m".to_string(),
                sha1: "s1".to_string(),
                sha256: "s256".to_string(),
                sha512: "s512".to_string(),
            },
        );
        let mut plugins = BTreeMap::new();
        plugins.insert(
            "av".to_string(),
            BTreeMap::from([("clamav".to_string(), true)]),
        );

        let doc = ScanDocument::new(&sample, plugins, Utc::now());
        let json = serde_json::to_value(&doc).unwrap();

        assert_eq!(json["schema_version"], SCAN_DOCUMENT_SCHEMA_VERSION);
        assert_eq!(json["file"]["name"], "invoice.pdf");
        assert_eq!(json["file"]["sha256"], "s256");
        assert_eq!(json["file"]["mime"], serde_json::Value::Null);
        assert_eq!(json["plugins"]["av"]["clamav"], true);
    }

    #[test]
    fn scan_id_is_transparent() {
        let id = ScanId::from("AV8x-42".to_string());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"AV8x-42\"");
        assert_eq!(id.to_string(), "AV8x-42");
    }
}

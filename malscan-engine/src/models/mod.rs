//! Data models for malscan-engine
//!
//! - Scan orchestration state machine
//! - Sample identity and the persisted seed document
//! - Worker descriptors and execution outcomes

pub mod outcome;
pub mod plugin;
pub mod sample;
pub mod scan;
pub mod scan_run;

pub use outcome::{OutcomeCounts, OutcomeSummary, SkipReason, TerminalState, WorkerOutcome};
pub use plugin::PluginDescriptor;
pub use sample::{HashKind, Sample, SampleHashes};
pub use scan::{FileSection, ScanDocument, ScanId, ScanRecord, ScanReport, SCAN_DOCUMENT_SCHEMA_VERSION};
pub use scan_run::{ScanRun, ScanState, StateTransition};

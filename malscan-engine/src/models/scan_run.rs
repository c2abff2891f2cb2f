//! Scan orchestration state machine
//!
//! A scan progresses through the orchestrator states:
//! VALIDATING → INFRA_CHECK → REGISTERING → INTEL_DISPATCH → TYPE_DETECT →
//! WORKER_DISPATCH → AGGREGATING → COMPLETED
//!
//! Any fatal error moves the run to FAILED.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanState {
    /// Input path resolution and checks
    Validating,
    /// Runtime reachable, stale units removed, store ready
    InfraCheck,
    /// Hashing, seed document persisted, sample copied to the shared volume
    Registering,
    /// Hash-only intel workers
    IntelDispatch,
    /// Content-type detection
    TypeDetect,
    /// Applicable workers under bounded concurrency
    WorkerDispatch,
    /// Outcome summary
    Aggregating,
    Completed,
    Failed,
}

impl ScanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanState::Validating => "VALIDATING",
            ScanState::InfraCheck => "INFRA_CHECK",
            ScanState::Registering => "REGISTERING",
            ScanState::IntelDispatch => "INTEL_DISPATCH",
            ScanState::TypeDetect => "TYPE_DETECT",
            ScanState::WorkerDispatch => "WORKER_DISPATCH",
            ScanState::Aggregating => "AGGREGATING",
            ScanState::Completed => "COMPLETED",
            ScanState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanState::Completed | ScanState::Failed)
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub run_id: Uuid,
    pub old_state: ScanState,
    pub new_state: ScanState,
    pub transitioned_at: DateTime<Utc>,
}

/// In-memory record of one scan invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRun {
    /// Engine-local identifier, assigned before the store issues a scan id
    pub run_id: Uuid,

    pub state: ScanState,

    /// Path exactly as submitted
    pub requested_path: String,

    pub started_at: DateTime<Utc>,

    /// Set on entering a terminal state
    pub ended_at: Option<DateTime<Utc>>,
}

impl ScanRun {
    pub fn new(requested_path: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: ScanState::Validating,
            requested_path: requested_path.into(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Transition to new state
    pub fn transition_to(&mut self, new_state: ScanState) -> StateTransition {
        let transition = StateTransition {
            run_id: self.run_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;

        if new_state.is_terminal() {
            self.ended_at = Some(Utc::now());
        }

        transition
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

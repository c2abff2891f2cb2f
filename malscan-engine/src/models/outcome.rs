//! Per-worker execution outcomes

use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Terminal state of one dispatched worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalState {
    Completed,
    /// Exceeded the per-worker deadline
    TimedOut,
    /// Unit failed to start or exited with an error
    Errored,
    /// Never admitted
    Skipped,
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminalState::Completed => "Completed",
            TerminalState::TimedOut => "TimedOut",
            TerminalState::Errored => "Errored",
            TerminalState::Skipped => "Skipped",
        };
        f.write_str(s)
    }
}

/// Why a worker was never admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Overall deadline fired while waiting for a permit
    DeadlineCancelled,
    /// Admission gate closed
    GateClosed,
}

/// Outcome of one dispatched worker
///
/// Created exactly once per dispatched worker; retained only for
/// aggregation.
#[derive(Debug)]
pub struct WorkerOutcome {
    pub plugin: String,
    pub scan_id: String,
    pub state: TerminalState,
    pub skip_reason: Option<SkipReason>,
    pub error: Option<ScanError>,
    /// Time from admission to terminal state (zero when skipped)
    pub elapsed: Duration,
}

impl WorkerOutcome {
    pub fn completed(plugin: &str, scan_id: &str, elapsed: Duration) -> Self {
        Self {
            plugin: plugin.to_string(),
            scan_id: scan_id.to_string(),
            state: TerminalState::Completed,
            skip_reason: None,
            error: None,
            elapsed,
        }
    }

    pub fn timed_out(plugin: &str, scan_id: &str, timeout: Duration) -> Self {
        Self {
            plugin: plugin.to_string(),
            scan_id: scan_id.to_string(),
            state: TerminalState::TimedOut,
            skip_reason: None,
            error: Some(ScanError::WorkerTimeout {
                plugin: plugin.to_string(),
                timeout,
            }),
            elapsed: timeout,
        }
    }

    pub fn errored(plugin: &str, scan_id: &str, error: ScanError, elapsed: Duration) -> Self {
        Self {
            plugin: plugin.to_string(),
            scan_id: scan_id.to_string(),
            state: TerminalState::Errored,
            skip_reason: None,
            error: Some(error),
            elapsed,
        }
    }

    pub fn skipped(plugin: &str, scan_id: &str, reason: SkipReason) -> Self {
        Self {
            plugin: plugin.to_string(),
            scan_id: scan_id.to_string(),
            state: TerminalState::Skipped,
            skip_reason: Some(reason),
            error: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Serializable view for reports and events
    pub fn summary(&self) -> OutcomeSummary {
        OutcomeSummary {
            plugin: self.plugin.clone(),
            state: self.state,
            skip_reason: self.skip_reason,
            error: self.error.as_ref().map(|e| e.to_string()),
            elapsed_ms: self.elapsed.as_millis() as u64,
        }
    }
}

/// Serializable form of a [`WorkerOutcome`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub plugin: String,
    pub state: TerminalState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Outcome counts by terminal state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub completed: usize,
    pub timed_out: usize,
    pub errored: usize,
    pub skipped: usize,
}

impl OutcomeCounts {
    pub fn tally<'a>(outcomes: impl IntoIterator<Item = &'a WorkerOutcome>) -> Self {
        let mut counts = Self::default();
        for outcome in outcomes {
            match outcome.state {
                TerminalState::Completed => counts.completed += 1,
                TerminalState::TimedOut => counts.timed_out += 1,
                TerminalState::Errored => counts.errored += 1,
                TerminalState::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.completed + self.timed_out + self.errored + self.skipped
    }
}

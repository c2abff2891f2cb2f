//! Scan event types and EventBus
//!
//! The engine broadcasts progress as [`ScanEvent`]s. Subscribers (log
//! streaming, HTTP clients) are optional: scans never wait on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted while a scan progresses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScanEvent {
    /// Scan accepted and validation is about to start
    ScanStarted {
        /// Engine-local identifier (the store-issued scan id is not known yet)
        run_id: Uuid,
        path: String,
        timestamp: DateTime<Utc>,
    },

    /// Orchestrator moved to a new state
    StateChanged {
        run_id: Uuid,
        old_state: String,
        new_state: String,
        timestamp: DateTime<Utc>,
    },

    /// One worker reached its terminal outcome
    WorkerFinished {
        run_id: Uuid,
        scan_id: String,
        plugin: String,
        /// Completed / TimedOut / Errored / Skipped
        outcome: String,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Scan finished; every dispatched worker reached a terminal outcome
    ScanCompleted {
        run_id: Uuid,
        scan_id: String,
        sha256: String,
        mime: String,
        completed: usize,
        timed_out: usize,
        errored: usize,
        skipped: usize,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Scan aborted with a fatal error
    ScanFailed {
        run_id: Uuid,
        stage: String,
        code: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ScanEvent {
    /// Short event name for logging
    pub fn event_type(&self) -> &str {
        match self {
            ScanEvent::ScanStarted { .. } => "ScanStarted",
            ScanEvent::StateChanged { .. } => "StateChanged",
            ScanEvent::WorkerFinished { .. } => "WorkerFinished",
            ScanEvent::ScanCompleted { .. } => "ScanCompleted",
            ScanEvent::ScanFailed { .. } => "ScanFailed",
        }
    }

    /// Engine-local run identifier carried by every event
    pub fn run_id(&self) -> Uuid {
        match self {
            ScanEvent::ScanStarted { run_id, .. }
            | ScanEvent::StateChanged { run_id, .. }
            | ScanEvent::WorkerFinished { run_id, .. }
            | ScanEvent::ScanCompleted { run_id, .. }
            | ScanEvent::ScanFailed { run_id, .. } => *run_id,
        }
    }
}

/// Broadcast channel for [`ScanEvent`]s
///
/// Cloning is cheap; all clones share one channel.
///
/// ```
/// use malscan_common::events::EventBus;
///
/// let bus = EventBus::new(100);
/// let _rx = bus.subscribe();
/// assert_eq!(bus.subscriber_count(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ScanEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: ScanEvent) -> Result<usize, broadcast::error::SendError<ScanEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ScanEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

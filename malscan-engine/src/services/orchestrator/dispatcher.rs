//! Bounded-concurrency worker dispatch
//!
//! Every worker is its own spawned task reporting a [`WorkerOutcome`] on a
//! channel. Admission goes through a semaphore whose wait races the scan's
//! cancellation token; an admitted worker runs under the per-worker timeout.
//! Collection waits for all outcomes or the overall deadline, whichever
//! comes first. Workers still running at the deadline are left to finish on
//! their own: their task handles are dropped, never aborted.

use crate::error::ScanError;
use crate::models::{SkipReason, TerminalState, WorkerOutcome};
use crate::services::runtime::{ContainerRuntime, PluginRun};
use chrono::Utc;
use malscan_common::events::{EventBus, ScanEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Publishes `WorkerFinished` events for one scan run
#[derive(Debug, Clone)]
pub struct OutcomeEvents {
    bus: EventBus,
    run_id: Uuid,
}

impl OutcomeEvents {
    pub fn new(bus: EventBus, run_id: Uuid) -> Self {
        Self { bus, run_id }
    }

    fn worker_finished(&self, outcome: &WorkerOutcome) {
        self.bus.emit_lossy(ScanEvent::WorkerFinished {
            run_id: self.run_id,
            scan_id: outcome.scan_id.clone(),
            plugin: outcome.plugin.clone(),
            outcome: outcome.state.to_string(),
            elapsed_ms: outcome.elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        });
    }
}

/// Dispatches worker runs under an admission ceiling and per-worker timeout
#[derive(Clone)]
pub struct WorkerDispatcher {
    runtime: Arc<dyn ContainerRuntime>,
    max_concurrent: usize,
    worker_timeout: Duration,
    events: Option<OutcomeEvents>,
}

impl WorkerDispatcher {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        max_concurrent: usize,
        worker_timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            max_concurrent: max_concurrent.max(1),
            worker_timeout,
            events: None,
        }
    }

    pub fn with_events(mut self, events: OutcomeEvents) -> Self {
        self.events = Some(events);
        self
    }

    /// Spawn one task per run; returns immediately
    pub fn spawn(&self, runs: Vec<PluginRun>, scan_id: &str) -> DispatchHandle {
        let total = runs.len();
        let gate = Arc::new(Semaphore::new(self.max_concurrent));
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(total.max(1));

        debug!(
            scan_id = %scan_id,
            workers = total,
            max_concurrent = self.max_concurrent,
            "Dispatching workers"
        );

        for run in runs {
            let runtime = self.runtime.clone();
            let gate = gate.clone();
            let cancel = cancel.clone();
            let tx = tx.clone();
            let scan_id = scan_id.to_string();
            let worker_timeout = self.worker_timeout;

            tokio::spawn(async move {
                let outcome =
                    run_worker(runtime, run, scan_id, gate, cancel, worker_timeout).await;
                // Receiver is gone once the scan has given up waiting
                let _ = tx.send(outcome).await;
            });
        }

        DispatchHandle {
            rx,
            total,
            cancel: cancel.clone(),
            _cancel_on_drop: cancel.drop_guard(),
            events: self.events.clone(),
        }
    }

    /// Spawn and collect in one step
    pub async fn dispatch(
        &self,
        runs: Vec<PluginRun>,
        scan_id: &str,
        deadline: Instant,
    ) -> Result<Vec<WorkerOutcome>, ScanError> {
        self.spawn(runs, scan_id).collect(deadline).await
    }
}

/// Outcomes of one dispatch, still arriving
///
/// Dropping the handle cancels admission of workers not yet started.
pub struct DispatchHandle {
    rx: mpsc::Receiver<WorkerOutcome>,
    total: usize,
    cancel: CancellationToken,
    _cancel_on_drop: DropGuard,
    events: Option<OutcomeEvents>,
}

impl DispatchHandle {
    /// Number of dispatched workers
    pub fn total(&self) -> usize {
        self.total
    }

    /// Wait for every outcome, or until `deadline`
    ///
    /// At the deadline, admission waits are cancelled and
    /// [`ScanError::ScanDeadlineExceeded`] is returned without waiting for
    /// running workers.
    pub async fn collect(mut self, deadline: Instant) -> Result<Vec<WorkerOutcome>, ScanError> {
        let total = self.total;
        let mut outcomes = Vec::with_capacity(total);
        let rx = &mut self.rx;
        let events = &self.events;

        let waited = timeout_at(deadline, async {
            while let Some(outcome) = rx.recv().await {
                log_outcome(&outcome);
                if let Some(events) = events {
                    events.worker_finished(&outcome);
                }
                outcomes.push(outcome);
            }
        })
        .await;

        match waited {
            Ok(()) => Ok(outcomes),
            Err(_) => {
                self.cancel.cancel();
                let finished = outcomes.len();
                let outstanding = total - finished;
                warn!(finished, outstanding, "Scan deadline reached, abandoning outstanding workers");
                Err(ScanError::ScanDeadlineExceeded {
                    finished,
                    outstanding,
                })
            }
        }
    }
}

fn log_outcome(outcome: &WorkerOutcome) {
    match (&outcome.state, &outcome.error) {
        (TerminalState::Completed, _) => info!(
            plugin = %outcome.plugin,
            scan_id = %outcome.scan_id,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Plugin completed"
        ),
        (state, Some(error)) => warn!(
            plugin = %outcome.plugin,
            scan_id = %outcome.scan_id,
            state = %state,
            error = %error,
            "Plugin did not complete"
        ),
        (state, None) => warn!(
            plugin = %outcome.plugin,
            scan_id = %outcome.scan_id,
            state = %state,
            reason = ?outcome.skip_reason,
            "Plugin did not complete"
        ),
    }
}

/// Admit, run and classify one worker
pub(crate) async fn run_worker(
    runtime: Arc<dyn ContainerRuntime>,
    run: PluginRun,
    scan_id: String,
    gate: Arc<Semaphore>,
    cancel: CancellationToken,
    worker_timeout: Duration,
) -> WorkerOutcome {
    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(plugin = %run.plugin, "Admission cancelled at scan deadline");
            return WorkerOutcome::skipped(&run.plugin, &scan_id, SkipReason::DeadlineCancelled);
        }
        permit = gate.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return WorkerOutcome::skipped(&run.plugin, &scan_id, SkipReason::GateClosed),
        },
    };

    debug!(plugin = %run.plugin, scan_id = %scan_id, "Running plugin");
    let started = Instant::now();
    let result = timeout(worker_timeout, runtime.run_plugin(&run)).await;
    drop(permit);

    match result {
        Ok(Ok(())) => WorkerOutcome::completed(&run.plugin, &scan_id, started.elapsed()),
        Ok(Err(e)) => WorkerOutcome::errored(
            &run.plugin,
            &scan_id,
            ScanError::WorkerExecution {
                plugin: run.plugin.clone(),
                source: Box::new(e),
            },
            started.elapsed(),
        ),
        Err(_) => {
            // The unit outlives the dropped run; remove it by name
            if let Err(e) = runtime.remove(&run.unit_name, true, true, false).await {
                warn!(
                    plugin = %run.plugin,
                    unit = %run.unit_name,
                    error = %e,
                    "Failed to remove timed-out worker unit"
                );
            }
            WorkerOutcome::timed_out(&run.plugin, &scan_id, worker_timeout)
        }
    }
}

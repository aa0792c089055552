// crates/shape-load-core/src/accumulator.rs
// ============================================================================
// Module: Local Accumulator
// Description: Per-worker latency accumulation and report-cycle draining.
// Purpose: Collect samples from concurrent clients without lost updates.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every simulated client of a worker process records into one shared
//! [`LocalAccumulator`]. Recording, draining and resetting all take the same
//! mutex, so a drain observes either all or none of a concurrent batch and a
//! tick's samples are never lost or reported twice.
//!
//! [`WorkerPipeline`] wraps the accumulator with the worker's identity and the
//! explicit hooks the harness drives: [`WorkerPipeline::on_test_start`],
//! [`WorkerPipeline::on_report_cycle`] and [`WorkerPipeline::on_reset`].
//! A report whose delivery failed is handed back with
//! [`WorkerPipeline::on_delivery_failed`] and resent unchanged on the next
//! cycle, so the coordinator's sequence check drops it if the first attempt
//! had already landed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;

use crate::histogram::LatencySnapshot;
use crate::latency::RecordOutcome;

// ============================================================================
// SECTION: Identifiers
// ============================================================================

/// Identity of one worker process.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// Creates a worker id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// SECTION: Request Outcomes
// ============================================================================

/// Classification of one request, for the request counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// 200 or 204.
    Polled,
    /// 409 redirect followed.
    Redirected,
    /// 429 or 5xx.
    TransientFailure,
    /// Unexpected status, transport error or missing header.
    UnexpectedFailure,
    /// Body did not decode.
    DecodeFailure,
}

// ============================================================================
// SECTION: Local Accumulator
// ============================================================================

/// Accumulator state guarded by one lock.
#[derive(Debug, Default)]
struct AccumulatorState {
    /// Samples and counters since the last drain.
    snapshot: LatencySnapshot,
    /// Reset epoch the samples belong to.
    epoch: u64,
}

/// Process-wide latency accumulator shared by all client tasks of a worker.
///
/// # Invariants
/// - `drain` returns every sample recorded since the previous drain exactly once.
#[derive(Debug, Default)]
pub struct LocalAccumulator {
    /// Guarded state.
    state: Mutex<AccumulatorState>,
}

impl LocalAccumulator {
    /// Creates an empty accumulator at epoch 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the state, recovering from a poisoned lock.
    fn lock(&self) -> MutexGuard<'_, AccumulatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the samples and skip counts of one measured batch.
    pub fn record(&self, outcome: &RecordOutcome) {
        let mut state = self.lock();
        for sample in &outcome.samples {
            state.snapshot.record_sample(sample);
        }
        let requests = &mut state.snapshot.requests;
        requests.skipped_samples = requests.skipped_samples.saturating_add(outcome.skipped);
        requests.historical_samples =
            requests.historical_samples.saturating_add(outcome.historical);
    }

    /// Counts one request outcome.
    pub fn record_request(&self, outcome: RequestOutcome) {
        self.record_requests(outcome, 1);
    }

    /// Counts `count` requests with the same outcome.
    pub fn record_requests(&self, outcome: RequestOutcome, count: u64) {
        let mut state = self.lock();
        let requests = &mut state.snapshot.requests;
        let counter = match outcome {
            RequestOutcome::Polled => &mut requests.polls,
            RequestOutcome::Redirected => &mut requests.redirects,
            RequestOutcome::TransientFailure => &mut requests.transient_failures,
            RequestOutcome::UnexpectedFailure => &mut requests.unexpected_failures,
            RequestOutcome::DecodeFailure => &mut requests.decode_failures,
        };
        *counter = counter.saturating_add(count);
    }

    /// Swaps the held snapshot with an empty one and returns it with its epoch.
    pub fn drain(&self) -> (LatencySnapshot, u64) {
        let mut state = self.lock();
        (std::mem::take(&mut state.snapshot), state.epoch)
    }

    /// Returns a copy of the held snapshot without draining it.
    #[must_use]
    pub fn peek(&self) -> LatencySnapshot {
        self.lock().snapshot.clone()
    }

    /// Discards all held samples and counters.
    pub fn clear(&self) {
        self.lock().snapshot = LatencySnapshot::default();
    }

    /// Discards held data and moves to `epoch` atomically.
    pub fn reset(&self, epoch: u64) {
        let mut state = self.lock();
        state.snapshot = LatencySnapshot::default();
        state.epoch = epoch;
    }

    /// Moves to `epoch` if it is newer, discarding held data; returns true if moved.
    pub fn adopt_epoch(&self, epoch: u64) -> bool {
        let mut state = self.lock();
        if epoch <= state.epoch {
            return false;
        }
        state.snapshot = LatencySnapshot::default();
        state.epoch = epoch;
        true
    }

    /// Returns the current epoch.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Returns true when nothing has been recorded since the last drain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().snapshot.is_empty()
    }
}

// ============================================================================
// SECTION: Worker Reports
// ============================================================================

/// One report cycle's worth of worker data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    /// Reporting worker.
    pub worker_id: WorkerId,
    /// Per-worker report sequence number, starting at 1.
    pub sequence: u64,
    /// Reset epoch the data was collected in.
    pub epoch: u64,
    /// Drained data.
    pub snapshot: LatencySnapshot,
}

/// Worker-side hooks of the report pipeline.
///
/// # Invariants
/// - A drained snapshot travels under exactly one sequence number, however
///   many delivery attempts it takes.
#[derive(Debug)]
pub struct WorkerPipeline {
    /// This worker's identity.
    worker_id: WorkerId,
    /// Shared accumulator recorded into by client tasks.
    accumulator: Arc<LocalAccumulator>,
    /// Last issued report sequence.
    sequence: AtomicU64,
    /// Report whose delivery failed, awaiting resend.
    pending: Mutex<Option<WorkerReport>>,
}

impl WorkerPipeline {
    /// Creates a pipeline with a fresh accumulator.
    #[must_use]
    pub fn new(worker_id: WorkerId) -> Self {
        Self::with_accumulator(worker_id, Arc::new(LocalAccumulator::new()))
    }

    /// Creates a pipeline over an existing accumulator.
    #[must_use]
    pub const fn with_accumulator(worker_id: WorkerId, accumulator: Arc<LocalAccumulator>) -> Self {
        Self {
            worker_id,
            accumulator,
            sequence: AtomicU64::new(0),
            pending: Mutex::new(None),
        }
    }

    /// Returns the worker id.
    #[must_use]
    pub const fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Returns a handle to the shared accumulator.
    #[must_use]
    pub fn accumulator(&self) -> Arc<LocalAccumulator> {
        Arc::clone(&self.accumulator)
    }

    /// Locks the pending report, recovering from a poisoned lock.
    fn lock_pending(&self) -> MutexGuard<'_, Option<WorkerReport>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clears data left over from a previous run.
    pub fn on_test_start(&self) {
        self.lock_pending().take();
        self.accumulator.clear();
    }

    /// Returns the report to deliver this cycle.
    ///
    /// A pending report from the current epoch is returned unchanged; one from
    /// an older epoch is dropped. Otherwise the accumulator is drained into a
    /// report with the next sequence number.
    pub fn on_report_cycle(&self) -> WorkerReport {
        let pending = self.lock_pending().take();
        if let Some(report) = pending.filter(|report| report.epoch == self.accumulator.epoch()) {
            return report;
        }
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let (snapshot, epoch) = self.accumulator.drain();
        WorkerReport {
            worker_id: self.worker_id.clone(),
            sequence,
            epoch,
            snapshot,
        }
    }

    /// Holds `report` for resending on the next cycle.
    pub fn on_delivery_failed(&self, report: WorkerReport) {
        *self.lock_pending() = Some(report);
    }

    /// Returns true when a report is waiting to be resent.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.lock_pending().is_some()
    }

    /// Clears the accumulator and moves to the coordinator's new epoch.
    pub fn on_reset(&self, epoch: u64) {
        self.lock_pending().take();
        self.accumulator.reset(epoch);
    }
}

#[cfg(test)]
mod tests;

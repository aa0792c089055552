// crates/shape-load-core/src/aggregator.rs
// ============================================================================
// Module: Distributed Aggregator
// Description: Coordinator-side merge of worker reports.
// Purpose: Maintain the authoritative run-wide latency view.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! The coordinator owns exactly one [`DistributedAggregator`]. Each worker
//! report is merged at most once: reports carry a per-worker sequence number
//! and the reset epoch they were collected in, and the aggregator rejects
//! replays and reports from before the latest reset.
//!
//! Invariants:
//! - The held snapshot equals the sum of every merged report since the last
//!   reset, independent of arrival order.
//! - `on_reset` clears the snapshot and the worker ledger together.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use serde::Deserialize;
use serde::Serialize;

use crate::accumulator::WorkerId;
use crate::accumulator::WorkerReport;
use crate::histogram::LatencyHistogram;
use crate::histogram::LatencySnapshot;
use crate::latency::HistogramMode;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Result of offering a report to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// The report was merged.
    Merged,
    /// The worker already delivered this sequence number.
    Duplicate,
    /// The report predates the current reset epoch.
    Stale,
}

impl MergeOutcome {
    /// Returns the wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Merged => "merged",
            Self::Duplicate => "duplicate",
            Self::Stale => "stale",
        }
    }
}

/// Per-worker delivery ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerLedger {
    /// Highest merged sequence number.
    pub last_sequence: u64,
    /// Number of merged reports.
    pub reports_merged: u64,
    /// Number of latency samples merged.
    pub samples_merged: u64,
}

/// Guarded coordinator state.
#[derive(Debug, Default)]
struct MasterState {
    /// Merged data since the last reset.
    snapshot: LatencySnapshot,
    /// Current reset epoch.
    epoch: u64,
    /// Delivery ledger by worker.
    workers: BTreeMap<WorkerId, WorkerLedger>,
}

// ============================================================================
// SECTION: Aggregator
// ============================================================================

/// Run-wide latency aggregate held by the coordinator.
#[derive(Debug, Default)]
pub struct DistributedAggregator {
    /// Guarded state.
    state: Mutex<MasterState>,
}

impl DistributedAggregator {
    /// Creates an empty aggregator at epoch 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the state, recovering from a poisoned lock.
    fn lock(&self) -> MutexGuard<'_, MasterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clears data and the ledger counts at the start of a run.
    ///
    /// The epoch and each worker's last sequence are kept, so a report that
    /// was merged before the restart is still rejected as a duplicate.
    pub fn on_test_start(&self) {
        let mut state = self.lock();
        state.snapshot = LatencySnapshot::default();
        for ledger in state.workers.values_mut() {
            *ledger = WorkerLedger {
                last_sequence: ledger.last_sequence,
                ..WorkerLedger::default()
            };
        }
    }

    /// Merges a worker report unless it is a replay or predates the last reset.
    pub fn on_worker_report(&self, report: &WorkerReport) -> MergeOutcome {
        let mut state = self.lock();
        if report.epoch < state.epoch {
            return MergeOutcome::Stale;
        }
        let ledger = state.workers.entry(report.worker_id.clone()).or_default();
        if report.sequence <= ledger.last_sequence {
            return MergeOutcome::Duplicate;
        }
        ledger.last_sequence = report.sequence;
        ledger.reports_merged = ledger.reports_merged.saturating_add(1);
        ledger.samples_merged = ledger.samples_merged.saturating_add(report.snapshot.sample_count());
        state.snapshot.merge(&report.snapshot);
        MergeOutcome::Merged
    }

    /// Clears everything and starts a new epoch; returns the new epoch.
    pub fn on_reset(&self) -> u64 {
        let mut state = self.lock();
        state.epoch = state.epoch.saturating_add(1);
        state.snapshot = LatencySnapshot::default();
        state.workers.clear();
        state.epoch
    }

    /// Returns a copy of the merged snapshot.
    #[must_use]
    pub fn snapshot(&self) -> LatencySnapshot {
        self.lock().snapshot.clone()
    }

    /// Returns the merged bucket histogram for `mode`.
    ///
    /// Per-operation mode collapses the operation view, which matches the
    /// global histogram whenever every sample was keyed.
    #[must_use]
    pub fn histogram(&self, mode: HistogramMode) -> LatencyHistogram {
        let state = self.lock();
        match mode {
            HistogramMode::Global => state.snapshot.histogram.clone(),
            HistogramMode::PerOperation => state.snapshot.operations.collapse(),
        }
    }

    /// Returns the current reset epoch.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Returns the delivery ledger for every worker that reported since the last reset.
    #[must_use]
    pub fn workers(&self) -> BTreeMap<WorkerId, WorkerLedger> {
        self.lock().workers.clone()
    }
}

// crates/shape-load/src/server.rs
// ============================================================================
// Module: Stats Server
// Description: HTTP stats endpoint and coordinator report ingestion.
// Purpose: Expose the merged latency histogram and accept worker reports.
// Dependencies: axum, serde, shape-load-core, tokio
// ============================================================================

//! ## Overview
//! The coordinator serves a small JSON surface over its
//! [`DistributedAggregator`]:
//!
//! | Route | Response |
//! |---|---|
//! | `GET /latency` | `{"histogram": [[bucket, count], ...]}` |
//! | `GET /latency/operations` | `{"histogram": [[operation, {...}], ...]}` |
//! | `GET /stats` | epoch, sample count, request counters, worker ledger |
//! | `POST /report` | `{"outcome": ..., "epoch": n}` |
//! | `POST /reset` | `{"epoch": n}` |
//!
//! Read routes never mutate the aggregator.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;
use axum::routing::post;
use serde::Deserialize;
use serde::Serialize;
use shape_load_core::DistributedAggregator;
use shape_load_core::HistogramMode;
use shape_load_core::LatencyHistogram;
use shape_load_core::MergeOutcome;
use shape_load_core::OperationHistogram;
use shape_load_core::RequestCounters;
use shape_load_core::WorkerId;
use shape_load_core::WorkerLedger;
use shape_load_core::WorkerReport;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::HarnessError;
use crate::events::LoadEvent;
use crate::events::LoadEventSink;
use crate::events::REPORT_MERGED;
use crate::events::REPORT_REJECTED;
use crate::events::RESET;
use crate::events::SERVER_LISTENING;
use crate::report::ReportAck;
use crate::worker::wait_for_shutdown;

// ============================================================================
// SECTION: Responses
// ============================================================================

/// `GET /latency` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyResponse {
    /// Ascending `[bucket, count]` pairs.
    pub histogram: LatencyHistogram,
}

/// `GET /latency/operations` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationsResponse {
    /// Ascending `[operation, latency]` pairs.
    pub histogram: OperationHistogram,
}

/// `GET /stats` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsResponse {
    /// Current reset epoch.
    pub epoch: u64,
    /// Sample keying mode of the run.
    pub mode: HistogramMode,
    /// Latency samples merged since the last reset.
    pub samples: u64,
    /// Request counters merged since the last reset.
    pub requests: RequestCounters,
    /// Delivery ledger by worker.
    pub workers: BTreeMap<WorkerId, WorkerLedger>,
}

/// `POST /reset` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetResponse {
    /// Epoch started by the reset.
    pub epoch: u64,
}

// ============================================================================
// SECTION: State
// ============================================================================

/// Shared state of the coordinator routes.
pub struct CoordinatorState {
    /// Run-wide aggregate.
    aggregator: Arc<DistributedAggregator>,
    /// Sample keying mode for `/latency`.
    mode: HistogramMode,
    /// Event sink.
    events: Arc<dyn LoadEventSink>,
}

impl CoordinatorState {
    /// Creates coordinator state over `aggregator`.
    #[must_use]
    pub fn new(
        aggregator: Arc<DistributedAggregator>,
        mode: HistogramMode,
        events: Arc<dyn LoadEventSink>,
    ) -> Self {
        Self {
            aggregator,
            mode,
            events,
        }
    }
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// Builds the coordinator router.
pub fn router(state: Arc<CoordinatorState>) -> Router {
    Router::new()
        .route("/latency", get(handle_latency))
        .route("/latency/operations", get(handle_operations))
        .route("/stats", get(handle_stats))
        .route("/report", post(handle_report))
        .route("/reset", post(handle_reset))
        .with_state(state)
}

/// Binds the stats listener.
///
/// # Errors
///
/// Returns [`HarnessError::Server`] when the address cannot be bound.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, HarnessError> {
    TcpListener::bind(addr)
        .await
        .map_err(|err| HarnessError::Server(format!("stats bind {addr} failed: {err}")))
}

/// Serves the coordinator routes on `listener` until `shutdown` fires.
///
/// # Errors
///
/// Returns [`HarnessError::Server`] when the server fails.
pub async fn serve(
    listener: TcpListener,
    state: Arc<CoordinatorState>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), HarnessError> {
    let addr = listener
        .local_addr()
        .map_err(|err| HarnessError::Server(format!("stats listener address: {err}")))?;
    state.events.record(&LoadEvent::new(SERVER_LISTENING).addr(addr));
    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await
        .map_err(|err| HarnessError::Server(format!("stats server failed: {err}")))
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Handles `GET /latency`.
async fn handle_latency(State(state): State<Arc<CoordinatorState>>) -> Json<LatencyResponse> {
    Json(LatencyResponse {
        histogram: state.aggregator.histogram(state.mode),
    })
}

/// Handles `GET /latency/operations`.
async fn handle_operations(
    State(state): State<Arc<CoordinatorState>>,
) -> Json<OperationsResponse> {
    Json(OperationsResponse {
        histogram: state.aggregator.snapshot().operations,
    })
}

/// Handles `GET /stats`.
async fn handle_stats(State(state): State<Arc<CoordinatorState>>) -> Json<StatsResponse> {
    let snapshot = state.aggregator.snapshot();
    Json(StatsResponse {
        epoch: state.aggregator.epoch(),
        mode: state.mode,
        samples: snapshot.sample_count(),
        requests: snapshot.requests,
        workers: state.aggregator.workers(),
    })
}

/// Handles `POST /report`.
async fn handle_report(
    State(state): State<Arc<CoordinatorState>>,
    Json(report): Json<WorkerReport>,
) -> Json<ReportAck> {
    let outcome = state.aggregator.on_worker_report(&report);
    let epoch = state.aggregator.epoch();
    let event = match outcome {
        MergeOutcome::Merged => {
            LoadEvent::new(REPORT_MERGED).count(report.snapshot.sample_count())
        }
        MergeOutcome::Duplicate | MergeOutcome::Stale => LoadEvent::new(REPORT_REJECTED),
    };
    state.events.record(
        &event
            .worker(&report.worker_id)
            .sequence(report.sequence)
            .outcome(outcome.as_str())
            .epoch(epoch),
    );
    Json(ReportAck {
        outcome,
        epoch,
    })
}

/// Handles `POST /reset`.
async fn handle_reset(State(state): State<Arc<CoordinatorState>>) -> Json<ResetResponse> {
    let epoch = state.aggregator.on_reset();
    state.events.record(&LoadEvent::new(RESET).epoch(epoch));
    Json(ResetResponse {
        epoch,
    })
}

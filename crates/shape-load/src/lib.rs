// crates/shape-load/src/lib.rs
// ============================================================================
// Module: Shape Load Harness Library
// Description: Worker runtime, coordinator server, report transport and events.
// Purpose: Assemble the core, client and config crates into a runnable harness.
// Dependencies: axum, rand, reqwest, serde, shape-load-*, thiserror, tokio
// ============================================================================

//! ## Overview
//! The harness runs in one of three roles:
//! - **standalone**: a worker and the coordinator share one process and one
//!   [`shape_load_core::DistributedAggregator`];
//! - **worker**: simulated clients only, posting reports to a remote coordinator;
//! - **coordinator**: the stats server only, merging reports from workers.
//!
//! All roles share the [`events`] sink and stop on one `watch` shutdown signal.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod error;
pub mod events;
pub mod report;
pub mod server;
pub mod worker;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use error::HarnessError;
pub use events::LoadEvent;
pub use events::LoadEventSink;
pub use events::sink_from_config;
pub use report::HttpReportSink;
pub use report::LocalReportSink;
pub use report::ReportAck;
pub use report::ReportError;
pub use report::ReportSink;
pub use server::CoordinatorState;
pub use server::LatencyResponse;
pub use server::OperationsResponse;
pub use server::ResetResponse;
pub use server::StatsResponse;
pub use worker::WorkerRuntime;
pub use worker::WorkerSummary;
pub use worker::wait_for_shutdown;

// crates/shape-load/src/report.rs
// ============================================================================
// Module: Report Transport
// Description: Delivery of worker reports to the coordinator.
// Purpose: Carry drained snapshots in-process or over HTTP with one interface.
// Dependencies: reqwest, serde, shape-load-core, thiserror, url
// ============================================================================

//! ## Overview
//! A worker hands each drained [`WorkerReport`] to a [`ReportSink`]. The
//! standalone `run` mode merges straight into its own
//! [`DistributedAggregator`]; `worker` mode posts JSON to a remote
//! coordinator's `/report` endpoint. Both answer with a [`ReportAck`] carrying
//! the coordinator's current epoch, which is how workers learn about resets.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use shape_load_core::DistributedAggregator;
use shape_load_core::MergeOutcome;
use shape_load_core::WorkerReport;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Timeout for one report delivery.
pub const REPORT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// SECTION: Types
// ============================================================================

/// Coordinator answer to a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportAck {
    /// Merge result.
    pub outcome: MergeOutcome,
    /// Coordinator epoch after handling the report.
    pub epoch: u64,
}

/// Report delivery errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The coordinator URL could not be used.
    #[error("invalid coordinator url: {0}")]
    InvalidEndpoint(String),
    /// The request did not complete.
    #[error("report transport error: {0}")]
    Transport(String),
    /// The coordinator answered with a non-success status.
    #[error("coordinator returned status {0}")]
    Status(u16),
    /// The coordinator answer did not decode.
    #[error("invalid coordinator response: {0}")]
    Decode(String),
}

/// Destination for worker reports.
pub trait ReportSink: Send + Sync {
    /// Delivers one report.
    fn deliver(
        &self,
        report: &WorkerReport,
    ) -> impl Future<Output = Result<ReportAck, ReportError>> + Send;
}

// ============================================================================
// SECTION: In-Process Sink
// ============================================================================

/// Sink merging into an aggregator in the same process.
#[derive(Debug, Clone)]
pub struct LocalReportSink {
    /// Target aggregator.
    aggregator: Arc<DistributedAggregator>,
}

impl LocalReportSink {
    /// Creates a sink over `aggregator`.
    #[must_use]
    pub const fn new(aggregator: Arc<DistributedAggregator>) -> Self {
        Self {
            aggregator,
        }
    }
}

impl ReportSink for LocalReportSink {
    async fn deliver(&self, report: &WorkerReport) -> Result<ReportAck, ReportError> {
        let outcome = self.aggregator.on_worker_report(report);
        Ok(ReportAck {
            outcome,
            epoch: self.aggregator.epoch(),
        })
    }
}

// ============================================================================
// SECTION: HTTP Sink
// ============================================================================

/// Sink posting reports to a remote coordinator.
#[derive(Debug, Clone)]
pub struct HttpReportSink {
    /// HTTP client.
    http: reqwest::Client,
    /// `{coordinator}/report`.
    endpoint: Url,
}

impl HttpReportSink {
    /// Creates a sink posting to `coordinator`'s `/report` endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError`] when the endpoint cannot be derived or the
    /// HTTP client cannot be built.
    pub fn new(coordinator: &Url) -> Result<Self, ReportError> {
        let endpoint = coordinator
            .join("report")
            .map_err(|err| ReportError::InvalidEndpoint(err.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(REPORT_TIMEOUT)
            .build()
            .map_err(|err| ReportError::Transport(err.to_string()))?;
        Ok(Self {
            http,
            endpoint,
        })
    }

    /// Returns the report endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl ReportSink for HttpReportSink {
    async fn deliver(&self, report: &WorkerReport) -> Result<ReportAck, ReportError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(report)
            .send()
            .await
            .map_err(|err| ReportError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReportError::Status(status.as_u16()));
        }
        response.json::<ReportAck>().await.map_err(|err| ReportError::Decode(err.to_string()))
    }
}

// crates/shape-load/src/events.rs
// ============================================================================
// Module: Load Events
// Description: Structured JSON-line events for harness activity.
// Purpose: Record client, report and server lifecycle without a logging framework.
// Dependencies: serde, serde_json, shape-load-config
// ============================================================================

//! ## Overview
//! Every notable harness action is recorded as one [`LoadEvent`]: a flat JSON
//! object with an `event` name, a millisecond timestamp and whichever optional
//! fields apply. Sinks decide where events go; the harness never formats
//! free-text log lines.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use shape_load_config::LogSink;
use shape_load_config::LoggingConfig;
use shape_load_core::WorkerId;

// ============================================================================
// SECTION: Event Names
// ============================================================================

/// A simulated client started.
pub const CLIENT_STARTED: &str = "client_started";
/// A simulated client stopped.
pub const CLIENT_STOPPED: &str = "client_stopped";
/// A catch-up sync reached up-to-date.
pub const SYNC_COMPLETED: &str = "sync_completed";
/// A live poll was redirected with 409.
pub const REDIRECT: &str = "redirect";
/// A request failed.
pub const REQUEST_FAILED: &str = "request_failed";
/// A worker report was delivered.
pub const REPORT_SENT: &str = "report_sent";
/// A worker report could not be delivered.
pub const REPORT_FAILED: &str = "report_failed";
/// The coordinator merged a report.
pub const REPORT_MERGED: &str = "report_merged";
/// The coordinator rejected a duplicate or stale report.
pub const REPORT_REJECTED: &str = "report_rejected";
/// The run was reset to a new epoch.
pub const RESET: &str = "reset";
/// The stats server is listening.
pub const SERVER_LISTENING: &str = "server_listening";

// ============================================================================
// SECTION: Event Payload
// ============================================================================

/// One harness event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Worker the event belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    /// Simulated client index within the worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<u32>,
    /// HTTP status involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Outcome label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<&'static str>,
    /// Request, sample or report count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Reset epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u64>,
    /// Report sequence number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Listener address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    /// Error or detail message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Response headers of a failed request, repeated names joined by `, `.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

impl LoadEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(event: &'static str) -> Self {
        Self {
            event,
            timestamp_ms: now_millis(),
            worker_id: None,
            client: None,
            status: None,
            outcome: None,
            count: None,
            epoch: None,
            sequence: None,
            addr: None,
            message: None,
            headers: None,
        }
    }

    /// Sets the worker.
    #[must_use]
    pub fn worker(mut self, worker_id: &WorkerId) -> Self {
        self.worker_id = Some(worker_id.to_string());
        self
    }

    /// Sets the client index.
    #[must_use]
    pub const fn client(mut self, client: u32) -> Self {
        self.client = Some(client);
        self
    }

    /// Sets the HTTP status.
    #[must_use]
    pub const fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the outcome label.
    #[must_use]
    pub const fn outcome(mut self, outcome: &'static str) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Sets the count.
    #[must_use]
    pub const fn count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    /// Sets the epoch.
    #[must_use]
    pub const fn epoch(mut self, epoch: u64) -> Self {
        self.epoch = Some(epoch);
        self
    }

    /// Sets the report sequence.
    #[must_use]
    pub const fn sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Sets the listener address.
    #[must_use]
    pub fn addr(mut self, addr: impl ToString) -> Self {
        self.addr = Some(addr.to_string());
        self
    }

    /// Sets the detail message.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the response headers.
    #[must_use]
    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut fields = BTreeMap::<String, String>::new();
        for (name, value) in headers {
            fields
                .entry(name)
                .and_modify(|joined| {
                    joined.push_str(", ");
                    joined.push_str(&value);
                })
                .or_insert_with(|| value.clone());
        }
        self.headers = Some(fields);
        self
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Event sink interface.
pub trait LoadEventSink: Send + Sync {
    /// Records an event.
    fn record(&self, event: &LoadEvent);
}

/// Event sink that writes JSON lines to stderr.
pub struct StderrEventSink;

impl LoadEventSink for StderrEventSink {
    fn record(&self, event: &LoadEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(io::stderr(), "{payload}");
        }
    }
}

/// Event sink that appends JSON lines to a file.
pub struct FileEventSink {
    /// Log file guarded for concurrent writers.
    file: Mutex<std::fs::File>,
}

impl FileEventSink {
    /// Opens `path` for appending, creating it when missing.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl LoadEventSink for FileEventSink {
    fn record(&self, event: &LoadEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// Event sink that discards events.
pub struct NoopEventSink;

impl LoadEventSink for NoopEventSink {
    fn record(&self, _event: &LoadEvent) {}
}

/// Event sink that keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    /// Recorded events in arrival order.
    events: Mutex<Vec<LoadEvent>>,
}

impl MemoryEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every recorded event.
    #[must_use]
    pub fn events(&self) -> Vec<LoadEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Returns the names of recorded events in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|event| event.event)
            .collect()
    }
}

impl LoadEventSink for MemoryEventSink {
    fn record(&self, event: &LoadEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event.clone());
    }
}

/// Builds the sink selected by the logging configuration.
///
/// # Errors
///
/// Returns an I/O error when the file sink cannot open its path.
pub fn sink_from_config(config: &LoggingConfig) -> io::Result<Arc<dyn LoadEventSink>> {
    match (config.sink, &config.path) {
        (LogSink::Stderr, _) => Ok(Arc::new(StderrEventSink)),
        (LogSink::File, Some(path)) => Ok(Arc::new(FileEventSink::new(path)?)),
        (LogSink::File, None) => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "logging.path is required for the file sink",
        )),
        (LogSink::None, _) => Ok(Arc::new(NoopEventSink)),
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns milliseconds since the Unix epoch.
fn now_millis() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}

#[cfg(test)]
mod tests;

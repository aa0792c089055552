// crates/shape-load-core/src/latency.rs
// ============================================================================
// Module: Latency Recorder
// Description: Converts observed change batches into bucketed latency samples.
// Purpose: Measure database-write to client-delivery propagation latency.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! A simulated client reads the clock immediately before issuing a live poll
//! (`not_before`). Every data message in the returned batch whose
//! `created_at` is not earlier than `not_before` is a fresh propagation; older
//! rows are historical replay and are not measured. Each measured message
//! becomes one [`LatencySample`] in a 50ms [`LatencyBucket`].
//!
//! Messages sharing a `counter` are each measured: one sample per client that
//! observed the write, not one per write.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use time::Duration;
use time::OffsetDateTime;

use crate::clock::Clock;
use crate::clock::parse_timestamp;
use crate::message::ChangeMessage;
use crate::message::OperationId;

// ============================================================================
// SECTION: Buckets
// ============================================================================

/// Width of one latency bucket in milliseconds.
pub const BUCKET_WIDTH_MS: u64 = 50;

/// Lower bound of a 50ms latency range, in milliseconds.
///
/// # Invariants
/// - The value is always a multiple of [`BUCKET_WIDTH_MS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub struct LatencyBucket(u64);

impl LatencyBucket {
    /// Returns the bucket containing `latency_ms`.
    #[must_use]
    pub const fn from_millis(latency_ms: u64) -> Self {
        Self((latency_ms / BUCKET_WIDTH_MS) * BUCKET_WIDTH_MS)
    }

    /// Returns the bucket for an elapsed duration; negative durations land in bucket 0.
    #[must_use]
    pub fn from_duration(latency: Duration) -> Self {
        if latency.is_negative() {
            return Self(0);
        }
        let millis = u64::try_from(latency.whole_milliseconds()).unwrap_or(u64::MAX);
        Self::from_millis(millis)
    }

    /// Returns the bucket lower bound in milliseconds.
    #[must_use]
    pub const fn millis(self) -> u64 {
        self.0
    }
}

impl From<u64> for LatencyBucket {
    fn from(value: u64) -> Self {
        Self::from_millis(value)
    }
}

impl From<LatencyBucket> for u64 {
    fn from(bucket: LatencyBucket) -> Self {
        bucket.0
    }
}

impl fmt::Display for LatencyBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ============================================================================
// SECTION: Samples
// ============================================================================

/// How samples are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistogramMode {
    /// One global bucket histogram.
    Global,
    /// Buckets nested under the row's `counter`.
    #[default]
    PerOperation,
}

/// One measured propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySample {
    /// Operation the sample belongs to; `None` in global mode.
    pub operation: Option<OperationId>,
    /// Latency bucket.
    pub bucket: LatencyBucket,
    /// Row creation time.
    pub created_at: OffsetDateTime,
}

/// Result of measuring one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordOutcome {
    /// Measured samples.
    pub samples: Vec<LatencySample>,
    /// Data messages older than `not_before`.
    pub historical: u64,
    /// Data messages that could not be measured (bad timestamp or counter).
    pub skipped: u64,
}

// ============================================================================
// SECTION: Recorder
// ============================================================================

/// Turns change batches into latency samples.
#[derive(Clone)]
pub struct LatencyRecorder {
    /// Time source for the observation instant.
    clock: Arc<dyn Clock>,
    /// Sample keying mode.
    mode: HistogramMode,
}

impl fmt::Debug for LatencyRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatencyRecorder").field("mode", &self.mode).finish_non_exhaustive()
    }
}

impl LatencyRecorder {
    /// Creates a recorder reading `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, mode: HistogramMode) -> Self {
        Self {
            clock,
            mode,
        }
    }

    /// Returns the keying mode.
    #[must_use]
    pub const fn mode(&self) -> HistogramMode {
        self.mode
    }

    /// Returns the recorder's current time, for use as `not_before`.
    #[must_use]
    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// Measures every fresh data message in `batch`.
    #[must_use]
    pub fn measure(&self, not_before: OffsetDateTime, batch: &[ChangeMessage]) -> RecordOutcome {
        let mut outcome = RecordOutcome::default();
        for data in batch.iter().filter_map(ChangeMessage::as_data) {
            let Some(raw_created_at) = data.created_at() else {
                continue;
            };
            let Ok(created_at) = parse_timestamp(raw_created_at) else {
                outcome.skipped += 1;
                continue;
            };
            if created_at < not_before {
                outcome.historical += 1;
                continue;
            }
            let operation = match self.mode {
                HistogramMode::Global => None,
                HistogramMode::PerOperation => {
                    let Some(operation) = data.operation_id() else {
                        outcome.skipped += 1;
                        continue;
                    };
                    Some(operation)
                }
            };
            let latency = self.clock.now() - created_at;
            outcome.samples.push(LatencySample {
                operation,
                bucket: LatencyBucket::from_duration(latency),
                created_at,
            });
        }
        outcome
    }
}

#[cfg(test)]
mod tests;

// crates/shape-load-core/src/histogram.rs
// ============================================================================
// Module: Latency Histograms
// Description: Bucket histograms, per-operation histograms and snapshots.
// Purpose: Provide the additive data structures moved through report cycles.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Histograms are sparse `BTreeMap`s so iteration is always in ascending key
//! order, which is the order the stats endpoint serializes. Every `merge` is
//! plain addition (and `min` for first-seen times), so merging is associative
//! and commutative and a master view equals the sum of all worker drains in
//! any arrival order.
//!
//! Histograms serialize as ordered `[key, value]` pair sequences.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

use crate::latency::LatencyBucket;
use crate::latency::LatencySample;
use crate::message::OperationId;

// ============================================================================
// SECTION: Latency Histogram
// ============================================================================

/// Global `bucket -> count` histogram.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<(LatencyBucket, u64)>", into = "Vec<(LatencyBucket, u64)>")]
pub struct LatencyHistogram {
    /// Sample counts by bucket.
    buckets: BTreeMap<LatencyBucket, u64>,
}

impl LatencyHistogram {
    /// Creates an empty histogram.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one sample to `bucket`.
    pub fn record(&mut self, bucket: LatencyBucket) {
        self.add(bucket, 1);
    }

    /// Adds `count` samples to `bucket`.
    pub fn add(&mut self, bucket: LatencyBucket, count: u64) {
        if count == 0 {
            return;
        }
        let entry = self.buckets.entry(bucket).or_insert(0);
        *entry = entry.saturating_add(count);
    }

    /// Adds every bucket of `other` into this histogram.
    pub fn merge(&mut self, other: &Self) {
        for (bucket, count) in &other.buckets {
            self.add(*bucket, *count);
        }
    }

    /// Returns the count for `bucket`.
    #[must_use]
    pub fn get(&self, bucket: LatencyBucket) -> u64 {
        self.buckets.get(&bucket).copied().unwrap_or(0)
    }

    /// Returns the total number of samples.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.buckets.values().fold(0, |acc, count| acc.saturating_add(*count))
    }

    /// Returns true when no samples are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Iterates buckets in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (LatencyBucket, u64)> + '_ {
        self.buckets.iter().map(|(bucket, count)| (*bucket, *count))
    }

    /// Returns `(bucket_ms, count)` pairs in ascending bucket order.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(u64, u64)> {
        self.iter().map(|(bucket, count)| (bucket.millis(), count)).collect()
    }
}

impl From<Vec<(LatencyBucket, u64)>> for LatencyHistogram {
    fn from(pairs: Vec<(LatencyBucket, u64)>) -> Self {
        let mut histogram = Self::new();
        for (bucket, count) in pairs {
            histogram.add(bucket, count);
        }
        histogram
    }
}

impl From<LatencyHistogram> for Vec<(LatencyBucket, u64)> {
    fn from(histogram: LatencyHistogram) -> Self {
        histogram.buckets.into_iter().collect()
    }
}

impl FromIterator<(LatencyBucket, u64)> for LatencyHistogram {
    fn from_iter<I: IntoIterator<Item = (LatencyBucket, u64)>>(iter: I) -> Self {
        let mut histogram = Self::new();
        for (bucket, count) in iter {
            histogram.add(bucket, count);
        }
        histogram
    }
}

// ============================================================================
// SECTION: Operation Histogram
// ============================================================================

/// Latency distribution for one write operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationLatency {
    /// Sample counts by bucket.
    pub buckets: LatencyHistogram,
    /// Number of observations of this operation.
    pub total_count: u64,
    /// Earliest `created_at` seen for this operation.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub first_seen_at: Option<OffsetDateTime>,
}

impl OperationLatency {
    /// Adds one observation.
    fn record(&mut self, bucket: LatencyBucket, created_at: OffsetDateTime) {
        self.buckets.record(bucket);
        self.total_count = self.total_count.saturating_add(1);
        self.first_seen_at = earliest(self.first_seen_at, Some(created_at));
    }

    /// Adds another operation's observations.
    fn merge(&mut self, other: &Self) {
        self.buckets.merge(&other.buckets);
        self.total_count = self.total_count.saturating_add(other.total_count);
        self.first_seen_at = earliest(self.first_seen_at, other.first_seen_at);
    }
}

/// Returns the earlier of two optional instants.
fn earliest(left: Option<OffsetDateTime>, right: Option<OffsetDateTime>) -> Option<OffsetDateTime> {
    match (left, right) {
        (Some(left), Some(right)) => Some(left.min(right)),
        (value, None) | (None, value) => value,
    }
}

/// `operation_id -> latency distribution` histogram.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "Vec<(OperationId, OperationLatency)>",
    into = "Vec<(OperationId, OperationLatency)>"
)]
pub struct OperationHistogram {
    /// Distributions by operation.
    operations: BTreeMap<OperationId, OperationLatency>,
}

impl OperationHistogram {
    /// Creates an empty histogram.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one observation of `operation`.
    pub fn record(&mut self, operation: OperationId, bucket: LatencyBucket, created_at: OffsetDateTime) {
        self.operations.entry(operation).or_default().record(bucket, created_at);
    }

    /// Adds every operation of `other` into this histogram.
    pub fn merge(&mut self, other: &Self) {
        for (operation, latency) in &other.operations {
            self.operations.entry(*operation).or_default().merge(latency);
        }
    }

    /// Returns the distribution for `operation`.
    #[must_use]
    pub fn get(&self, operation: OperationId) -> Option<&OperationLatency> {
        self.operations.get(&operation)
    }

    /// Returns the number of distinct operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true when no operations are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Iterates operations in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (OperationId, &OperationLatency)> + '_ {
        self.operations.iter().map(|(operation, latency)| (*operation, latency))
    }

    /// Collapses all operations into one global bucket histogram.
    #[must_use]
    pub fn collapse(&self) -> LatencyHistogram {
        let mut histogram = LatencyHistogram::new();
        for latency in self.operations.values() {
            histogram.merge(&latency.buckets);
        }
        histogram
    }
}

impl From<Vec<(OperationId, OperationLatency)>> for OperationHistogram {
    fn from(pairs: Vec<(OperationId, OperationLatency)>) -> Self {
        let mut histogram = Self::new();
        for (operation, latency) in pairs {
            histogram.operations.entry(operation).or_default().merge(&latency);
        }
        histogram
    }
}

impl From<OperationHistogram> for Vec<(OperationId, OperationLatency)> {
    fn from(histogram: OperationHistogram) -> Self {
        histogram.operations.into_iter().collect()
    }
}

// ============================================================================
// SECTION: Request Counters
// ============================================================================

/// Additive request and failure counters reported alongside latencies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounters {
    /// Successful 200/204 polls.
    pub polls: u64,
    /// 409 redirects followed.
    pub redirects: u64,
    /// 429 and 5xx responses.
    pub transient_failures: u64,
    /// Other failed requests (unexpected status, transport, missing headers).
    pub unexpected_failures: u64,
    /// Bodies that did not decode.
    pub decode_failures: u64,
    /// Data messages that could not be measured.
    pub skipped_samples: u64,
    /// Data messages older than the poll that returned them.
    pub historical_samples: u64,
}

impl RequestCounters {
    /// Adds another set of counters.
    pub const fn merge(&mut self, other: &Self) {
        self.polls = self.polls.saturating_add(other.polls);
        self.redirects = self.redirects.saturating_add(other.redirects);
        self.transient_failures = self.transient_failures.saturating_add(other.transient_failures);
        self.unexpected_failures =
            self.unexpected_failures.saturating_add(other.unexpected_failures);
        self.decode_failures = self.decode_failures.saturating_add(other.decode_failures);
        self.skipped_samples = self.skipped_samples.saturating_add(other.skipped_samples);
        self.historical_samples = self.historical_samples.saturating_add(other.historical_samples);
    }

    /// Returns the number of failed requests of any kind.
    #[must_use]
    pub const fn failures(&self) -> u64 {
        self.transient_failures
            .saturating_add(self.unexpected_failures)
            .saturating_add(self.decode_failures)
    }

    /// Returns true when every counter is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ============================================================================
// SECTION: Snapshot
// ============================================================================

/// Unit of latency data moved from workers to the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencySnapshot {
    /// Global bucket histogram (every sample).
    #[serde(default)]
    pub histogram: LatencyHistogram,
    /// Per-operation histograms (samples keyed by counter).
    #[serde(default)]
    pub operations: OperationHistogram,
    /// Request and failure counters.
    #[serde(default)]
    pub requests: RequestCounters,
}

impl LatencySnapshot {
    /// Records one sample in the global view and, when keyed, the operation view.
    pub fn record_sample(&mut self, sample: &LatencySample) {
        self.histogram.record(sample.bucket);
        if let Some(operation) = sample.operation {
            self.operations.record(operation, sample.bucket, sample.created_at);
        }
    }

    /// Adds another snapshot.
    pub fn merge(&mut self, other: &Self) {
        self.histogram.merge(&other.histogram);
        self.operations.merge(&other.operations);
        self.requests.merge(&other.requests);
    }

    /// Returns the number of latency samples held.
    #[must_use]
    pub fn sample_count(&self) -> u64 {
        self.histogram.total()
    }

    /// Returns true when the snapshot holds no samples and no counters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty() && self.operations.is_empty() && self.requests.is_empty()
    }
}

#[cfg(test)]
mod tests;

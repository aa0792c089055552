// crates/shape-load-core/src/histogram/tests.rs
// ============================================================================
// Module: Histogram Unit Tests
// Description: Unit tests for histogram merge and serialization.
// Purpose: Confirm additive merge and the ordered pair wire shape.
// Dependencies: shape-load-core, serde_json, time
// ============================================================================

//! ## Overview
//! Exercises merge algebra on hand-built histograms; the randomized version
//! lives in `tests/proptest_merge.rs`.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

use serde_json::json;
use time::macros::datetime;

use super::LatencyHistogram;
use super::LatencySnapshot;
use super::OperationHistogram;
use super::RequestCounters;
use crate::latency::LatencyBucket;
use crate::message::OperationId;

fn histogram(pairs: &[(u64, u64)]) -> LatencyHistogram {
    pairs.iter().map(|(bucket, count)| (LatencyBucket::from_millis(*bucket), *count)).collect()
}

#[test]
fn merge_is_order_independent() {
    let first = histogram(&[(0, 3), (50, 1)]);
    let second = histogram(&[(0, 2)]);

    let mut left = LatencyHistogram::new();
    left.merge(&first);
    left.merge(&second);

    let mut right = LatencyHistogram::new();
    right.merge(&second);
    right.merge(&first);

    assert_eq!(left, right);
    assert_eq!(left.to_pairs(), vec![(0, 5), (50, 1)]);
}

#[test]
fn serializes_as_ascending_pairs() {
    let value = serde_json::to_value(histogram(&[(200, 1), (0, 4), (50, 2)])).unwrap();
    assert_eq!(value, json!([[0, 4], [50, 2], [200, 1]]));
}

#[test]
fn deserialization_normalizes_buckets_and_sums_duplicates() {
    let parsed: LatencyHistogram = serde_json::from_value(json!([[0, 1], [37, 2], [61, 1]])).unwrap();
    assert_eq!(parsed.to_pairs(), vec![(0, 3), (50, 1)]);
}

#[test]
fn zero_counts_are_not_stored() {
    let mut histogram = LatencyHistogram::new();
    histogram.add(LatencyBucket::from_millis(100), 0);
    assert!(histogram.is_empty());
}

#[test]
fn operation_merge_keeps_earliest_first_seen() {
    let early = datetime!(2024-10-18 10:00:00 UTC);
    let late = datetime!(2024-10-18 10:00:05 UTC);
    let op = OperationId::new(42);

    let mut worker_a = OperationHistogram::new();
    worker_a.record(op, LatencyBucket::from_millis(40), late);
    let mut worker_b = OperationHistogram::new();
    worker_b.record(op, LatencyBucket::from_millis(220), early);

    let mut master = OperationHistogram::new();
    master.merge(&worker_a);
    master.merge(&worker_b);

    let merged = master.get(op).unwrap();
    assert_eq!(merged.total_count, 2);
    assert_eq!(merged.first_seen_at, Some(early));
    assert_eq!(merged.buckets.to_pairs(), vec![(0, 1), (200, 1)]);
    assert_eq!(master.collapse().to_pairs(), vec![(0, 1), (200, 1)]);
}

#[test]
fn operation_histogram_serializes_nested_pairs() {
    let mut operations = OperationHistogram::new();
    operations.record(
        OperationId::new(7),
        LatencyBucket::from_millis(60),
        datetime!(2024-10-18 10:00:00 UTC),
    );
    let value = serde_json::to_value(&operations).unwrap();
    assert_eq!(
        value,
        json!([[7, {
            "buckets": [[50, 1]],
            "total_count": 1,
            "first_seen_at": "2024-10-18T10:00:00Z"
        }]])
    );
    let round: OperationHistogram = serde_json::from_value(value).unwrap();
    assert_eq!(round, operations);
}

#[test]
fn snapshot_merge_adds_counters() {
    let mut left = LatencySnapshot {
        requests: RequestCounters {
            polls: 2,
            transient_failures: 1,
            ..RequestCounters::default()
        },
        ..LatencySnapshot::default()
    };
    let right = LatencySnapshot {
        histogram: histogram(&[(0, 1)]),
        requests: RequestCounters {
            polls: 3,
            decode_failures: 1,
            ..RequestCounters::default()
        },
        ..LatencySnapshot::default()
    };
    left.merge(&right);
    assert_eq!(left.requests.polls, 5);
    assert_eq!(left.requests.failures(), 2);
    assert_eq!(left.sample_count(), 1);
    assert!(!left.is_empty());
    assert!(LatencySnapshot::default().is_empty());
}

// crates/shape-load-core/src/latency/tests.rs
// ============================================================================
// Module: Latency Recorder Unit Tests
// Description: Unit tests for bucketing and batch measurement.
// Purpose: Pin bucket boundaries and the historical-replay cutoff.
// Dependencies: shape-load-core, serde_json, time
// ============================================================================

//! ## Overview
//! Drives [`super::LatencyRecorder`] with a [`crate::clock::ManualClock`] so
//! every latency is exact.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

use std::sync::Arc;

use serde_json::json;
use time::Duration;
use time::OffsetDateTime;
use time::macros::datetime;

use super::HistogramMode;
use super::LatencyBucket;
use super::LatencyRecorder;
use crate::clock::ManualClock;
use crate::message::ChangeMessage;
use crate::message::OperationId;
use crate::message::decode_batch;

const T0: OffsetDateTime = datetime!(2024-10-18 10:00:00 UTC);

fn row(counter: i64, created_at: &str) -> serde_json::Value {
    json!({
        "headers": {"operation": "update"},
        "key": format!("\"public\".\"items\"/\"{counter}\""),
        "value": {"counter": counter.to_string(), "created_at": created_at}
    })
}

fn batch(rows: Vec<serde_json::Value>) -> Vec<ChangeMessage> {
    decode_batch(serde_json::Value::Array(rows).to_string().as_bytes()).unwrap()
}

fn recorder_at(now: OffsetDateTime, mode: HistogramMode) -> LatencyRecorder {
    LatencyRecorder::new(Arc::new(ManualClock::new(now)), mode)
}

#[test]
fn bucket_boundaries() {
    assert_eq!(LatencyBucket::from_millis(37).millis(), 0);
    assert_eq!(LatencyBucket::from_millis(61).millis(), 50);
    assert_eq!(LatencyBucket::from_millis(199).millis(), 150);
    assert_eq!(LatencyBucket::from_millis(0).millis(), 0);
    assert_eq!(LatencyBucket::from_millis(50).millis(), 50);
}

#[test]
fn negative_duration_lands_in_bucket_zero() {
    assert_eq!(LatencyBucket::from_duration(Duration::milliseconds(-120)).millis(), 0);
}

#[test]
fn latency_spans_second_boundaries() {
    // 10:00:00.980 -> 10:00:01.030 is 50ms, not the sub-second remainder.
    let recorder = recorder_at(datetime!(2024-10-18 10:00:01.030 UTC), HistogramMode::Global);
    let outcome = recorder.measure(T0, &batch(vec![row(1, "2024-10-18 10:00:00.980+00")]));
    assert_eq!(outcome.samples.len(), 1);
    assert_eq!(outcome.samples[0].bucket.millis(), 50);
}

#[test]
fn latency_spanning_whole_seconds_is_not_truncated() {
    let recorder = recorder_at(datetime!(2024-10-18 10:00:02.100 UTC), HistogramMode::Global);
    let outcome = recorder.measure(T0, &batch(vec![row(1, "2024-10-18 10:00:00.000+00")]));
    assert_eq!(outcome.samples[0].bucket.millis(), 2_100);
}

#[test]
fn non_utc_created_at_uses_offset_aware_arithmetic() {
    let recorder = recorder_at(datetime!(2024-10-18 10:00:00.120 UTC), HistogramMode::Global);
    let outcome = recorder.measure(T0, &batch(vec![row(1, "2024-10-18 12:00:00.010+02")]));
    assert_eq!(outcome.samples[0].bucket.millis(), 100);
}

#[test]
fn rows_older_than_not_before_are_historical() {
    let recorder = recorder_at(datetime!(2024-10-18 10:00:01 UTC), HistogramMode::PerOperation);
    let outcome = recorder.measure(
        T0,
        &batch(vec![row(1, "2024-10-18 09:59:59.999+00"), row(2, "2024-10-18 10:00:00+00")]),
    );
    assert_eq!(outcome.historical, 1);
    assert_eq!(outcome.samples.len(), 1);
    assert_eq!(outcome.samples[0].operation, Some(OperationId::new(2)));
}

#[test]
fn repeated_counter_is_measured_once_per_observation() {
    let recorder = recorder_at(T0 + Duration::milliseconds(40), HistogramMode::PerOperation);
    let created = "2024-10-18 10:00:00+00";
    let outcome = recorder.measure(T0, &batch(vec![row(42, created), row(42, created)]));
    assert_eq!(outcome.samples.len(), 2);
    assert!(outcome.samples.iter().all(|sample| sample.operation == Some(OperationId::new(42))));
}

#[test]
fn global_mode_does_not_key_by_operation() {
    let recorder = recorder_at(T0 + Duration::milliseconds(40), HistogramMode::Global);
    let outcome = recorder.measure(T0, &batch(vec![row(42, "2024-10-18 10:00:00+00")]));
    assert_eq!(outcome.samples[0].operation, None);
}

#[test]
fn unmeasurable_rows_are_counted_as_skipped() {
    let recorder = recorder_at(T0 + Duration::milliseconds(40), HistogramMode::PerOperation);
    let rows = vec![
        row(1, "not a time+00"),
        json!({"headers": {"operation": "insert"}, "key": "k", "value": {"created_at": "2024-10-18 10:00:00+00"}}),
        json!({"headers": {"operation": "insert"}, "key": "k2", "value": {"counter": "3"}}),
        json!({"headers": {"control": "up-to-date"}}),
    ];
    let outcome = recorder.measure(T0, &batch(rows));
    assert!(outcome.samples.is_empty());
    assert_eq!(outcome.skipped, 2);
    assert_eq!(outcome.historical, 0);
}

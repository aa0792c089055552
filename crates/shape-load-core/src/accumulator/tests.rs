// crates/shape-load-core/src/accumulator/tests.rs
// ============================================================================
// Module: Local Accumulator Unit Tests
// Description: Unit tests for recording, draining and worker hooks.
// Purpose: Confirm drains are exact and concurrent records are not lost.
// Dependencies: shape-load-core, time
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

use std::sync::Arc;
use std::thread;

use time::macros::datetime;

use super::LocalAccumulator;
use super::RequestOutcome;
use super::WorkerId;
use super::WorkerPipeline;
use crate::latency::LatencyBucket;
use crate::latency::LatencySample;
use crate::latency::RecordOutcome;
use crate::message::OperationId;

fn outcome(samples: &[(i64, u64)]) -> RecordOutcome {
    RecordOutcome {
        samples: samples
            .iter()
            .map(|(operation, millis)| LatencySample {
                operation: Some(OperationId::new(*operation)),
                bucket: LatencyBucket::from_millis(*millis),
                created_at: datetime!(2024-10-18 10:00:00 UTC),
            })
            .collect(),
        historical: 1,
        skipped: 0,
    }
}

#[test]
fn drain_returns_everything_once() {
    let accumulator = LocalAccumulator::new();
    accumulator.record(&outcome(&[(1, 40), (2, 220)]));
    accumulator.record_request(RequestOutcome::Polled);

    let (first, epoch) = accumulator.drain();
    assert_eq!(epoch, 0);
    assert_eq!(first.histogram.to_pairs(), vec![(0, 1), (200, 1)]);
    assert_eq!(first.operations.len(), 2);
    assert_eq!(first.requests.polls, 1);
    assert_eq!(first.requests.historical_samples, 1);

    let (second, _) = accumulator.drain();
    assert!(second.is_empty());
    assert!(accumulator.is_empty());
}

#[test]
fn request_outcomes_hit_their_counters() {
    let accumulator = LocalAccumulator::new();
    for outcome in [
        RequestOutcome::Polled,
        RequestOutcome::Redirected,
        RequestOutcome::TransientFailure,
        RequestOutcome::TransientFailure,
        RequestOutcome::UnexpectedFailure,
        RequestOutcome::DecodeFailure,
    ] {
        accumulator.record_request(outcome);
    }
    let requests = accumulator.peek().requests;
    assert_eq!(requests.polls, 1);
    assert_eq!(requests.redirects, 1);
    assert_eq!(requests.transient_failures, 2);
    assert_eq!(requests.failures(), 4);
}

#[test]
fn concurrent_records_are_not_lost() {
    let accumulator = Arc::new(LocalAccumulator::new());
    let handles: Vec<_> = (0 .. 8)
        .map(|worker| {
            let accumulator = Arc::clone(&accumulator);
            thread::spawn(move || {
                for _ in 0 .. 250 {
                    accumulator.record(&outcome(&[(worker, 10)]));
                }
            })
        })
        .collect();
    let mut drained = 0;
    for _ in 0 .. 20 {
        drained += accumulator.drain().0.sample_count();
    }
    for handle in handles {
        handle.join().unwrap();
    }
    drained += accumulator.drain().0.sample_count();
    assert_eq!(drained, 2_000);
}

#[test]
fn reset_discards_and_moves_epoch() {
    let accumulator = LocalAccumulator::new();
    accumulator.record(&outcome(&[(1, 40)]));
    accumulator.reset(3);
    assert!(accumulator.is_empty());
    assert_eq!(accumulator.epoch(), 3);
    assert!(!accumulator.adopt_epoch(2));
    assert!(!accumulator.adopt_epoch(3));
    accumulator.record(&outcome(&[(1, 40)]));
    assert!(accumulator.adopt_epoch(4));
    assert!(accumulator.is_empty());
}

#[test]
fn pipeline_sequences_start_at_one_and_survive_reset() {
    let pipeline = WorkerPipeline::new(WorkerId::new("worker-a"));
    pipeline.accumulator().record(&outcome(&[(1, 40)]));

    let first = pipeline.on_report_cycle();
    assert_eq!(first.sequence, 1);
    assert_eq!(first.worker_id.as_str(), "worker-a");
    assert_eq!(first.snapshot.sample_count(), 1);

    pipeline.on_reset(1);
    let second = pipeline.on_report_cycle();
    assert_eq!(second.sequence, 2);
    assert_eq!(second.epoch, 1);
    assert!(second.snapshot.is_empty());
}

#[test]
fn test_start_clears_leftovers() {
    let pipeline = WorkerPipeline::new(WorkerId::new("worker-a"));
    pipeline.accumulator().record(&outcome(&[(1, 40)]));
    pipeline.on_test_start();
    assert!(pipeline.on_report_cycle().snapshot.is_empty());
}

#[test]
fn failed_report_is_resent_under_its_sequence() {
    let pipeline = WorkerPipeline::new(WorkerId::new("worker-a"));
    pipeline.accumulator().record(&outcome(&[(1, 40)]));
    let first = pipeline.on_report_cycle();
    pipeline.accumulator().record(&outcome(&[(2, 60)]));

    pipeline.on_delivery_failed(first.clone());
    assert!(pipeline.has_pending());
    let resent = pipeline.on_report_cycle();
    assert_eq!(resent, first);
    assert!(!pipeline.has_pending());

    let next = pipeline.on_report_cycle();
    assert_eq!(next.sequence, first.sequence + 1);
    assert_eq!(next.snapshot.sample_count(), 1);
}

#[test]
fn pending_report_is_dropped_by_a_reset() {
    let pipeline = WorkerPipeline::new(WorkerId::new("worker-a"));
    pipeline.accumulator().record(&outcome(&[(1, 40)]));
    let first = pipeline.on_report_cycle();
    pipeline.on_delivery_failed(first.clone());
    assert!(pipeline.accumulator().adopt_epoch(1));

    let next = pipeline.on_report_cycle();
    assert_eq!(next.epoch, 1);
    assert_eq!(next.sequence, first.sequence + 1);
    assert!(next.snapshot.is_empty());

    pipeline.on_delivery_failed(next);
    pipeline.on_reset(2);
    assert!(!pipeline.has_pending());
}

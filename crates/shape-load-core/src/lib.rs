// crates/shape-load-core/src/lib.rs
// ============================================================================
// Module: Shape Load Core Library
// Description: Shape state, change messages, latency buckets and histograms.
// Purpose: Provide the protocol-independent core of the shape load harness.
// Dependencies: serde, serde_json, thiserror, time, url
// ============================================================================

//! ## Overview
//! `shape-load-core` holds everything the load harness needs that does not
//! touch the network: the validated [`ShapeState`], the decoded
//! [`ChangeMessage`] model, the [`LatencyRecorder`] that turns change batches
//! into bucketed samples, and the accumulate/drain/merge pipeline built from
//! [`LocalAccumulator`], [`WorkerPipeline`] and [`DistributedAggregator`].
//!
//! Invariants:
//! - Every [`ShapeState`] mutation is validated; invalid shapes never persist.
//! - Latency is computed with timezone-aware arithmetic from an injected [`Clock`].
//! - Histogram merge is additive, associative and commutative.
//! - Draining an accumulator swaps it with an empty one under a single lock.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod accumulator;
pub mod aggregator;
pub mod clock;
pub mod histogram;
pub mod latency;
pub mod message;
pub mod shape;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use accumulator::LocalAccumulator;
pub use accumulator::RequestOutcome;
pub use accumulator::WorkerId;
pub use accumulator::WorkerPipeline;
pub use accumulator::WorkerReport;
pub use aggregator::DistributedAggregator;
pub use aggregator::MergeOutcome;
pub use aggregator::WorkerLedger;
pub use clock::Clock;
pub use clock::ManualClock;
pub use clock::SystemClock;
pub use clock::TimestampError;
pub use clock::parse_timestamp;
pub use histogram::LatencyHistogram;
pub use histogram::LatencySnapshot;
pub use histogram::OperationHistogram;
pub use histogram::OperationLatency;
pub use histogram::RequestCounters;
pub use latency::BUCKET_WIDTH_MS;
pub use latency::HistogramMode;
pub use latency::LatencyBucket;
pub use latency::LatencyRecorder;
pub use latency::LatencySample;
pub use latency::RecordOutcome;
pub use message::ChangeMessage;
pub use message::ControlMessage;
pub use message::DataMessage;
pub use message::MessageError;
pub use message::Operation;
pub use message::OperationId;
pub use message::PollResult;
pub use message::decode_batch;
pub use shape::INITIAL_OFFSET;
pub use shape::Shape;
pub use shape::ShapeError;
pub use shape::ShapeParams;
pub use shape::ShapeState;
pub use shape::validate;

// crates/shape-load-client/src/lib.rs
// ============================================================================
// Module: Shape Load Client Library
// Description: HTTP client for the shape-sync protocol.
// Purpose: Drive catch-up and live polling for one simulated client.
// Dependencies: reqwest, shape-load-core, tokio, url
// ============================================================================

//! ## Overview
//! [`SyncClient`] owns one [`shape_load_core::ShapeState`] and one
//! `reqwest::Client` and speaks the shape-sync protocol: a catch-up loop
//! ([`SyncClient::sync`]) followed by long polls ([`SyncClient::live`]).
//! Failures are surfaced as [`SyncError`] and never retried, except for the
//! 409 shape-rotation redirect.
//!
//! [`SharedCheckpoint`] lets clients started after the first catch-up adopt
//! the most advanced known position instead of replaying the whole shape.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod checkpoint;
pub mod client;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use checkpoint::Checkpoint;
pub use checkpoint::SharedCheckpoint;
pub use client::Dialect;
pub use client::SyncClient;
pub use client::SyncClientConfig;
pub use client::SyncError;
pub use client::SyncSummary;

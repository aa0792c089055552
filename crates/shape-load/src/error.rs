// crates/shape-load/src/error.rs
// ============================================================================
// Module: Harness Errors
// Description: Error type for harness runtime failures.
// Purpose: Give callers one stable error enum across config, server and transport.
// Dependencies: shape-load-config, thiserror
// ============================================================================

//! ## Overview
//! [`HarnessError`] covers failures that stop a harness role from starting or
//! serving. Request failures inside simulated clients never surface here;
//! they are counted and logged as events.

use shape_load_config::ConfigError;
use thiserror::Error;

use crate::report::ReportError;

/// Harness runtime errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The stats server failed to bind or serve.
    #[error("server error: {0}")]
    Server(String),
    /// Report delivery could not be set up.
    #[error(transparent)]
    Report(#[from] ReportError),
    /// Event sink or other local I/O failure.
    #[error("io error: {0}")]
    Io(String),
}

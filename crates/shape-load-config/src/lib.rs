// crates/shape-load-config/src/lib.rs
// ============================================================================
// Module: Shape Load Config Library
// Description: Configuration model, loading and validation.
// Purpose: Single source of truth for shape-load.toml semantics.
// Dependencies: serde, shape-load-core, toml, url
// ============================================================================

//! ## Overview
//! `shape-load-config` defines the configuration model for the load harness:
//! the sync target, the simulated client population, the report cycle, the
//! coordinator listener and event logging. Loading is strict and fails
//! closed; `DATABASE_ID` and `AUTH_TOKEN` override the target section.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod examples;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use examples::config_toml_example;

// crates/shape-load-client/src/checkpoint.rs
// ============================================================================
// Module: Shared Catch-Up Checkpoint
// Description: Process-wide record of the most advanced known shape position.
// Purpose: Let late-starting clients skip the catch-up replay.
// Dependencies: shape-load-core
// ============================================================================

//! ## Overview
//! The first client of a worker runs the full catch-up loop and publishes its
//! position. Every later client adopts the published position and goes
//! straight to long polling. Live polls keep the checkpoint moving: a position
//! on the held shape replaces the held one when its cursor is numerically
//! greater, and a position on another shape replaces it outright so a handle
//! is never paired with another shape's offset.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use shape_load_core::ShapeParams;

// ============================================================================
// SECTION: Types
// ============================================================================

/// A synced shape position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Shape identifier.
    pub shape_id: String,
    /// Offset reached.
    pub offset: String,
    /// Live-mode cursor, when one has been observed.
    pub cursor: Option<String>,
}

impl Checkpoint {
    /// Returns continuation parameters starting at this position.
    #[must_use]
    pub fn to_params(&self) -> ShapeParams {
        ShapeParams {
            offset: self.offset.clone(),
            shape_id: Some(self.shape_id.clone()),
            cursor: self.cursor.clone(),
            live: false,
        }
    }

    /// Returns the cursor as a number, if it is one.
    fn numeric_cursor(&self) -> Option<u64> {
        self.cursor.as_deref().and_then(|cursor| cursor.parse().ok())
    }
}

/// Shared checkpoint handed to every client task of a worker.
#[derive(Debug, Default)]
pub struct SharedCheckpoint {
    /// Held position, if any client has synced.
    inner: Mutex<Option<Checkpoint>>,
}

impl SharedCheckpoint {
    /// Creates an empty checkpoint.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the held position, recovering from a poisoned lock.
    fn lock(&self) -> MutexGuard<'_, Option<Checkpoint>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the held position.
    #[must_use]
    pub fn current(&self) -> Option<Checkpoint> {
        self.lock().clone()
    }

    /// Publishes the position reached by a completed catch-up.
    ///
    /// The held cursor is kept only while the shape id is unchanged.
    pub fn record_sync(&self, params: &ShapeParams) {
        let Some(shape_id) = synced_id(params) else {
            return;
        };
        let mut held = self.lock();
        let cursor = held
            .as_ref()
            .filter(|checkpoint| checkpoint.shape_id == shape_id)
            .and_then(|checkpoint| checkpoint.cursor.clone());
        *held = Some(Checkpoint {
            shape_id,
            offset: params.offset.clone(),
            cursor,
        });
    }

    /// Folds in the position observed after a live poll.
    pub fn observe_live(&self, params: &ShapeParams) {
        let Some(shape_id) = synced_id(params) else {
            return;
        };
        let mut held = self.lock();
        if held.as_ref().is_none_or(|checkpoint| checkpoint.shape_id != shape_id) {
            *held = Some(Checkpoint {
                shape_id,
                offset: params.offset.clone(),
                cursor: params.cursor.clone(),
            });
            return;
        }
        let Some(checkpoint) = held.as_mut() else {
            return;
        };
        let observed = params.cursor.as_deref().and_then(|cursor| cursor.parse::<u64>().ok());
        let advance = match (observed, checkpoint.numeric_cursor()) {
            (Some(observed), Some(current)) => observed > current,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if advance {
            checkpoint.offset.clone_from(&params.offset);
            checkpoint.cursor.clone_from(&params.cursor);
        }
    }

    /// Forgets the held position.
    pub fn clear(&self) {
        *self.lock() = None;
    }
}

/// Returns the shape id of a synced position.
fn synced_id(params: &ShapeParams) -> Option<String> {
    if params.is_initial() {
        return None;
    }
    params.shape_id.clone()
}

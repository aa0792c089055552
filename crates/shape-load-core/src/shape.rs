// crates/shape-load-core/src/shape.rs
// ============================================================================
// Module: Shape State
// Description: Validated addressing and cursor state for one shape subscription.
// Purpose: Keep offset/shape id/cursor continuation tokens consistent.
// Dependencies: serde, thiserror, url
// ============================================================================

//! ## Overview
//! A [`Shape`] names a filtered subscription to a table's change stream plus
//! the continuation tokens the sync service hands back on every response.
//! [`ShapeState`] owns one shape and re-validates on every mutation, so a
//! client can never issue a request from a contradictory position.
//!
//! Invariants:
//! - `offset == "-1"` if and only if no `shape_id` is held.
//! - `live == true` requires `offset != "-1"`.
//! - `{base_url}{root_table}` parses as an absolute `http`/`https` URL.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Offset sent before a shape has been synced for the first time.
pub const INITIAL_OFFSET: &str = "-1";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when a shape is built or mutated.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    /// Shape parameters are missing or contradictory.
    #[error("invalid shape config: {0}")]
    InvalidConfig(String),
    /// The shape is in a state that does not allow the requested operation.
    #[error("invalid shape state: {0}")]
    InvalidState(String),
}

// ============================================================================
// SECTION: Shape Model
// ============================================================================

/// Continuation parameters for a shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeParams {
    /// Opaque stream offset; `-1` means "not yet synced".
    pub offset: String,
    /// Server-assigned shape identifier (the `handle` in newer protocol versions).
    #[serde(default, alias = "handle", skip_serializing_if = "Option::is_none")]
    pub shape_id: Option<String>,
    /// Live-mode cache-busting cursor issued by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// True once the shape has moved into long-polling mode.
    #[serde(default)]
    pub live: bool,
}

impl ShapeParams {
    /// Returns parameters for a shape that has never been synced.
    #[must_use]
    pub fn initial() -> Self {
        Self {
            offset: INITIAL_OFFSET.to_string(),
            shape_id: None,
            cursor: None,
            live: false,
        }
    }

    /// Returns true when the offset marks an unsynced shape.
    #[must_use]
    pub fn is_initial(&self) -> bool {
        self.offset == INITIAL_OFFSET
    }
}

impl Default for ShapeParams {
    fn default() -> Self {
        Self::initial()
    }
}

/// A named, filtered subscription to a table's change stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    /// Base URL of the shape API, for example `http://localhost:3000/v1/shape/`.
    pub base_url: String,
    /// Table appended to `base_url` to form the request path.
    pub root_table: String,
    /// Optional tenant database identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_id: Option<String>,
    /// Optional row filter predicate.
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,
    /// Continuation parameters.
    #[serde(default)]
    pub params: ShapeParams,
}

impl Shape {
    /// Creates an unsynced shape for the given endpoint and table.
    #[must_use]
    pub fn new(base_url: impl Into<String>, root_table: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            root_table: root_table.into(),
            database_id: None,
            where_clause: None,
            params: ShapeParams::initial(),
        }
    }

    /// Sets the database identifier.
    #[must_use]
    pub fn with_database_id(mut self, database_id: impl Into<String>) -> Self {
        self.database_id = Some(database_id.into());
        self
    }

    /// Sets the row filter predicate.
    #[must_use]
    pub fn with_where(mut self, predicate: impl Into<String>) -> Self {
        self.where_clause = Some(predicate.into());
        self
    }

    /// Replaces the continuation parameters.
    #[must_use]
    pub fn with_params(mut self, params: ShapeParams) -> Self {
        self.params = params;
        self
    }

    /// Returns the request URL without query parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::InvalidConfig`] when the URL does not parse or is
    /// not `http`/`https`.
    pub fn endpoint(&self) -> Result<Url, ShapeError> {
        let raw = format!("{}{}", self.base_url, self.root_table);
        let url = Url::parse(&raw)
            .map_err(|err| ShapeError::InvalidConfig(format!("invalid shape url {raw}: {err}")))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ShapeError::InvalidConfig(format!("unsupported url scheme: {other}"))),
        }
    }
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates a shape against the addressing and continuation invariants.
///
/// # Errors
///
/// Returns [`ShapeError::InvalidConfig`] when a required field is missing or
/// the offset, shape id and live flag contradict each other.
pub fn validate(shape: &Shape) -> Result<(), ShapeError> {
    if shape.base_url.trim().is_empty() {
        return Err(ShapeError::InvalidConfig("base_url is required".to_string()));
    }
    if shape.root_table.trim().is_empty() {
        return Err(ShapeError::InvalidConfig("root_table is required".to_string()));
    }
    if shape.params.offset.trim().is_empty() {
        return Err(ShapeError::InvalidConfig("offset is required".to_string()));
    }
    let has_shape_id = shape.params.shape_id.as_deref().is_some_and(|id| !id.is_empty());
    if shape.params.is_initial() && has_shape_id {
        return Err(ShapeError::InvalidConfig(
            "shape_id can't be provided when offset is -1".to_string(),
        ));
    }
    if !shape.params.is_initial() && !has_shape_id {
        return Err(ShapeError::InvalidConfig(
            "shape_id is required once offset is not -1".to_string(),
        ));
    }
    if shape.params.live && shape.params.is_initial() {
        return Err(ShapeError::InvalidConfig("live mode requires offset != -1".to_string()));
    }
    shape.endpoint()?;
    Ok(())
}

// ============================================================================
// SECTION: Shape State
// ============================================================================

/// Owned, always-valid state for one shape subscription.
///
/// # Invariants
/// - The held [`Shape`] passed [`validate`] after the most recent mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeState {
    /// Current validated shape.
    shape: Shape,
}

impl ShapeState {
    /// Validates and wraps a shape.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::InvalidConfig`] when the shape is invalid.
    pub fn new(shape: Shape) -> Result<Self, ShapeError> {
        validate(&shape)?;
        Ok(Self {
            shape,
        })
    }

    /// Validates then replaces the held shape.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::InvalidConfig`] when the new shape is invalid; the
    /// previous shape is kept in that case.
    pub fn set(&mut self, shape: Shape) -> Result<(), ShapeError> {
        validate(&shape)?;
        self.shape = shape;
        Ok(())
    }

    /// Returns the current shape.
    #[must_use]
    pub const fn get(&self) -> &Shape {
        &self.shape
    }

    /// Returns the current continuation parameters.
    #[must_use]
    pub const fn params(&self) -> &ShapeParams {
        &self.shape.params
    }

    /// Returns true once the shape has a server-assigned position.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        !self.shape.params.is_initial()
    }

    /// Records the continuation tokens returned by a successful response.
    ///
    /// The cursor is only replaced when the response carried one.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::InvalidConfig`] when the tokens would break an
    /// invariant (for example an offset of `-1` alongside a shape id).
    pub fn apply_continuation(
        &mut self,
        shape_id: String,
        offset: String,
        cursor: Option<String>,
    ) -> Result<(), ShapeError> {
        let mut next = self.shape.clone();
        next.params.shape_id = Some(shape_id);
        next.params.offset = offset;
        if cursor.is_some() {
            next.params.cursor = cursor;
        }
        self.set(next)
    }

    /// Rewrites the position after a shape rotation redirect.
    ///
    /// A redirect back to offset `-1` restarts the shape from scratch: the
    /// shape id is dropped and live mode is left, since an unsynced shape
    /// cannot carry an id.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::InvalidConfig`] when the redirect target is invalid.
    pub fn apply_redirect(&mut self, shape_id: String, offset: String) -> Result<(), ShapeError> {
        let mut next = self.shape.clone();
        if offset == INITIAL_OFFSET {
            next.params = ShapeParams {
                cursor: next.params.cursor.take(),
                ..ShapeParams::initial()
            };
        } else {
            next.params.shape_id = Some(shape_id);
            next.params.offset = offset;
        }
        self.set(next)
    }

    /// Returns the shape to its unsynced position, keeping its address.
    pub fn reset_to_initial(&mut self) {
        self.shape.params = ShapeParams::initial();
    }

    /// Marks the shape as long-polling.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::InvalidState`] when the shape has not been synced.
    pub fn enter_live(&mut self) -> Result<(), ShapeError> {
        if !self.is_synced() {
            return Err(ShapeError::InvalidState(
                "can't start live mode with offset -1".to_string(),
            ));
        }
        self.shape.params.live = true;
        Ok(())
    }
}

// crates/shape-load-core/src/clock.rs
// ============================================================================
// Module: Clock and Timestamps
// Description: Injectable wall clock and offset-aware timestamp parsing.
// Purpose: Keep latency arithmetic on a single timezone-aware time source.
// Dependencies: thiserror, time
// ============================================================================

//! ## Overview
//! Latency is the difference between the clock reading taken when a change is
//! observed and the row's `created_at` value. Both sides are
//! [`OffsetDateTime`] values, so subtraction is exact across second
//! boundaries and UTC offsets. The recorder never reads the wall clock
//! directly; hosts supply a [`Clock`] ([`SystemClock`] in production,
//! [`ManualClock`] in tests).
//!
//! `created_at` arrives either as RFC 3339 or as PostgreSQL `timestamptz`
//! text (`2024-10-18 10:00:00.123456+00`). Values without a UTC offset are
//! rejected rather than guessed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::sync::PoisonError;

use thiserror::Error;
use time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> OffsetDateTime;
}

/// Wall clock reading UTC system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    /// Current reading.
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub const fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Sets the current reading.
    pub fn set(&self, instant: OffsetDateTime) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = instant;
    }

    /// Moves the current reading forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *guard += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// SECTION: Timestamp Parsing
// ============================================================================

/// Errors raised while parsing a `created_at` value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimestampError {
    /// The value is empty.
    #[error("timestamp is empty")]
    Empty,
    /// The value carries no UTC offset.
    #[error("timestamp has no utc offset: {0}")]
    MissingOffset(String),
    /// The value does not parse.
    #[error("invalid timestamp {value}: {reason}")]
    Invalid {
        /// Raw input.
        value: String,
        /// Parser message.
        reason: String,
    },
}

/// Parses an RFC 3339 or PostgreSQL `timestamptz` string.
///
/// # Errors
///
/// Returns [`TimestampError`] when the value is empty, lacks an offset, or
/// does not parse.
pub fn parse_timestamp(raw: &str) -> Result<OffsetDateTime, TimestampError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TimestampError::Empty);
    }
    let normalized = normalize_timestamp(trimmed)?;
    OffsetDateTime::parse(&normalized, &Rfc3339).map_err(|err| TimestampError::Invalid {
        value: trimmed.to_string(),
        reason: err.to_string(),
    })
}

/// Rewrites PostgreSQL text output into RFC 3339 form.
///
/// Replaces the space date/time separator with `T` and expands `+HH` and
/// `+HHMM` offsets to `+HH:MM`.
fn normalize_timestamp(value: &str) -> Result<String, TimestampError> {
    let mut text = value.to_string();
    if text.as_bytes().get(10) == Some(&b' ') {
        text.replace_range(10 .. 11, "T");
    }
    let time_start = text.find(['T', 't']).map_or(0, |index| index + 1);
    let tail = &text[time_start ..];
    if tail.ends_with(['Z', 'z']) {
        return Ok(text);
    }
    let Some(sign) = tail.rfind(['+', '-']) else {
        return Err(TimestampError::MissingOffset(value.to_string()));
    };
    let offset_start = time_start + sign + 1;
    let offset = &text[offset_start ..];
    let expanded = match offset.len() {
        2 => format!("{text}:00"),
        4 if offset.is_ascii() && !offset.contains(':') => {
            format!("{}{}:{}", &text[.. offset_start], &offset[.. 2], &offset[2 ..])
        }
        _ => text.clone(),
    };
    Ok(expanded)
}

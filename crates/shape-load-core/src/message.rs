// crates/shape-load-core/src/message.rs
// ============================================================================
// Module: Change Messages
// Description: Decoded shape log messages and poll results.
// Purpose: Classify response bodies into control and data messages.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! A 200 response from the shape API carries a JSON array of messages. Each
//! message has a `headers` record; control messages carry a `control` header,
//! data messages carry an `operation` header plus a `key` and a `value` row.
//! Row values are kept as raw JSON so the latency recorder can read the
//! `counter` and `created_at` columns without a fixed table schema.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while classifying a raw message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// The message has neither a `control` nor an `operation` header.
    #[error("message has neither control nor operation header")]
    Unclassified,
    /// The `operation` header names an unknown operation.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
    /// A data message is missing a required field.
    #[error("data message missing {0}")]
    MissingField(&'static str),
}

// ============================================================================
// SECTION: Identifiers
// ============================================================================

/// Identity of one write operation, taken from the row's `counter` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(i64);

impl OperationId {
    /// Creates an operation id from a raw counter value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw counter value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Reads an operation id from a JSON integer or decimal string.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_i64().map(Self),
            Value::String(text) => text.trim().parse::<i64>().ok().map(Self),
            _ => None,
        }
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SECTION: Messages
// ============================================================================

/// Row operation carried by a data message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Row inserted.
    Insert,
    /// Row updated.
    Update,
    /// Row deleted.
    Delete,
}

impl Operation {
    /// Parses the wire label of an operation.
    fn parse(label: &str) -> Result<Self, MessageError> {
        match label {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(MessageError::UnknownOperation(other.to_string())),
        }
    }
}

/// A data message describing one row change.
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    /// Row key.
    pub key: String,
    /// Row operation.
    pub operation: Operation,
    /// Row values keyed by column name.
    pub value: Map<String, Value>,
    /// Raw message headers.
    pub headers: Map<String, Value>,
}

impl DataMessage {
    /// Returns the operation id from the `counter` column when it is readable.
    #[must_use]
    pub fn operation_id(&self) -> Option<OperationId> {
        self.value.get("counter").and_then(OperationId::from_json)
    }

    /// Returns the raw `created_at` column when present as a string.
    #[must_use]
    pub fn created_at(&self) -> Option<&str> {
        self.value.get("created_at").and_then(Value::as_str)
    }
}

/// A control message (for example `up-to-date` or `must-refetch`).
#[derive(Debug, Clone, PartialEq)]
pub struct ControlMessage {
    /// Control label.
    pub control: String,
    /// Raw message headers.
    pub headers: Map<String, Value>,
}

/// One entry of a shape log response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawMessage")]
pub enum ChangeMessage {
    /// Control message; ignored by latency measurement.
    Control(ControlMessage),
    /// Row change.
    Data(DataMessage),
}

impl ChangeMessage {
    /// Returns the data message when this is a row change.
    #[must_use]
    pub const fn as_data(&self) -> Option<&DataMessage> {
        match self {
            Self::Data(data) => Some(data),
            Self::Control(_) => None,
        }
    }
}

/// Wire form of a message before classification.
#[derive(Deserialize)]
struct RawMessage {
    /// Message headers.
    #[serde(default)]
    headers: Map<String, Value>,
    /// Row key for data messages.
    #[serde(default)]
    key: Option<String>,
    /// Row values for data messages.
    #[serde(default)]
    value: Option<Map<String, Value>>,
}

impl TryFrom<RawMessage> for ChangeMessage {
    type Error = MessageError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        if let Some(control) = raw.headers.get("control").and_then(Value::as_str) {
            return Ok(Self::Control(ControlMessage {
                control: control.to_string(),
                headers: raw.headers,
            }));
        }
        let operation = raw
            .headers
            .get("operation")
            .and_then(Value::as_str)
            .ok_or(MessageError::Unclassified)
            .and_then(Operation::parse)?;
        let key = raw.key.ok_or(MessageError::MissingField("key"))?;
        let value = raw.value.ok_or(MessageError::MissingField("value"))?;
        Ok(Self::Data(DataMessage {
            key,
            operation,
            value,
            headers: raw.headers,
        }))
    }
}

/// Decodes a response body into change messages.
///
/// # Errors
///
/// Returns [`serde_json::Error`] when the body is not a JSON array of
/// classifiable messages.
pub fn decode_batch(body: &[u8]) -> Result<Vec<ChangeMessage>, serde_json::Error> {
    serde_json::from_slice(body)
}

// ============================================================================
// SECTION: Poll Result
// ============================================================================

/// Outcome of one request against the shape API.
#[derive(Debug, Clone, PartialEq)]
pub struct PollResult {
    /// HTTP status code.
    pub status: u16,
    /// True when the server reported no further data at this position.
    pub up_to_date: bool,
    /// Decoded messages for 200 responses.
    pub body: Option<Vec<ChangeMessage>>,
}

impl PollResult {
    /// Returns the data messages of the body, if any.
    pub fn data_messages(&self) -> impl Iterator<Item = &DataMessage> {
        self.body.iter().flatten().filter_map(ChangeMessage::as_data)
    }
}

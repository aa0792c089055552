// crates/shape-load/src/events/tests.rs
// ============================================================================
// Module: Load Event Unit Tests
// Description: Unit tests for event payloads and sinks.
// Purpose: Confirm the JSON-line shape and sink selection.
// Dependencies: shape-load, serde_json, tempfile
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

use serde_json::Value;
use shape_load_config::LogSink;
use shape_load_config::LoggingConfig;
use shape_load_core::WorkerId;

use super::FileEventSink;
use super::LoadEvent;
use super::LoadEventSink;
use super::MemoryEventSink;
use super::REPORT_SENT;
use super::REQUEST_FAILED;
use super::sink_from_config;

#[test]
fn unset_fields_are_omitted() {
    let event = LoadEvent::new(REQUEST_FAILED).worker(&WorkerId::new("w1")).client(3).status(503);
    let value: Value = serde_json::to_value(&event).unwrap();
    let object = value.as_object().unwrap();
    assert_eq!(object["event"], "request_failed");
    assert_eq!(object["worker_id"], "w1");
    assert_eq!(object["client"], 3);
    assert_eq!(object["status"], 503);
    assert!(object["timestamp_ms"].as_u64().unwrap() > 0);
    assert!(!object.contains_key("message"));
    assert!(!object.contains_key("epoch"));
}

#[test]
fn memory_sink_keeps_order() {
    let sink = MemoryEventSink::new();
    sink.record(&LoadEvent::new(REQUEST_FAILED));
    sink.record(&LoadEvent::new(REPORT_SENT).sequence(1));
    assert_eq!(sink.names(), vec![REQUEST_FAILED, REPORT_SENT]);
    assert_eq!(sink.events()[1].sequence, Some(1));
}

#[test]
fn file_sink_appends_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    {
        let sink = FileEventSink::new(&path).unwrap();
        sink.record(&LoadEvent::new(REPORT_SENT).count(2));
    }
    let sink = FileEventSink::new(&path).unwrap();
    sink.record(&LoadEvent::new(REQUEST_FAILED).message("boom"));

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<Value> =
        content.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["event"], "report_sent");
    assert_eq!(lines[0]["count"], 2);
    assert_eq!(lines[1]["message"], "boom");
}

#[test]
fn file_sink_requires_a_path() {
    let config = LoggingConfig {
        sink: LogSink::File,
        path: None,
    };
    assert!(sink_from_config(&config).is_err());

    let config = LoggingConfig {
        sink: LogSink::None,
        path: None,
    };
    assert!(sink_from_config(&config).is_ok());
}

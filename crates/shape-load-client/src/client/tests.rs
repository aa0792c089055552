// crates/shape-load-client/src/client/tests.rs
// ============================================================================
// Module: Sync Client Unit Tests
// Description: Unit tests for query building and response helpers.
// Purpose: Pin the outbound query and failure classification without a server.
// Dependencies: shape-load-client, reqwest
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use shape_load_core::RequestOutcome;
use shape_load_core::Shape;
use shape_load_core::ShapeParams;

use super::Dialect;
use super::SyncClient;
use super::SyncClientConfig;
use super::SyncError;
use super::decode_body;
use super::header_value;

fn synced_shape() -> Shape {
    Shape::new("http://127.0.0.1:3000/v1/shape/", "items")
        .with_database_id("db-1")
        .with_where("id != 'XX0XX'")
        .with_params(ShapeParams {
            offset: "10_2".to_string(),
            shape_id: Some("3-100".to_string()),
            cursor: Some("77".to_string()),
            live: false,
        })
}

#[test]
fn query_carries_every_position_token() {
    let client = SyncClient::new(synced_shape(), SyncClientConfig::default()).unwrap();
    let pairs = client.query_pairs(true);
    assert_eq!(
        pairs,
        vec![
            ("offset", "10_2".to_string()),
            ("handle", "3-100".to_string()),
            ("database_id", "db-1".to_string()),
            ("where", "id != 'XX0XX'".to_string()),
            ("cursor", "77".to_string()),
            ("live", "true".to_string()),
        ]
    );
}

#[test]
fn catch_up_query_omits_live_and_uses_dialect() {
    let config = SyncClientConfig {
        dialect: Dialect::Legacy,
        ..SyncClientConfig::default()
    };
    let client = SyncClient::new(synced_shape(), config).unwrap();
    let pairs = client.query_pairs(false);
    assert!(pairs.iter().any(|(name, _)| *name == "shape_id"));
    assert!(pairs.iter().all(|(name, _)| *name != "live" && *name != "handle"));
}

#[test]
fn initial_query_has_no_shape_id() {
    let shape = Shape::new("http://127.0.0.1:3000/v1/shape/", "items");
    let client = SyncClient::new(shape, SyncClientConfig::default()).unwrap();
    assert_eq!(client.query_pairs(false), vec![("offset", "-1".to_string())]);
}

#[test]
fn invalid_shape_is_rejected_at_construction() {
    let shape = Shape::new("", "items");
    let err = SyncClient::new(shape, SyncClientConfig::default()).unwrap_err();
    assert!(matches!(err, SyncError::InvalidConfig(_)));
}

#[test]
fn restore_rejects_contradictory_positions() {
    let mut client = SyncClient::new(synced_shape(), SyncClientConfig::default()).unwrap();
    let err = client
        .restore(ShapeParams {
            offset: "-1".to_string(),
            shape_id: Some("3-100".to_string()),
            cursor: None,
            live: false,
        })
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidConfig(_)));
    assert_eq!(client.params().offset, "10_2");
}

#[test]
fn header_lookup_accepts_either_spelling() {
    let mut headers = HeaderMap::new();
    headers.insert("electric-shape-id", HeaderValue::from_static("legacy-id"));
    assert_eq!(
        header_value(&headers, &Dialect::Current.shape_id_headers()).as_deref(),
        Some("legacy-id")
    );
    headers.insert("electric-handle", HeaderValue::from_static("current-id"));
    assert_eq!(
        header_value(&headers, &Dialect::Current.shape_id_headers()).as_deref(),
        Some("current-id")
    );
    assert_eq!(
        header_value(&headers, &Dialect::Legacy.shape_id_headers()).as_deref(),
        Some("legacy-id")
    );
}

#[test]
fn empty_body_is_an_empty_batch() {
    assert!(decode_body(b"").unwrap().is_empty());
    assert!(decode_body(b"[]").unwrap().is_empty());
    assert!(matches!(decode_body(b"{not json"), Err(SyncError::Decode(_))));
}

#[test]
fn failures_map_to_request_counters() {
    let server = SyncError::ServerFailure {
        status: 503,
        headers: HeaderMap::new(),
        body: String::new(),
    };
    assert!(server.is_transient());
    assert_eq!(server.request_outcome(), Some(RequestOutcome::TransientFailure));

    let unexpected = SyncError::UnexpectedStatus {
        status: 400,
        headers: HeaderMap::new(),
    };
    assert!(!unexpected.is_transient());
    assert_eq!(unexpected.request_outcome(), Some(RequestOutcome::UnexpectedFailure));
    assert_eq!(SyncError::Decode(String::new()).request_outcome(), Some(RequestOutcome::DecodeFailure));
    assert_eq!(SyncError::Cancelled.request_outcome(), None);
    assert_eq!(server.status(), Some(503));
    assert_eq!(unexpected.status(), Some(400));
    assert_eq!(SyncError::Transport(String::new()).status(), None);
    assert!(unexpected.headers().is_some());
    assert!(SyncError::Transport(String::new()).headers().is_none());
}

#[test]
fn debug_redacts_bearer_token() {
    let config = SyncClientConfig {
        bearer_token: Some("secret-token".to_string()),
        ..SyncClientConfig::default()
    };
    let rendered = format!("{config:?}");
    assert!(!rendered.contains("secret-token"));
    assert!(rendered.contains("<redacted>"));
}

// crates/shape-load-client/src/client.rs
// ============================================================================
// Module: Sync Client
// Description: Catch-up and long-polling client for the shape-sync protocol.
// Purpose: Keep one shape position current against a sync service.
// Dependencies: reqwest, shape-load-core, thiserror, tokio, url
// ============================================================================

//! ## Overview
//! Each request carries the shape's continuation tokens as query parameters
//! and every 200/204 response hands back the next position in headers. The
//! client applies those tokens to its [`ShapeState`], which re-validates on
//! every mutation.
//!
//! Response handling:
//! - 200: body decoded (gzip handled by the HTTP layer), position advanced.
//! - 204: position advanced, up to date.
//! - 409: shape rotated; position rewritten from `Location` and the caller
//!   continues.
//! - 429 and 5xx: [`SyncError::ServerFailure`], transient, not retried.
//! - anything else: [`SyncError::UnexpectedStatus`].
//!
//! State is only mutated after the last await point of a request, so a
//! cancelled long poll leaves the shape exactly where it was.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use reqwest::Response;
use reqwest::header::HeaderMap;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use shape_load_core::ChangeMessage;
use shape_load_core::INITIAL_OFFSET;
use shape_load_core::PollResult;
use shape_load_core::RequestOutcome;
use shape_load_core::Shape;
use shape_load_core::ShapeError;
use shape_load_core::ShapeParams;
use shape_load_core::ShapeState;
use shape_load_core::decode_batch;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Legacy shape identifier header.
pub const SHAPE_ID_HEADER: &str = "electric-shape-id";
/// Current shape handle header.
pub const HANDLE_HEADER: &str = "electric-handle";
/// Legacy last-offset header.
pub const CHUNK_LAST_OFFSET_HEADER: &str = "electric-chunk-last-offset";
/// Current offset header.
pub const OFFSET_HEADER: &str = "electric-offset";
/// Live-mode cursor header.
pub const NEXT_CURSOR_HEADER: &str = "electric-next-cursor";
/// Maximum number of error body bytes kept on a [`SyncError::ServerFailure`].
pub const MAX_ERROR_BODY_BYTES: usize = 4 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by [`SyncClient`].
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - Only [`SyncError::ServerFailure`] is transient.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Shape or client settings are invalid.
    #[error("sync config error: {0}")]
    InvalidConfig(String),
    /// The shape is not in a state that allows the request.
    #[error("sync state error: {0}")]
    InvalidState(String),
    /// The service answered 429 or 5xx.
    #[error("server failure: status {status}")]
    ServerFailure {
        /// HTTP status code.
        status: u16,
        /// Response headers.
        headers: HeaderMap,
        /// Response body, truncated to [`MAX_ERROR_BODY_BYTES`].
        body: String,
    },
    /// The service answered with a status outside the protocol.
    #[error("unexpected status: {status}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
        /// Response headers.
        headers: HeaderMap,
    },
    /// A 200/204 response lacked a required header.
    #[error("response missing header {0}")]
    MissingHeader(&'static str),
    /// A 409 response carried an unusable redirect target.
    #[error("invalid redirect: {0}")]
    InvalidRedirect(String),
    /// The request could not be sent or the body could not be read.
    #[error("sync transport error: {0}")]
    Transport(String),
    /// The response body was not a valid message batch.
    #[error("sync decode error: {0}")]
    Decode(String),
    /// The request was abandoned by its caller.
    #[error("sync request cancelled")]
    Cancelled,
}

impl SyncError {
    /// Returns true for failures a later poll may not hit again.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ServerFailure { .. })
    }

    /// Returns the request counter this failure belongs to, if any.
    ///
    /// Local failures (config, state, cancellation) never reached the service
    /// and are not counted.
    #[must_use]
    pub const fn request_outcome(&self) -> Option<RequestOutcome> {
        match self {
            Self::ServerFailure { .. } => Some(RequestOutcome::TransientFailure),
            Self::Decode(_) => Some(RequestOutcome::DecodeFailure),
            Self::UnexpectedStatus { .. }
            | Self::MissingHeader(_)
            | Self::InvalidRedirect(_)
            | Self::Transport(_) => Some(RequestOutcome::UnexpectedFailure),
            Self::InvalidConfig(_) | Self::InvalidState(_) | Self::Cancelled => None,
        }
    }

    /// Returns the HTTP status of a failed response, if the service answered.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::ServerFailure { status, .. } | Self::UnexpectedStatus { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Returns the response headers of a failed response, if the service answered.
    #[must_use]
    pub const fn headers(&self) -> Option<&HeaderMap> {
        match self {
            Self::ServerFailure { headers, .. } | Self::UnexpectedStatus { headers, .. } => {
                Some(headers)
            }
            _ => None,
        }
    }
}

impl From<ShapeError> for SyncError {
    fn from(err: ShapeError) -> Self {
        match err {
            ShapeError::InvalidConfig(message) => Self::InvalidConfig(message),
            ShapeError::InvalidState(message) => Self::InvalidState(message),
        }
    }
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Protocol spelling for the shape identifier.
///
/// Response headers are always read in both spellings; the dialect picks the
/// outbound query parameter and which header is preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// `shape_id` query parameter, `electric-shape-id` header.
    Legacy,
    /// `handle` query parameter, `electric-handle` header.
    #[default]
    Current,
}

impl Dialect {
    /// Returns the query parameter carrying the shape identifier.
    #[must_use]
    pub const fn shape_id_param(self) -> &'static str {
        match self {
            Self::Legacy => "shape_id",
            Self::Current => "handle",
        }
    }

    /// Shape identifier headers, preferred spelling first.
    const fn shape_id_headers(self) -> [&'static str; 2] {
        match self {
            Self::Legacy => [SHAPE_ID_HEADER, HANDLE_HEADER],
            Self::Current => [HANDLE_HEADER, SHAPE_ID_HEADER],
        }
    }

    /// Offset headers, preferred spelling first.
    const fn offset_headers(self) -> [&'static str; 2] {
        match self {
            Self::Legacy => [CHUNK_LAST_OFFSET_HEADER, OFFSET_HEADER],
            Self::Current => [OFFSET_HEADER, CHUNK_LAST_OFFSET_HEADER],
        }
    }
}

/// Client settings shared by every request.
#[derive(Clone)]
pub struct SyncClientConfig {
    /// Protocol spelling.
    pub dialect: Dialect,
    /// Optional bearer token sent as `Authorization: Bearer`.
    pub bearer_token: Option<String>,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout; `None` leaves long polls unbounded.
    pub request_timeout: Option<Duration>,
}

impl Default for SyncClientConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            bearer_token: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
        }
    }
}

impl std::fmt::Debug for SyncClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClientConfig")
            .field("dialect", &self.dialect)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Totals for one catch-up loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Requests issued, including redirected ones.
    pub requests: u64,
    /// 409 redirects followed.
    pub redirects: u64,
    /// Data messages received.
    pub data_messages: u64,
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// Shape-sync protocol client for one simulated client.
///
/// # Invariants
/// - The held [`ShapeState`] is valid after every method returns.
/// - `caught_up` is true only after a completed catch-up or an adopted
///   position, and is cleared by any redirect.
/// - One connection pool per client; dropping the client closes it.
#[derive(Debug)]
pub struct SyncClient {
    /// HTTP connection pool.
    http: Client,
    /// Current shape position.
    state: ShapeState,
    /// Request settings.
    config: SyncClientConfig,
    /// True once the current position has been caught up to the server.
    caught_up: bool,
}

impl SyncClient {
    /// Validates the shape and builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] when the shape is invalid or the
    /// HTTP client cannot be built.
    pub fn new(shape: Shape, config: SyncClientConfig) -> Result<Self, SyncError> {
        let state = ShapeState::new(shape)?;
        let mut builder =
            Client::builder().connect_timeout(config.connect_timeout).redirect(Policy::none());
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|err| SyncError::InvalidConfig(format!("failed to build http client: {err}")))?;
        let caught_up = state.is_synced();
        Ok(Self {
            http,
            state,
            config,
            caught_up,
        })
    }

    /// Returns the current shape state.
    #[must_use]
    pub const fn state(&self) -> &ShapeState {
        &self.state
    }

    /// Returns the current continuation parameters.
    #[must_use]
    pub const fn params(&self) -> &ShapeParams {
        self.state.params()
    }

    /// Returns true when the position is safe to long-poll from.
    ///
    /// A catch-up that failed partway leaves a synced-looking position that
    /// is not caught up; the next [`Self::sync`] resumes from it.
    #[must_use]
    pub const fn is_caught_up(&self) -> bool {
        self.caught_up
    }

    /// Moves the shape to a known position, for example a shared checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] when the position is invalid; the
    /// previous position is kept.
    pub fn restore(&mut self, params: ShapeParams) -> Result<(), SyncError> {
        let shape = self.state.get().clone().with_params(params);
        self.state.set(shape)?;
        self.caught_up = true;
        Ok(())
    }

    /// Returns the shape to its unsynced position.
    pub fn reset(&mut self) {
        self.state.reset_to_initial();
        self.caught_up = false;
    }

    /// Runs the catch-up loop until the shape is up to date.
    ///
    /// # Errors
    ///
    /// Returns the first request failure; the position reached so far is kept.
    pub async fn sync(&mut self) -> Result<SyncSummary, SyncError> {
        let mut summary = SyncSummary::default();
        self.caught_up = false;
        loop {
            let result = self.request(false).await?;
            summary.requests += 1;
            if result.status == 409 {
                summary.redirects += 1;
                continue;
            }
            let received = u64::try_from(result.data_messages().count()).unwrap_or(u64::MAX);
            summary.data_messages = summary.data_messages.saturating_add(received);
            if result.up_to_date {
                self.caught_up = true;
                return Ok(summary);
            }
        }
    }

    /// Issues one long poll.
    ///
    /// A 409 is applied to the state and returned as a body-less result; the
    /// client is no longer caught up and needs another [`Self::sync`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidState`] when the shape has not been synced,
    /// otherwise the request failure.
    pub async fn live(&mut self) -> Result<PollResult, SyncError> {
        self.state.enter_live()?;
        self.request(true).await
    }

    /// Issues one long poll, abandoning it when `cancel` completes first.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cancelled`] on cancellation, otherwise as [`Self::live`].
    pub async fn live_until<F>(&mut self, cancel: F) -> Result<PollResult, SyncError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            () = cancel => Err(SyncError::Cancelled),
            result = self.live() => result,
        }
    }

    /// Sends one request from the current position and applies the response.
    async fn request(&mut self, live: bool) -> Result<PollResult, SyncError> {
        let url = self.state.get().endpoint()?;
        let mut request = self.http.get(url).query(&self.query_pairs(live));
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|err| SyncError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        match status {
            200 | 204 => self.accept(response, status).await,
            409 => {
                self.caught_up = false;
                self.follow_redirect(response.headers())?;
                Ok(PollResult {
                    status,
                    up_to_date: false,
                    body: None,
                })
            }
            429 | 500 .. => {
                let headers = response.headers().clone();
                let body = read_error_body(response).await;
                Err(SyncError::ServerFailure {
                    status,
                    headers,
                    body,
                })
            }
            _ => Err(SyncError::UnexpectedStatus {
                status,
                headers: response.headers().clone(),
            }),
        }
    }

    /// Builds the query string for the current position.
    fn query_pairs(&self, live: bool) -> Vec<(&'static str, String)> {
        let shape = self.state.get();
        let params = &shape.params;
        let mut pairs = vec![("offset", params.offset.clone())];
        if let Some(shape_id) = &params.shape_id {
            pairs.push((self.config.dialect.shape_id_param(), shape_id.clone()));
        }
        if let Some(database_id) = &shape.database_id {
            pairs.push(("database_id", database_id.clone()));
        }
        if let Some(predicate) = &shape.where_clause {
            pairs.push(("where", predicate.clone()));
        }
        if let Some(cursor) = &params.cursor {
            pairs.push(("cursor", cursor.clone()));
        }
        if live {
            pairs.push(("live", "true".to_string()));
        }
        pairs
    }

    /// Applies a 200/204 response.
    async fn accept(&mut self, response: Response, status: u16) -> Result<PollResult, SyncError> {
        let dialect = self.config.dialect;
        let headers = response.headers();
        let shape_id = header_value(headers, &dialect.shape_id_headers())
            .ok_or(SyncError::MissingHeader(dialect.shape_id_headers()[0]))?;
        let offset = header_value(headers, &dialect.offset_headers())
            .ok_or(SyncError::MissingHeader(dialect.offset_headers()[0]))?;
        let cursor = header_value(headers, &[NEXT_CURSOR_HEADER]);

        let body = if status == 200 {
            let bytes =
                response.bytes().await.map_err(|err| SyncError::Transport(err.to_string()))?;
            Some(decode_body(&bytes)?)
        } else {
            None
        };

        let up_to_date = status == 204 || offset == self.state.params().offset;
        self.state.apply_continuation(shape_id, offset, cursor)?;
        Ok(PollResult {
            status,
            up_to_date,
            body,
        })
    }

    /// Applies a 409 shape rotation.
    fn follow_redirect(&mut self, headers: &HeaderMap) -> Result<(), SyncError> {
        let Some(location) = headers.get(LOCATION) else {
            let dialect = self.config.dialect;
            match (
                header_value(headers, &dialect.shape_id_headers()),
                header_value(headers, &dialect.offset_headers()),
            ) {
                (Some(shape_id), Some(offset)) => self
                    .state
                    .apply_redirect(shape_id, offset)
                    .map_err(|err| SyncError::InvalidRedirect(err.to_string()))?,
                _ => self.state.reset_to_initial(),
            }
            return Ok(());
        };

        let location = location
            .to_str()
            .map_err(|_| SyncError::InvalidRedirect("location is not visible ascii".to_string()))?;
        let base = self.state.get().endpoint()?;
        let target = base
            .join(location)
            .map_err(|err| SyncError::InvalidRedirect(format!("{location}: {err}")))?;

        let mut shape_id = None;
        let mut offset = None;
        for (name, value) in target.query_pairs() {
            match name.as_ref() {
                "shape_id" | "handle" => shape_id = Some(value.into_owned()),
                "offset" => offset = Some(value.into_owned()),
                _ => {}
            }
        }
        let offset = offset
            .ok_or_else(|| SyncError::InvalidRedirect(format!("{location}: missing offset")))?;
        let shape_id = match shape_id {
            Some(shape_id) => shape_id,
            None if offset == INITIAL_OFFSET => String::new(),
            None => {
                return Err(SyncError::InvalidRedirect(format!("{location}: missing shape id")));
            }
        };
        self.state
            .apply_redirect(shape_id, offset)
            .map_err(|err| SyncError::InvalidRedirect(err.to_string()))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the first present header among `names` as text.
fn header_value(headers: &HeaderMap, names: &[&'static str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| headers.get(*name))
        .find_map(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Decodes a 200 body; an empty body is an empty batch.
fn decode_body(bytes: &[u8]) -> Result<Vec<ChangeMessage>, SyncError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    decode_batch(bytes).map_err(|err| SyncError::Decode(err.to_string()))
}

/// Reads at most [`MAX_ERROR_BODY_BYTES`] of an error body.
///
/// Chunks are read only until the cap is reached; the rest of the body is
/// never buffered.
async fn read_error_body(mut response: Response) -> String {
    let mut body = Vec::new();
    while body.len() < MAX_ERROR_BODY_BYTES {
        let Ok(Some(chunk)) = response.chunk().await else {
            break;
        };
        let room = MAX_ERROR_BODY_BYTES - body.len();
        body.extend_from_slice(&chunk[.. chunk.len().min(room)]);
    }
    String::from_utf8_lossy(&body).into_owned()
}

#[cfg(test)]
mod tests;

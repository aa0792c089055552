// crates/shape-load-client/tests/common/mod.rs
// ============================================================================
// Module: Scripted Shape Server
// Description: tiny_http server replaying a fixed list of responses.
// Purpose: Drive the sync client through exact protocol exchanges.
// ============================================================================

#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Shared test helpers are not used by every test binary."
)]

use std::sync::mpsc;
use std::thread;
use std::thread::JoinHandle;

use tiny_http::Header;
use tiny_http::Response;
use tiny_http::Server;

/// One canned response.
pub struct Scripted {
    /// Status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

impl Scripted {
    /// Creates a response with no headers and an empty body.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Adds a header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Sets the body.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Adds current-dialect position headers.
    pub fn position(self, handle: &str, offset: &str) -> Self {
        self.header("electric-handle", handle).header("electric-offset", offset)
    }
}

/// A request seen by the server.
#[derive(Debug, Clone)]
pub struct Recorded {
    /// Request path and query.
    pub url: String,
    /// Request headers, lowercased names.
    pub headers: Vec<(String, String)>,
}

impl Recorded {
    /// Returns the decoded value of query parameter `name`.
    pub fn query(&self, name: &str) -> Option<String> {
        let parsed = url::Url::parse(&format!("http://localhost{}", self.url)).unwrap();
        parsed.query_pairs().find(|(key, _)| key == name).map(|(_, value)| value.into_owned())
    }

    /// Returns the value of header `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }
}

/// Server answering requests with the scripted responses in order.
pub struct ScriptedServer {
    /// Shape API base URL ending in `/v1/shape/`.
    pub base_url: String,
    /// Recorded requests.
    requests: mpsc::Receiver<Recorded>,
    /// Server thread.
    handle: JoinHandle<()>,
}

impl ScriptedServer {
    /// Starts a server on a loopback port.
    pub fn start(script: Vec<Scripted>) -> Self {
        let server = Server::http("127.0.0.1:0").expect("http server");
        let base_url = format!("http://{}/v1/shape/", server.server_addr());
        let (sender, requests) = mpsc::channel();
        let handle = thread::spawn(move || {
            for scripted in script {
                let Ok(request) = server.recv() else {
                    return;
                };
                let recorded = Recorded {
                    url: request.url().to_string(),
                    headers: request
                        .headers()
                        .iter()
                        .map(|header| {
                            (header.field.to_string().to_ascii_lowercase(), header.value.to_string())
                        })
                        .collect(),
                };
                let _ = sender.send(recorded);
                let mut response = Response::from_data(scripted.body).with_status_code(scripted.status);
                for (name, value) in &scripted.headers {
                    response = response
                        .with_header(Header::from_bytes(name.as_bytes(), value.as_bytes()).unwrap());
                }
                let _ = request.respond(response);
            }
        });
        Self {
            base_url,
            requests,
            handle,
        }
    }

    /// Waits for the script to finish and returns every recorded request.
    pub fn finish(self) -> Vec<Recorded> {
        self.handle.join().expect("server thread");
        self.requests.try_iter().collect()
    }
}

/// A gzip-compressed one-row batch for counter 1 created at 2024-10-18 10:00:00+00.
pub const GZIP_BATCH: &[u8] = &[
    0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x03, 0x15, 0xca, 0xc1, 0x0a, 0x83, 0x30,
    0x10, 0x84, 0xe1, 0x57, 0x29, 0x73, 0xad, 0xc2, 0x46, 0x7a, 0x90, 0xbc, 0x4a, 0x29, 0x65, 0xd1,
    0x81, 0x8a, 0x92, 0x94, 0x75, 0x2d, 0x14, 0xc9, 0xbb, 0x9b, 0xc0, 0x5c, 0xfe, 0x8f, 0x79, 0x9e,
    0xf8, 0x50, 0x67, 0xda, 0x8e, 0x78, 0x22, 0x7f, 0x69, 0xea, 0x4b, 0x4e, 0x88, 0x58, 0xd2, 0x4e,
    0x73, 0x94, 0x0e, 0x2b, 0xff, 0xb5, 0xd7, 0x80, 0x0e, 0x3f, 0xdd, 0x0e, 0xb6, 0xe7, 0x94, 0x8f,
    0xe4, 0xb4, 0xea, 0x8d, 0x27, 0xa3, 0x3a, 0xe7, 0xb7, 0x7a, 0x85, 0x41, 0x86, 0x47, 0x1f, 0xa4,
    0x0f, 0xe3, 0x2d, 0x48, 0x94, 0xb6, 0xbb, 0x08, 0x4a, 0x79, 0x5d, 0x02, 0x08, 0x81, 0x45, 0x6d,
    0x00, 0x00, 0x00,
];

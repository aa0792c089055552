// crates/shape-load/tests/common/mod.rs
// ============================================================================
// Module: Harness Test Helpers
// Description: Loopback coordinator and fake shape service for harness tests.
// Purpose: Run the real server and worker paths without external services.
// ============================================================================

#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Shared test helpers are not used by every test binary."
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use shape_load::CoordinatorState;
use shape_load::LoadEventSink;
use shape_load::events::MemoryEventSink;
use shape_load::server;
use shape_load_core::DistributedAggregator;
use shape_load_core::HistogramMode;
use tiny_http::Header;
use tiny_http::Response;
use tiny_http::Server;
use tokio::sync::watch;
use tokio::task::JoinHandle as TaskHandle;

/// Timestamp every fake row is stamped with.
pub const ROW_CREATED_AT: &str = "2024-10-18T10:00:00Z";

// ============================================================================
// SECTION: Coordinator
// ============================================================================

/// A coordinator served on a loopback port.
pub struct Coordinator {
    /// Base URL ending in `/`.
    pub base_url: String,
    /// Shared aggregate.
    pub aggregator: Arc<DistributedAggregator>,
    /// Recorded events.
    pub events: Arc<MemoryEventSink>,
    /// Shutdown trigger.
    shutdown: watch::Sender<bool>,
    /// Server task.
    task: TaskHandle<Result<(), shape_load::HarnessError>>,
}

impl Coordinator {
    /// Starts a coordinator in `mode`.
    pub async fn start(mode: HistogramMode) -> Self {
        let aggregator = Arc::new(DistributedAggregator::new());
        let events = Arc::new(MemoryEventSink::new());
        let sink: Arc<dyn LoadEventSink> = Arc::clone(&events) as Arc<dyn LoadEventSink>;
        let state = Arc::new(CoordinatorState::new(Arc::clone(&aggregator), mode, sink));
        let listener = server::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
        let base_url = format!("http://{}/", listener.local_addr().unwrap());
        let (shutdown, receiver) = watch::channel(false);
        let task = tokio::spawn(server::serve(listener, state, receiver));
        Self {
            base_url,
            aggregator,
            events,
            shutdown,
            task,
        }
    }

    /// Returns the absolute URL of `path`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Stops the server and waits for it.
    pub async fn stop(self) {
        self.shutdown.send(true).unwrap();
        self.task.await.unwrap().unwrap();
    }
}

// ============================================================================
// SECTION: Fake Shape Service
// ============================================================================

/// Shape service answering catch-up with empty batches and every live poll
/// with one fresh row.
pub struct FakeShapeService {
    /// Shape API base URL ending in `/v1/shape/`.
    pub base_url: String,
    /// Live polls answered so far.
    live_polls: Arc<AtomicU64>,
    /// Stop flag.
    stop: Arc<AtomicBool>,
    /// Server thread.
    handle: JoinHandle<()>,
}

impl FakeShapeService {
    /// Starts the service on a loopback port.
    pub fn start() -> Self {
        let server = Server::http("127.0.0.1:0").expect("http server");
        let base_url = format!("http://{}/v1/shape/", server.server_addr());
        let live_polls = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let thread_polls = Arc::clone(&live_polls);
        let thread_stop = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            while !thread_stop.load(Ordering::SeqCst) {
                let Ok(Some(request)) = server.recv_timeout(Duration::from_millis(20)) else {
                    continue;
                };
                let url = url::Url::parse(&format!("http://localhost{}", request.url())).unwrap();
                let query = |name: &str| {
                    url.query_pairs().find(|(key, _)| key == name).map(|(_, value)| value.into_owned())
                };
                let offset = query("offset").unwrap_or_default();
                let response = if offset == "-1" {
                    respond("0_0", None, b"[]".to_vec())
                } else if query("live").as_deref() == Some("true") {
                    let poll = thread_polls.fetch_add(1, Ordering::SeqCst) + 1;
                    let body = format!(
                        r#"[{{"headers":{{"operation":"insert"}},"key":"k{poll}","value":{{"counter":"{poll}","created_at":"{ROW_CREATED_AT}"}}}}]"#
                    );
                    respond(&format!("{poll}_0"), Some(&poll.to_string()), body.into_bytes())
                } else {
                    respond(&offset, None, b"[]".to_vec())
                };
                let _ = request.respond(response);
            }
        });
        Self {
            base_url,
            live_polls,
            stop,
            handle,
        }
    }

    /// Returns the number of live polls answered.
    pub fn live_polls(&self) -> u64 {
        self.live_polls.load(Ordering::SeqCst)
    }

    /// Stops the service thread.
    pub fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        self.handle.join().expect("service thread");
    }
}

/// Builds a 200 response at `offset`.
fn respond(offset: &str, cursor: Option<&str>, body: Vec<u8>) -> Response<std::io::Cursor<Vec<u8>>> {
    let mut response = Response::from_data(body)
        .with_header(header("electric-handle", "H1"))
        .with_header(header("electric-offset", offset))
        .with_header(header("content-type", "application/json"));
    if let Some(cursor) = cursor {
        response = response.with_header(header("electric-next-cursor", cursor));
    }
    response
}

/// Builds a header.
fn header(name: &str, value: &str) -> Header {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).unwrap()
}

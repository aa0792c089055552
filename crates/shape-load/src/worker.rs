// crates/shape-load/src/worker.rs
// ============================================================================
// Module: Worker Runtime
// Description: Simulated shape clients and the worker report loop.
// Purpose: Drive sync/live polling at scale and ship drained latency reports.
// Dependencies: rand, shape-load-client, shape-load-config, shape-load-core, tokio
// ============================================================================

//! ## Overview
//! A worker runs `load.clients` simulated clients, started at
//! `load.spawn_rate` per second. Each client owns one [`SyncClient`], catches
//! up (or adopts a shared checkpoint), then long-polls forever, recording the
//! latency of every fresh data message into the worker's
//! [`LocalAccumulator`]. A separate report loop drains the accumulator every
//! `report.interval_ms` and hands the result to a [`ReportSink`].
//!
//! Invariants:
//! - Clients never retry inside the protocol client: transient failures wait
//!   one poll interval, every other failure ends that client.
//! - Clients long-poll only from a caught-up position; a catch-up cut short
//!   by a failure is resumed before the next live poll.
//! - Shutdown is a `watch` broadcast; in-flight long polls are dropped.
//! - An undelivered report is resent unchanged before anything new is drained.
//! - The final report is sent after every client has stopped.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use shape_load_client::Dialect;
use shape_load_client::SharedCheckpoint;
use shape_load_client::SyncClient;
use shape_load_client::SyncClientConfig;
use shape_load_client::SyncError;
use shape_load_config::ProtocolDialect;
use shape_load_config::ShapeLoadConfig;
use shape_load_config::TargetConfig;
use shape_load_core::Clock;
use shape_load_core::LatencyRecorder;
use shape_load_core::LocalAccumulator;
use shape_load_core::RequestOutcome;
use shape_load_core::Shape;
use shape_load_core::WorkerId;
use shape_load_core::WorkerPipeline;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::events::CLIENT_STARTED;
use crate::events::CLIENT_STOPPED;
use crate::events::LoadEvent;
use crate::events::LoadEventSink;
use crate::events::REDIRECT;
use crate::events::REPORT_FAILED;
use crate::events::REPORT_SENT;
use crate::events::REQUEST_FAILED;
use crate::events::RESET;
use crate::events::SYNC_COMPLETED;
use crate::report::ReportAck;
use crate::report::ReportSink;

// ============================================================================
// SECTION: Shutdown
// ============================================================================

/// Resolves once `shutdown` carries `true` or its sender is gone.
pub async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Sleeps for `duration`; returns true when shutdown arrived first.
async fn pause(duration: Duration, shutdown: &watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        () = wait_for_shutdown(shutdown.clone()) => true,
        () = tokio::time::sleep(duration) => false,
    }
}

// ============================================================================
// SECTION: Shape Pool
// ============================================================================

/// Shape predicate for fan-out slot `slot`.
///
/// The predicate matches every row; it only exists to give each slot a
/// distinct shape on the server.
#[must_use]
pub fn fan_out_predicate(slot: usize) -> String {
    format!("id != 'XX{slot}XX'")
}

/// The shapes clients spread across, with one shared checkpoint per shape.
#[derive(Debug)]
pub struct ShapePool {
    /// Unsynced base shape.
    base: Shape,
    /// Checkpoint per fan-out slot.
    checkpoints: Vec<SharedCheckpoint>,
}

impl ShapePool {
    /// Creates a pool of `fan_out` shapes over `base`.
    #[must_use]
    pub fn new(base: Shape, fan_out: u32) -> Self {
        let slots = usize::try_from(fan_out.max(1)).unwrap_or(1);
        Self {
            base,
            checkpoints: (0 .. slots).map(|_| SharedCheckpoint::new()).collect(),
        }
    }

    /// Returns the number of distinct shapes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    /// Returns true when the pool has no shapes; never the case after `new`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    /// Picks a slot uniformly at random.
    #[must_use]
    pub fn pick(&self) -> usize {
        if self.checkpoints.len() <= 1 {
            return 0;
        }
        rand::thread_rng().gen_range(0 .. self.checkpoints.len())
    }

    /// Returns the unsynced shape for `slot`.
    #[must_use]
    pub fn shape(&self, slot: usize) -> Shape {
        if self.checkpoints.len() <= 1 {
            return self.base.clone();
        }
        self.base.clone().with_where(fan_out_predicate(slot))
    }

    /// Returns the checkpoint for `slot`.
    #[must_use]
    pub fn checkpoint(&self, slot: usize) -> Option<&SharedCheckpoint> {
        self.checkpoints.get(slot)
    }

    /// Forgets every checkpoint.
    pub fn clear(&self) {
        for checkpoint in &self.checkpoints {
            checkpoint.clear();
        }
    }
}

// ============================================================================
// SECTION: Simulated Client
// ============================================================================

/// Builds protocol client settings from the target section.
#[must_use]
pub fn sync_client_config(target: &TargetConfig) -> SyncClientConfig {
    SyncClientConfig {
        dialect: match target.dialect {
            ProtocolDialect::Legacy => Dialect::Legacy,
            ProtocolDialect::Current => Dialect::Current,
        },
        bearer_token: target.auth_token.clone(),
        connect_timeout: target.connect_timeout(),
        request_timeout: target.request_timeout(),
    }
}

/// How a simulated client ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientExit {
    /// Stopped by shutdown.
    Shutdown,
    /// Stopped by a non-transient failure.
    Failed,
}

impl ClientExit {
    /// Returns the event label.
    const fn as_str(self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown",
            Self::Failed => "failed",
        }
    }
}

/// One simulated client: everything a client task needs, owned.
#[derive(Clone)]
pub struct SimulatedClient {
    /// Client index within the worker.
    pub index: u32,
    /// Owning worker.
    pub worker_id: WorkerId,
    /// Shapes and checkpoints shared by all clients.
    pub shapes: Arc<ShapePool>,
    /// Protocol client settings.
    pub client_config: SyncClientConfig,
    /// Pause between live polls.
    pub poll_interval: Duration,
    /// Sample recorder.
    pub recorder: LatencyRecorder,
    /// Worker accumulator.
    pub accumulator: Arc<LocalAccumulator>,
    /// Event sink.
    pub events: Arc<dyn LoadEventSink>,
}

impl SimulatedClient {
    /// Returns a copy of this client with another index.
    #[must_use]
    pub fn with_index(&self, index: u32) -> Self {
        let mut client = self.clone();
        client.index = index;
        client
    }

    /// Records `event` tagged with this client.
    fn emit(&self, event: LoadEvent) {
        self.events.record(&event.worker(&self.worker_id).client(self.index));
    }

    /// Runs the client until shutdown or a non-transient failure.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> ClientExit {
        let slot = self.shapes.pick();
        let shapes = Arc::clone(&self.shapes);
        let Some(checkpoint) = shapes.checkpoint(slot) else {
            return ClientExit::Failed;
        };
        let mut client = match SyncClient::new(shapes.shape(slot), self.client_config.clone()) {
            Ok(client) => client,
            Err(err) => {
                self.emit(LoadEvent::new(REQUEST_FAILED).outcome("fatal").message(err.to_string()));
                return ClientExit::Failed;
            }
        };
        let adopted = checkpoint
            .current()
            .is_some_and(|position| client.restore(position.to_params()).is_ok());
        self.emit(
            LoadEvent::new(CLIENT_STARTED).outcome(if adopted { "checkpoint" } else { "sync" }),
        );
        let exit = self.drive(&mut client, checkpoint, &shutdown).await;
        self.emit(LoadEvent::new(CLIENT_STOPPED).outcome(exit.as_str()));
        exit
    }

    /// Sync and live-poll loop.
    async fn drive(
        &self,
        client: &mut SyncClient,
        checkpoint: &SharedCheckpoint,
        shutdown: &watch::Receiver<bool>,
    ) -> ClientExit {
        loop {
            if *shutdown.borrow() {
                return ClientExit::Shutdown;
            }
            if !client.is_caught_up() {
                let synced = tokio::select! {
                    biased;
                    () = wait_for_shutdown(shutdown.clone()) => return ClientExit::Shutdown,
                    result = client.sync() => result,
                };
                match synced {
                    Ok(summary) => {
                        self.accumulator.record_requests(
                            RequestOutcome::Polled,
                            summary.requests.saturating_sub(summary.redirects),
                        );
                        self.accumulator
                            .record_requests(RequestOutcome::Redirected, summary.redirects);
                        checkpoint.record_sync(client.params());
                        self.emit(LoadEvent::new(SYNC_COMPLETED).count(summary.requests));
                    }
                    Err(err) => {
                        if let Some(exit) = self.on_failure(&err, shutdown).await {
                            return exit;
                        }
                        continue;
                    }
                }
            }

            let not_before = self.recorder.now();
            match client.live_until(wait_for_shutdown(shutdown.clone())).await {
                Ok(result) if result.status == 409 => {
                    self.accumulator.record_request(RequestOutcome::Redirected);
                    self.emit(LoadEvent::new(REDIRECT).status(409));
                    continue;
                }
                Ok(result) => {
                    self.accumulator.record_request(RequestOutcome::Polled);
                    let measured =
                        self.recorder.measure(not_before, result.body.as_deref().unwrap_or_default());
                    self.accumulator.record(&measured);
                    checkpoint.observe_live(client.params());
                }
                Err(SyncError::Cancelled) => return ClientExit::Shutdown,
                Err(err) => {
                    if let Some(exit) = self.on_failure(&err, shutdown).await {
                        return exit;
                    }
                    continue;
                }
            }
            if pause(self.poll_interval, shutdown).await {
                return ClientExit::Shutdown;
            }
        }
    }

    /// Counts and logs a failure; returns the exit when the client must stop.
    async fn on_failure(
        &self,
        err: &SyncError,
        shutdown: &watch::Receiver<bool>,
    ) -> Option<ClientExit> {
        if matches!(err, SyncError::Cancelled) {
            return Some(ClientExit::Shutdown);
        }
        if let Some(outcome) = err.request_outcome() {
            self.accumulator.record_request(outcome);
        }
        let mut event = LoadEvent::new(REQUEST_FAILED)
            .outcome(if err.is_transient() { "transient" } else { "fatal" })
            .message(err.to_string());
        if let Some(status) = err.status() {
            event = event.status(status);
        }
        if let Some(headers) = err.headers() {
            event = event.headers(headers.iter().map(|(name, value)| {
                (name.as_str().to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned())
            }));
        }
        self.emit(event);
        if !err.is_transient() {
            return Some(ClientExit::Failed);
        }
        pause(self.poll_interval, shutdown).await.then_some(ClientExit::Shutdown)
    }
}

// ============================================================================
// SECTION: Worker Runtime
// ============================================================================

/// Totals for one worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Clients started.
    pub clients_started: u32,
    /// Clients stopped by shutdown.
    pub clients_stopped: u32,
    /// Clients ended by a failure.
    pub clients_failed: u32,
    /// Reports delivered.
    pub reports_sent: u64,
    /// Reports that could not be delivered.
    pub reports_failed: u64,
}

/// Client population plus report loop of one worker process.
pub struct WorkerRuntime {
    /// Report pipeline hooks.
    pipeline: Arc<WorkerPipeline>,
    /// Template every client is cloned from.
    template: SimulatedClient,
    /// Number of clients.
    clients: u32,
    /// Clients started per second.
    spawn_rate: u32,
    /// Report cycle period.
    report_interval: Duration,
    /// Event sink.
    events: Arc<dyn LoadEventSink>,
}

impl WorkerRuntime {
    /// Creates a worker from validated configuration.
    #[must_use]
    pub fn new(
        config: &ShapeLoadConfig,
        worker_id: WorkerId,
        clock: Arc<dyn Clock>,
        events: Arc<dyn LoadEventSink>,
    ) -> Self {
        let pipeline = Arc::new(WorkerPipeline::new(worker_id.clone()));
        let template = SimulatedClient {
            index: 0,
            worker_id,
            shapes: Arc::new(ShapePool::new(config.target.shape(), config.load.shape_fan_out)),
            client_config: sync_client_config(&config.target),
            poll_interval: config.load.poll_interval(),
            recorder: LatencyRecorder::new(clock, config.load.histogram_mode),
            accumulator: pipeline.accumulator(),
            events: Arc::clone(&events),
        };
        Self {
            pipeline,
            template,
            clients: config.load.clients,
            spawn_rate: config.load.spawn_rate.max(1),
            report_interval: config.report.interval(),
            events,
        }
    }

    /// Returns the report pipeline.
    #[must_use]
    pub fn pipeline(&self) -> Arc<WorkerPipeline> {
        Arc::clone(&self.pipeline)
    }

    /// Runs clients and the report loop until `shutdown` fires.
    pub async fn run<S: ReportSink>(
        &self,
        sink: &S,
        shutdown: watch::Receiver<bool>,
    ) -> WorkerSummary {
        self.pipeline.on_test_start();
        self.template.shapes.clear();
        let spawner = tokio::spawn(spawn_clients(
            self.template.clone(),
            self.clients,
            self.spawn_rate,
            shutdown.clone(),
        ));

        let mut summary = WorkerSummary::default();
        let mut ticker = tokio::time::interval(self.report_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                () = wait_for_shutdown(shutdown.clone()) => break,
                _ = ticker.tick() => self.report_cycle(sink, &mut summary).await,
            }
        }

        if let Ok(clients) = spawner.await {
            summary.clients_started = clients.clients_started;
            summary.clients_stopped = clients.clients_stopped;
            summary.clients_failed = clients.clients_failed;
        }
        let resending = self.pipeline.has_pending();
        self.report_cycle(sink, &mut summary).await;
        if resending && !self.pipeline.has_pending() {
            self.report_cycle(sink, &mut summary).await;
        }
        summary
    }

    /// Delivers the pending or freshly drained report and reacts to the
    /// coordinator's epoch.
    pub async fn report_cycle<S: ReportSink>(&self, sink: &S, summary: &mut WorkerSummary) {
        let report = self.pipeline.on_report_cycle();
        match sink.deliver(&report).await {
            Ok(ack) => {
                summary.reports_sent = summary.reports_sent.saturating_add(1);
                self.events.record(
                    &LoadEvent::new(REPORT_SENT)
                        .worker(self.pipeline.worker_id())
                        .sequence(report.sequence)
                        .outcome(ack.outcome.as_str())
                        .count(report.snapshot.sample_count())
                        .epoch(ack.epoch),
                );
                self.observe_ack(ack);
            }
            Err(err) => {
                summary.reports_failed = summary.reports_failed.saturating_add(1);
                self.events.record(
                    &LoadEvent::new(REPORT_FAILED)
                        .worker(self.pipeline.worker_id())
                        .sequence(report.sequence)
                        .message(err.to_string()),
                );
                self.pipeline.on_delivery_failed(report);
            }
        }
    }

    /// Follows a coordinator reset announced in `ack`.
    fn observe_ack(&self, ack: ReportAck) {
        if self.pipeline.accumulator().adopt_epoch(ack.epoch) {
            self.template.shapes.clear();
            self.events.record(
                &LoadEvent::new(RESET).worker(self.pipeline.worker_id()).epoch(ack.epoch),
            );
        }
    }
}

/// Client lifecycle totals.
#[derive(Debug, Clone, Copy, Default)]
struct ClientTally {
    /// Clients started.
    clients_started: u32,
    /// Clients stopped by shutdown.
    clients_stopped: u32,
    /// Clients ended by a failure.
    clients_failed: u32,
}

/// Starts `count` clients at `spawn_rate` per second and waits for all of them.
async fn spawn_clients(
    template: SimulatedClient,
    count: u32,
    spawn_rate: u32,
    shutdown: watch::Receiver<bool>,
) -> ClientTally {
    let gap = Duration::from_secs(1) / spawn_rate.max(1);
    let mut tasks = JoinSet::new();
    let mut tally = ClientTally::default();
    for index in 0 .. count {
        if index > 0 && pause(gap, &shutdown).await {
            break;
        }
        tasks.spawn(template.with_index(index).run(shutdown.clone()));
        tally.clients_started += 1;
    }
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(ClientExit::Shutdown) => tally.clients_stopped += 1,
            Ok(ClientExit::Failed) | Err(_) => tally.clients_failed += 1,
        }
    }
    tally
}

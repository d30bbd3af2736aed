//! Polling scheduler.
//!
//! A single supervisor task owns [`SchedulerState`]; everything else talks to
//! it through a [`SchedulerHandle`] over a command channel. Cycles run as
//! spawned tasks joined by the supervisor, so at most one is ever in flight.
//!
//! Contracts:
//! - the first tick fires one full interval after `start`;
//! - ticks that land while a cycle is in flight are skipped;
//! - `force_tick` during a cycle coalesces into one follow-up cycle;
//! - `poll_now` during a cycle waits for that cycle and shares its result;
//! - a `fatal` result stops polling;
//! - every completed cycle publishes exactly one event.
//!
//! Results are persisted inside the cycle task on the blocking pool, so the
//! supervisor keeps answering commands while disk writes run.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::core::events::{EventBus, UsageEvent};
use crate::core::extract::ExtractionPipeline;
use crate::core::models::CyclePayload;
use crate::core::retry::RetryPolicy;
use crate::core::session::SessionController;
use crate::core::shutdown::{self, ShutdownSignal, ShutdownTrigger};
use crate::error::{Diagnostics, ErrorKind, ScrapeAttemptError, WatchError};
use crate::storage::cache::LastGoodCache;
use crate::storage::history::HistoryStore;

const COMMAND_CAPACITY: usize = 32;

/// What a completed cycle produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub result: Result<CyclePayload, ScrapeAttemptError>,
    pub attempts: u32,
    /// The cycle was interrupted by shutdown; never published.
    pub cancelled: bool,
}

impl CycleOutcome {
    #[must_use]
    pub const fn success(payload: CyclePayload, attempts: u32) -> Self {
        Self {
            result: Ok(payload),
            attempts,
            cancelled: false,
        }
    }

    #[must_use]
    pub const fn failure(error: ScrapeAttemptError, attempts: u32) -> Self {
        Self {
            result: Err(error),
            attempts,
            cancelled: false,
        }
    }

    #[must_use]
    pub fn cancelled(attempts: u32) -> Self {
        Self {
            result: Err(ScrapeAttemptError::from_error(
                &WatchError::Cancelled,
                attempts,
                Diagnostics::new(),
            )),
            attempts,
            cancelled: true,
        }
    }
}

/// One scrape cycle, abstracted so the scheduler can be driven by fakes.
pub trait CycleRunner: Send + Sync + 'static {
    fn run_cycle(&self, shutdown: ShutdownSignal) -> BoxFuture<'_, CycleOutcome>;
}

/// The real cycle: retries around authenticate, navigate and extract.
#[derive(Debug)]
pub struct ScrapeCycle {
    controller: Arc<SessionController>,
    pipeline: ExtractionPipeline,
    policy: RetryPolicy,
}

impl ScrapeCycle {
    #[must_use]
    pub const fn new(
        controller: Arc<SessionController>,
        pipeline: ExtractionPipeline,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            controller,
            pipeline,
            policy,
        }
    }
}

impl CycleRunner for ScrapeCycle {
    fn run_cycle(&self, mut shutdown: ShutdownSignal) -> BoxFuture<'_, CycleOutcome> {
        async move {
            let started = Instant::now();
            let result = self
                .policy
                .run_with_retry(&mut shutdown, |attempt| {
                    tracing::debug!(attempt, "Starting scrape attempt");
                    self.controller.run_attempt(&self.pipeline)
                })
                .await;

            match result {
                Ok(done) => CycleOutcome::success(done.value, done.attempts),
                Err(failure) if matches!(failure.error, WatchError::Cancelled) => {
                    CycleOutcome::cancelled(failure.attempts)
                }
                Err(failure) => {
                    let diagnostics = Diagnostics::new()
                        .with_url(&self.controller.settings().usage_url)
                        .with("attempts", failure.attempts)
                        .with("error_code", failure.error.error_code())
                        .with_elapsed(started.elapsed());
                    CycleOutcome::failure(
                        ScrapeAttemptError::from_error(&failure.error, failure.attempts, diagnostics),
                        failure.attempts,
                    )
                }
            }
        }
        .boxed()
    }
}

/// Persists cycle results: last-known-good cache and history.
///
/// Persistence is best-effort; failures are logged and never fail a cycle.
#[derive(Debug, Default)]
pub struct CycleRecorder {
    cache: Option<LastGoodCache>,
    history: Option<Mutex<HistoryStore>>,
    retention_days: i64,
    max_rows: usize,
}

impl CycleRecorder {
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cache(mut self, cache: LastGoodCache) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: HistoryStore, retention_days: i64, max_rows: usize) -> Self {
        self.history = Some(Mutex::new(history));
        self.retention_days = retention_days;
        self.max_rows = max_rows;
        self
    }

    const fn is_disabled(&self) -> bool {
        self.cache.is_none() && self.history.is_none()
    }

    /// Persist on the blocking pool and wait for it to finish.
    async fn persist(self: Arc<Self>, outcome: CycleOutcome) {
        if self.is_disabled() {
            return;
        }
        if let Err(e) = tokio::task::spawn_blocking(move || self.record(&outcome)).await {
            tracing::warn!(error = %e, "Cycle persistence task failed");
        }
    }

    fn record(&self, outcome: &CycleOutcome) {
        let now = Utc::now();
        let history = self
            .history
            .as_ref()
            .map(|h| h.lock().unwrap_or_else(PoisonError::into_inner));
        match &outcome.result {
            Ok(payload) => {
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.store(payload) {
                        tracing::warn!(error = %e, "Failed to write last-good cache");
                    }
                }
                if let Some(history) = &history {
                    if let Err(e) = history.record_payload(payload, outcome.attempts) {
                        tracing::warn!(error = %e, "Failed to record cycle history");
                    }
                }
            }
            Err(error) => {
                if let Some(history) = &history {
                    if let Err(e) = history.record_error(error, now) {
                        tracing::warn!(error = %e, "Failed to record cycle history");
                    }
                }
            }
        }
        if let Some(history) = &history {
            match history.prune(self.retention_days, self.max_rows, now) {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Pruned cycle history"),
                Err(e) => tracing::warn!(error = %e, "Failed to prune cycle history"),
            }
        }
    }
}

/// Observable scheduler state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerState {
    pub is_running: bool,
    pub is_cycle_in_flight: bool,
    pub interval_seconds: u64,
    pub last_successful_payload: Option<CyclePayload>,
    pub last_error: Option<ScrapeAttemptError>,
    pub cycles_completed: u64,
}

enum Command {
    Start { interval: Duration },
    Stop,
    ForceTick,
    PollNow { reply: oneshot::Sender<CycleOutcome> },
    State { reply: oneshot::Sender<SchedulerState> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Cloneable handle to the supervisor task.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    async fn send(&self, command: Command) -> crate::error::Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| WatchError::SchedulerClosed)
    }

    /// Begin polling; idempotent when already running at the same interval.
    ///
    /// # Errors
    /// `SchedulerClosed` after shutdown.
    pub async fn start(&self, interval: Duration) -> crate::error::Result<()> {
        self.send(Command::Start { interval }).await
    }

    /// Stop scheduling ticks. An in-flight cycle still completes and publishes.
    ///
    /// # Errors
    /// `SchedulerClosed` after shutdown.
    pub async fn stop(&self) -> crate::error::Result<()> {
        self.send(Command::Stop).await
    }

    /// Run a cycle now, or once the in-flight cycle finishes.
    ///
    /// # Errors
    /// `SchedulerClosed` after shutdown.
    pub async fn force_tick(&self) -> crate::error::Result<()> {
        self.send(Command::ForceTick).await
    }

    /// Run a cycle (or join the in-flight one) and wait for its result.
    pub async fn poll_now(&self) -> CycleOutcome {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::PollNow { reply }).await.is_err() {
            return closed_outcome();
        }
        rx.await.unwrap_or_else(|_| closed_outcome())
    }

    /// # Errors
    /// `SchedulerClosed` after shutdown.
    pub async fn state(&self) -> crate::error::Result<SchedulerState> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::State { reply }).await?;
        rx.await.map_err(|_| WatchError::SchedulerClosed)
    }

    /// Cancel the in-flight cycle and stop the supervisor.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

fn closed_outcome() -> CycleOutcome {
    CycleOutcome::failure(
        ScrapeAttemptError::from_error(&WatchError::SchedulerClosed, 0, Diagnostics::new()),
        0,
    )
}

enum Wake {
    Command(Command),
    Closed,
    Tick,
    Finished(Result<CycleOutcome, JoinError>),
}

struct Supervisor {
    runner: Arc<dyn CycleRunner>,
    events: EventBus,
    recorder: Arc<CycleRecorder>,
    commands: mpsc::Receiver<Command>,
    state: SchedulerState,
    ticker: Option<Interval>,
    in_flight: Option<JoinHandle<CycleOutcome>>,
    follow_up: bool,
    waiters: Vec<oneshot::Sender<CycleOutcome>>,
    trigger: ShutdownTrigger,
}

/// Spawn the supervisor task.
///
/// `last_payload` seeds the state for cold-start display; it is not published.
pub fn spawn(
    runner: Arc<dyn CycleRunner>,
    events: EventBus,
    recorder: CycleRecorder,
    interval: Duration,
    last_payload: Option<CyclePayload>,
) -> SchedulerHandle {
    let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
    let (trigger, _) = shutdown::channel();
    let supervisor = Supervisor {
        runner,
        events,
        recorder: Arc::new(recorder),
        commands: rx,
        state: SchedulerState {
            is_running: false,
            is_cycle_in_flight: false,
            interval_seconds: interval.as_secs(),
            last_successful_payload: last_payload,
            last_error: None,
            cycles_completed: 0,
        },
        ticker: None,
        in_flight: None,
        follow_up: false,
        waiters: Vec::new(),
        trigger,
    };
    tokio::spawn(supervisor.run());
    SchedulerHandle { commands: tx }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn join_cycle(
    in_flight: &mut Option<JoinHandle<CycleOutcome>>,
) -> Result<CycleOutcome, JoinError> {
    match in_flight {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

impl Supervisor {
    async fn run(mut self) {
        tracing::debug!("Scheduler started");
        loop {
            let wake = tokio::select! {
                command = self.commands.recv() => command.map_or(Wake::Closed, Wake::Command),
                joined = join_cycle(&mut self.in_flight) => Wake::Finished(joined),
                () = next_tick(&mut self.ticker) => Wake::Tick,
            };

            match wake {
                Wake::Command(Command::Start { interval }) => self.start(interval),
                Wake::Command(Command::Stop) => self.stop("requested"),
                Wake::Command(Command::ForceTick) => {
                    if self.in_flight.is_some() {
                        tracing::debug!("Cycle in flight, queueing one follow-up");
                        self.follow_up = true;
                    } else {
                        self.launch("forced");
                    }
                }
                Wake::Command(Command::PollNow { reply }) => {
                    self.waiters.push(reply);
                    if self.in_flight.is_none() {
                        self.launch("poll");
                    }
                }
                Wake::Command(Command::State { reply }) => {
                    let _ = reply.send(self.state.clone());
                }
                Wake::Command(Command::Shutdown { reply }) => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    break;
                }
                Wake::Closed => {
                    self.shutdown().await;
                    break;
                }
                Wake::Tick => {
                    if self.in_flight.is_some() {
                        tracing::debug!("Cycle still in flight, skipping tick");
                    } else {
                        self.launch("tick");
                    }
                }
                Wake::Finished(joined) => {
                    self.in_flight = None;
                    self.state.is_cycle_in_flight = false;
                    self.complete(joined);
                    if std::mem::take(&mut self.follow_up) {
                        self.launch("follow-up");
                    }
                }
            }
        }
        tracing::debug!("Scheduler stopped");
    }

    fn start(&mut self, interval: Duration) {
        let interval = interval.max(Duration::from_secs(1));
        if self.state.is_running && self.state.interval_seconds == interval.as_secs() {
            tracing::debug!("Polling already running");
            return;
        }
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);
        self.state.is_running = true;
        self.state.interval_seconds = interval.as_secs();
        tracing::info!(interval_seconds = interval.as_secs(), "Polling started");
    }

    fn stop(&mut self, reason: &str) {
        if self.state.is_running {
            tracing::info!(reason, "Polling stopped");
        }
        self.ticker = None;
        self.follow_up = false;
        self.state.is_running = false;
    }

    fn launch(&mut self, reason: &'static str) {
        let runner = Arc::clone(&self.runner);
        let recorder = Arc::clone(&self.recorder);
        let signal = self.trigger.signal();
        tracing::info!(reason, "Starting cycle");
        self.in_flight = Some(tokio::spawn(async move {
            let outcome = runner.run_cycle(signal).await;
            if !outcome.cancelled {
                recorder.persist(outcome.clone()).await;
            }
            outcome
        }));
        self.state.is_cycle_in_flight = true;
    }

    fn complete(&mut self, joined: Result<CycleOutcome, JoinError>) {
        let outcome = joined.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Cycle task failed");
            CycleOutcome::failure(
                ScrapeAttemptError::new(ErrorKind::Unknown, format!("cycle task failed: {e}"), 0),
                0,
            )
        });

        if outcome.cancelled {
            tracing::info!("Cycle cancelled");
        } else {
            self.state.cycles_completed += 1;
            match &outcome.result {
                Ok(payload) => {
                    tracing::info!(
                        found = payload.found_count,
                        status = payload.status.as_str(),
                        attempts = outcome.attempts,
                        "Cycle completed"
                    );
                    self.state.last_successful_payload = Some(payload.clone());
                    self.state.last_error = None;
                    self.events.publish(UsageEvent::Update(payload.clone()));
                }
                Err(error) => {
                    tracing::warn!(
                        kind = %error.kind,
                        attempts = outcome.attempts,
                        error = %error.message,
                        "Cycle failed"
                    );
                    self.state.last_error = Some(error.clone());
                    self.events.publish(UsageEvent::Error(error.clone()));
                    if error.is_fatal() {
                        tracing::error!(kind = %error.kind, "Fatal error, polling stopped");
                        self.stop("fatal error");
                    }
                }
            }
        }

        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn shutdown(&mut self) {
        self.stop("shutdown");
        self.trigger.fire();
        if let Some(handle) = self.in_flight.take() {
            let joined = handle.await;
            self.state.is_cycle_in_flight = false;
            self.complete(joined);
        }
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(CycleOutcome::cancelled(0));
        }
    }
}

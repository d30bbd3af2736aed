//! Command surface for the display layer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};

use crate::core::driver::BrowserDriver;
use crate::core::events::{EventBus, UsageEvent};
use crate::core::extract::ExtractionPipeline;
use crate::core::models::CyclePayload;
use crate::core::retry::RetryPolicy;
use crate::core::scheduler::{self, CycleRecorder, SchedulerHandle, SchedulerState, ScrapeCycle};
use crate::core::session::{SessionController, SessionSettings, SessionStatus};
use crate::error::{Result, ScrapeAttemptError, WatchError};
use crate::storage::cache::LastGoodCache;
use crate::storage::config::ResolvedConfig;
use crate::storage::history::HistoryStore;
use crate::storage::paths::AppPaths;
use crate::storage::session_store::SessionStore;

/// Wires the session controller, extraction pipeline and scheduler together.
#[derive(Debug)]
pub struct UsageMonitor {
    controller: Arc<SessionController>,
    scheduler: SchedulerHandle,
    events: EventBus,
}

impl UsageMonitor {
    /// Build from resolved configuration. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    /// Returns an error if the data directories cannot be created.
    pub fn new(config: &ResolvedConfig, paths: &AppPaths, driver: Box<dyn BrowserDriver>) -> Result<Self> {
        paths.ensure_dirs()?;
        let file = &config.file;

        let store = SessionStore::new(paths.session_file())
            .with_validity(chrono::Duration::days(file.session.validity_days));
        let controller = Arc::new(SessionController::new(
            driver,
            store,
            SessionSettings::from_config(config, paths),
        ));

        let cache = LastGoodCache::new(paths.last_good_file());
        let cold_start = cache.load();
        let mut recorder = CycleRecorder::disabled().with_cache(cache);
        if file.history.enabled {
            match HistoryStore::open(&paths.history_db_file()) {
                Ok(history) => {
                    recorder = recorder.with_history(
                        history,
                        file.history.retention_days,
                        file.history.max_rows,
                    );
                }
                Err(e) => tracing::warn!(error = %e, "Cycle history unavailable"),
            }
        }

        Ok(Self::from_parts(
            controller,
            ExtractionPipeline::new(&file.extraction),
            RetryPolicy::from_config(&file.retry),
            recorder,
            config.poll_interval,
            cold_start,
        ))
    }

    /// Assemble from already built parts.
    #[must_use]
    pub fn from_parts(
        controller: Arc<SessionController>,
        pipeline: ExtractionPipeline,
        policy: RetryPolicy,
        recorder: CycleRecorder,
        interval: Duration,
        cold_start: Option<CyclePayload>,
    ) -> Self {
        if let Some(payload) = &cold_start {
            tracing::debug!(scraped_at = %payload.scraped_at, "Loaded last known good payload");
        }
        let events = EventBus::new();
        let runner = Arc::new(ScrapeCycle::new(Arc::clone(&controller), pipeline, policy));
        let scheduler = scheduler::spawn(runner, events.clone(), recorder, interval, cold_start);
        Self {
            controller,
            scheduler,
            events,
        }
    }

    #[must_use]
    pub fn check_session(&self) -> bool {
        self.controller.is_session_valid()
    }

    #[must_use]
    pub fn session_status(&self) -> SessionStatus {
        self.controller.status_at(chrono::Utc::now())
    }

    /// Interactive login; refreshes immediately afterwards when polling is running.
    ///
    /// # Errors
    /// `LoginFailed` or `LoginTimeout`.
    pub async fn manual_login(&self, done: oneshot::Receiver<()>) -> Result<()> {
        self.controller.manual_login(done).await?;
        if self.scheduler.state().await?.is_running {
            self.scheduler.force_tick().await?;
        }
        Ok(())
    }

    /// One-shot cycle that still respects the in-flight guard.
    ///
    /// # Errors
    /// The classified error of the cycle this call ran or joined.
    pub async fn poll_usage(&self) -> std::result::Result<CyclePayload, ScrapeAttemptError> {
        self.scheduler.poll_now().await.result
    }

    /// # Errors
    /// `ConfigInvalid` for a zero interval, `SchedulerClosed` after shutdown.
    pub async fn start_polling(&self, interval_seconds: u64) -> Result<()> {
        if interval_seconds == 0 {
            return Err(WatchError::ConfigInvalid {
                key: "interval".to_string(),
                value: interval_seconds.to_string(),
                message: "polling interval must be positive".to_string(),
            });
        }
        self.scheduler
            .start(Duration::from_secs(interval_seconds))
            .await
    }

    /// # Errors
    /// `SchedulerClosed` after shutdown.
    pub async fn stop_polling(&self) -> Result<()> {
        self.scheduler.stop().await
    }

    /// # Errors
    /// `SchedulerClosed` after shutdown.
    pub async fn refresh(&self) -> Result<()> {
        self.scheduler.force_tick().await
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<UsageEvent> {
        self.events.subscribe()
    }

    pub async fn last_payload(&self) -> Option<CyclePayload> {
        self.scheduler
            .state()
            .await
            .ok()
            .and_then(|state| state.last_successful_payload)
    }

    /// # Errors
    /// `SchedulerClosed` after shutdown.
    pub async fn state(&self) -> Result<SchedulerState> {
        self.scheduler.state().await
    }

    /// Cancel any in-flight work, stop the scheduler and close the browser.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.controller.shutdown().await;
    }
}

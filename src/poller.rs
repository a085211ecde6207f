//! ==============================================================================
//! poller.rs - continuous polling loop
//! ==============================================================================
//!
//! purpose:
//!     one "pass" syncs every configured metric in incremental mode, then
//!     persists the watermark store. passes repeat every `poll_interval`.
//!
//!     ┌──────┐  pass start   ┌─────────┐  all metrics done  ┌──────┐
//!     │ Idle │ ────────────► │ Running │ ─── persist ─────► │ Idle │ ── sleep ──┐
//!     └──────┘               └─────────┘                    └──────┘            │
//!         ▲─────────────────────────────────────────────────────────────────────┘
//!
//! day rollover:
//!     the api is queried by calendar day. when the current hour is lower than
//!     the hour the previous pass started at, midnight has (probably) passed,
//!     so the window reaches back to yesterday to pick up its last readings.
//!     this only compares hours: an interval of ~23h or more, or a clock jump,
//!     can miss a rollover.
//!
//! failures (FailurePolicy):
//!     Continue: a failed metric is logged and skipped, a failed directory fetch
//!               skips the pass, a failed persist is retried next pass
//!     Abort:    the first failure ends the loop with that error
//!
//! ==============================================================================

use std::time::Duration;

use chrono::{DateTime, Local, Timelike};
use tracing::{debug, error, info, warn};

use crate::config::FailurePolicy;
use crate::domain::FetchWindow;
use crate::engine::{SyncEngine, SyncMode};
use crate::error::{SyncError, SyncResult};
use crate::sink::Sink;
use crate::tags::{directory, TagSource};
use crate::watermark::WatermarkStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassState {
    Idle,
    Running,
}

/// what happened during one pass
#[derive(Debug, Default)]
pub struct PassReport {
    pub window: Option<FetchWindow>,
    pub stored: usize,
    pub failed_metrics: Vec<String>,
    pub directory_failed: bool,
    pub persisted: bool,
}

pub struct Poller<'a> {
    source: &'a dyn TagSource,
    sink: &'a dyn Sink,
    store: &'a mut WatermarkStore,
    metrics: Vec<String>,
    convert_to_f: bool,
    policy: FailurePolicy,
    interval: Duration,
    previous_pass_start: Option<DateTime<Local>>,
    state: PassState,
}

/// days to query for a pass starting at `now`
pub fn fetch_window(now: DateTime<Local>, previous_pass_start: Option<DateTime<Local>>) -> FetchWindow {
    let today = now.date_naive();
    let crossed_midnight = previous_pass_start.is_some_and(|prev| now.hour() < prev.hour());

    if crossed_midnight {
        if let Some(yesterday) = today.pred_opt() {
            info!(%yesterday, "new day started, including end of yesterday");
            return FetchWindow { from: yesterday, to: today };
        }
    }
    FetchWindow::single_day(today)
}

impl<'a> Poller<'a> {
    pub fn new(
        source: &'a dyn TagSource,
        sink: &'a dyn Sink,
        store: &'a mut WatermarkStore,
        metrics: Vec<String>,
        convert_to_f: bool,
        policy: FailurePolicy,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            sink,
            store,
            metrics,
            convert_to_f,
            policy,
            interval,
            previous_pass_start: None,
            state: PassState::Idle,
        }
    }

    pub fn state(&self) -> PassState {
        self.state
    }

    /// poll forever; only returns on a failure under FailurePolicy::Abort
    pub async fn run(&mut self) -> SyncResult<()> {
        info!(interval_s = self.interval.as_secs(), metrics = ?self.metrics, "starting poller");
        loop {
            let report = self.run_pass(Local::now()).await?;
            info!(
                window = ?report.window,
                stored = report.stored,
                failed = report.failed_metrics.len(),
                persisted = report.persisted,
                "pass complete"
            );
            debug!(state = ?self.state(), sleep_s = self.interval.as_secs(), "waiting for next pass");
            tokio::time::sleep(self.interval).await;
        }
    }

    /// one pass over every configured metric
    pub async fn run_pass(&mut self, now: DateTime<Local>) -> SyncResult<PassReport> {
        let window = fetch_window(now, self.previous_pass_start);
        self.previous_pass_start = Some(now);
        self.state = PassState::Running;

        let result = self.sync_all(window).await;
        self.state = PassState::Idle;
        result
    }

    async fn sync_all(&mut self, window: FetchWindow) -> SyncResult<PassReport> {
        let mut report = PassReport { window: Some(window), ..Default::default() };

        // slave ids are only valid for one directory fetch
        let devices = match directory::list_devices(self.source).await {
            Ok(devices) => devices,
            Err(e) => {
                self.handle_failure("tag directory", &e)?;
                report.directory_failed = true;
                return Ok(report);
            }
        };
        info!(tags = devices.len(), "fetched tag list");

        let engine = SyncEngine::new(self.source, self.sink, self.convert_to_f);
        for metric in &self.metrics {
            let outcome = engine
                .sync_metric(metric, &devices, window, SyncMode::Incremental(self.store.ledger_mut()))
                .await;

            match outcome {
                Ok(stored) => report.stored += stored,
                Err(e) => {
                    if self.policy == FailurePolicy::Abort {
                        // keep what was stored before giving up
                        if let Err(persist_err) = self.store.persist().await {
                            warn!(error = %persist_err, "could not persist progress before aborting");
                        }
                    }
                    self.handle_failure(metric, &e)?;
                    report.failed_metrics.push(metric.clone());
                }
            }
        }

        match self.store.persist().await {
            Ok(()) => report.persisted = true,
            Err(e) => self.handle_failure("state persist", &e)?,
        }
        Ok(report)
    }

    /// log a failure and decide whether the loop survives it
    fn handle_failure(&self, what: &str, err: &SyncError) -> SyncResult<()> {
        match self.policy {
            FailurePolicy::Continue => {
                error!(%what, kind = err.kind(), error = %err, "failed, continuing with next step");
                Ok(())
            }
            FailurePolicy::Abort => {
                error!(%what, kind = err.kind(), error = %err, "failed, aborting");
                Err(err.clone())
            }
        }
    }
}

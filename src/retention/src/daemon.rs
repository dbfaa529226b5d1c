//! The retention daemon's event loop.
//!
//! A single task owns the [`RetentionEngine`] and serialises every trigger
//! through one `select!`: in-process expiration deadlines, the poll tick,
//! the periodic reconciliation and filesystem events. Each trigger's
//! handler runs to completion before the next one is looked at, so two
//! triggers can never race for the same file. Events that arrive while a
//! handler runs wait in the event source's channel.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tracing::{debug, error, info, warn};

use common::config::{Configuration, OperatingMode};

use crate::engine::RetentionEngine;
use crate::error::Result;
use crate::event_source::{EventSource, FsEvent};
use crate::metrics::{MetricsSummary, RetentionMetrics};

enum Wake {
    Shutdown,
    Tick,
    Event(Option<FsEvent>),
    Deadline,
    Reconcile,
}

#[derive(Debug)]
pub struct RetentionDaemon {
    engine: RetentionEngine,
    events: Option<EventSource>,
    mode: OperatingMode,
    poll_interval: Duration,
    reconcile_interval: Duration,
}

impl RetentionDaemon {
    /// Build the engine and, in watching mode, start watching the root.
    pub fn new(config: &Configuration, metrics: RetentionMetrics) -> Result<Self> {
        let engine = RetentionEngine::new(config, metrics);
        let events = if config.mode.watches_events() {
            Some(EventSource::watch(&config.root_path)?)
        } else {
            None
        };
        Ok(Self::with_events(engine, events, config))
    }

    /// Assemble a daemon from an existing engine and event source.
    pub fn with_events(
        engine: RetentionEngine,
        events: Option<EventSource>,
        config: &Configuration,
    ) -> Self {
        Self {
            engine,
            events,
            mode: config.mode,
            poll_interval: config.retention.poll_interval,
            reconcile_interval: config.expiration.reconcile_interval,
        }
    }

    pub fn engine(&self) -> &RetentionEngine {
        &self.engine
    }

    /// Run until `shutdown` fires (or its sender is dropped).
    ///
    /// Trigger failures are logged and the loop carries on. Returns the
    /// final metrics, which are also logged.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> MetricsSummary {
        info!(
            root = %self.engine.root().display(),
            mode = %self.mode,
            poll_interval = ?self.poll_interval,
            "Retention daemon starting"
        );

        self.startup().await;

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately and startup already checked
        ticker.tick().await;

        let mut reconcile = interval_at(
            Instant::now() + self.reconcile_interval,
            self.reconcile_interval,
        );
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let reconciles = self.engine.expires_files();

        loop {
            let next_deadline = self.engine.next_expiration();

            // a backlog of events must not hold back deadlines that are already due
            let wake = if next_deadline.is_some_and(|deadline| deadline <= Utc::now()) {
                Wake::Deadline
            } else {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => Wake::Shutdown,
                    _ = sleep_until_deadline(next_deadline) => Wake::Deadline,
                    _ = ticker.tick() => Wake::Tick,
                    _ = reconcile.tick(), if reconciles => Wake::Reconcile,
                    event = next_event(&mut self.events) => Wake::Event(event),
                }
            };

            match wake {
                Wake::Shutdown => {
                    info!("Shutdown requested, stopping retention daemon");
                    break;
                }
                Wake::Tick => self.on_tick().await,
                Wake::Event(Some(event)) => self.on_event(event).await,
                Wake::Event(None) => {
                    warn!("Filesystem event source closed, continuing with polling only");
                    self.events = None;
                    self.engine.event_source_lost();
                }
                Wake::Deadline => self.on_deadline().await,
                Wake::Reconcile => self.on_reconcile().await,
            }
        }

        if let Some(mut events) = self.events.take() {
            events.close();
        }

        let summary = self.engine.metrics().summary();
        summary.log();
        summary
    }

    async fn startup(&mut self) {
        match self.engine.run_size_check().await {
            Ok(report) => info!(
                size_bytes = report.final_bytes,
                ceiling_bytes = report.ceiling_bytes,
                evicted = report.evicted.len(),
                "Initial size check completed"
            ),
            Err(err) => error!(error = %err, "Initial size check failed"),
        }

        if self.engine.expires_files() {
            if self.engine.fires_expirations_in_process() {
                warn!(
                    "Expiration deadlines are held in memory and do not survive restarts; \
                     existing files are rescheduled from now"
                );
            }
            self.on_reconcile().await;
        }
    }

    async fn on_tick(&mut self) {
        if let Err(err) = self.engine.run_size_check().await {
            error!(error = %err, "Size check failed");
        }
    }

    async fn on_event(&mut self, event: FsEvent) {
        debug!(event = ?event, "Filesystem event");
        match event {
            FsEvent::Created(path) => {
                if let Err(err) = self.engine.handle_created(&path).await {
                    error!(path = %path.display(), error = %err, "Failed to handle new file");
                }
            }
            FsEvent::Modified(path) => self.engine.handle_modified(&path),
            FsEvent::Removed(path) => self.engine.handle_removed(&path).await,
        }
    }

    async fn on_deadline(&mut self) {
        let fired = self.engine.fire_due_expirations(Utc::now()).await;
        if !fired.is_empty() {
            debug!(count = fired.len(), "Expiration deadlines fired");
        }
    }

    async fn on_reconcile(&mut self) {
        // drops entries an external backend has already acted on
        self.engine.fire_due_expirations(Utc::now()).await;
        if let Err(err) = self.engine.reconcile_expirations().await {
            error!(error = %err, "Expiration reconciliation failed");
        }
    }
}

async fn next_event(events: &mut Option<EventSource>) -> Option<FsEvent> {
    match events {
        Some(source) => source.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<DateTime<Utc>>) {
    match deadline {
        Some(deadline) => {
            let wait = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;
        }
        None => std::future::pending().await,
    }
}

//! Query and command surface over the runtime.
//!
//! A [`FleetController`] owns the engine connection, the poll loop, the
//! action dispatcher, and the log reader. Queries read the latest
//! published snapshots and never touch the engine; commands go through
//! the dispatcher.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use fleetctl_common::config::FleetConfig;
use fleetctl_common::error::EngineError;
use fleetctl_common::types::{
    ActionRequest, ActionResult, ContainerView, LogLine, RawActionRequest, Target,
};
use fleetctl_runtime::dispatch::{BulkOutcome, Dispatcher};
use fleetctl_runtime::engine::Engine;
use fleetctl_runtime::logs::{LogReader, LogStream};
use fleetctl_runtime::metrics::MetricsSnapshot;
use fleetctl_runtime::poller::{Poller, TickOutcome};
use fleetctl_runtime::snapshot::{ContainerSnapshot, FeedHealth, Published};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::event::EventListener;

/// Latest container listing with its freshness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerListing {
    /// Managed containers, sorted by name. Empty before the first poll.
    pub containers: Vec<ContainerView>,
    /// Snapshot generation, `None` before the first successful poll.
    pub generation: Option<u64>,
    /// When the listed data was captured.
    pub captured_at: Option<DateTime<Utc>>,
    /// Feed freshness.
    pub health: FeedHealth,
}

impl ContainerListing {
    fn from_published(published: &Published<ContainerSnapshot>) -> Self {
        let snapshot = published.value.as_deref();
        Self {
            containers: snapshot.map(|s| s.containers.clone()).unwrap_or_default(),
            generation: snapshot.map(|s| s.generation),
            captured_at: snapshot.map(|s| s.captured_at),
            health: published.health.clone(),
        }
    }

    /// Returns whether the listing is older than the last poll attempt.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        self.health.is_stale()
    }
}

/// Latest metrics with their freshness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    /// Latest snapshot, `None` before the first successful poll.
    pub snapshot: Option<MetricsSnapshot>,
    /// Feed freshness.
    pub health: FeedHealth,
}

/// Overall health of the control layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HealthStatus {
    /// Both feeds are current.
    Ok,
    /// At least one feed missed its latest refresh.
    Stale,
    /// At least one feed crossed the failure threshold.
    Degraded,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Stale => "stale",
            Self::Degraded => "degraded",
        })
    }
}

/// Health report for both feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Worst status over both feeds.
    pub status: HealthStatus,
    /// Backend in use.
    pub backend: String,
    /// When this report was produced.
    pub checked_at: DateTime<Utc>,
    /// Container feed freshness.
    pub containers: FeedHealth,
    /// Metrics feed freshness.
    pub metrics: FeedHealth,
}

fn feed_status(health: &FeedHealth) -> HealthStatus {
    if health.is_degraded() {
        HealthStatus::Degraded
    } else if health.is_stale() {
        HealthStatus::Stale
    } else {
        HealthStatus::Ok
    }
}

/// Entry point for presentation clients.
#[derive(Debug)]
pub struct FleetController {
    config: FleetConfig,
    engine: Engine,
    poller: Arc<Poller>,
    dispatcher: Dispatcher,
    logs: LogReader,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FleetController {
    pub(crate) fn new(engine: Engine, config: FleetConfig) -> Self {
        let poller = Arc::new(Poller::new(engine.clone(), &config));
        let dispatcher = Dispatcher::new(engine.clone())
            .with_snapshot(poller.containers().subscribe())
            .with_refresh(poller.refresh_handle());
        let logs = LogReader::new(engine.clone(), config.log_buffer_lines)
            .with_snapshot(poller.containers().subscribe());
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            engine,
            poller,
            dispatcher,
            logs,
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// Returns the active configuration.
    #[must_use]
    pub const fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Returns the backend name.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.engine.backend_name()
    }

    /// Checks that the engine answers within the call timeout.
    ///
    /// # Errors
    ///
    /// Returns the engine failure, mapped to the client taxonomy.
    pub async fn ping(&self) -> Result<(), EngineError> {
        self.engine.ping().await
    }

    /// Starts the background poll loop. Returns `false` if it is already
    /// running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return false;
        }
        let _ = self.shutdown.send_replace(false);
        *task = Some(self.poller.spawn(self.shutdown.subscribe()));
        true
    }

    /// Runs one refresh of both feeds immediately.
    ///
    /// Safe while the loop runs: each feed has a single writer lock, so a
    /// manual refresh waits for an in-progress tick of the same feed and
    /// publications stay in engine-read order.
    pub async fn refresh_now(&self) -> TickOutcome {
        self.poller.tick().await
    }

    /// Refreshes only the container feed. Returns `true` on success.
    pub async fn refresh_containers(&self) -> bool {
        self.poller.refresh_containers().await
    }

    /// Refreshes only the metrics feed. Returns `true` on success.
    pub async fn refresh_metrics(&self) -> bool {
        self.poller.refresh_metrics().await
    }

    /// Asks the running loop for an early tick.
    pub fn request_refresh(&self) {
        self.poller.refresh_handle().notify_one();
    }

    /// Stops the poll loop and waits for it to finish its current tick.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send_replace(true);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "poll loop ended abnormally");
            }
        }
    }

    /// Latest managed containers with feed health.
    #[must_use]
    pub fn containers(&self) -> ContainerListing {
        ContainerListing::from_published(&self.poller.containers().current())
    }

    /// Latest metrics with feed health.
    #[must_use]
    pub fn metrics(&self) -> MetricsReport {
        let published = self.poller.metrics().current();
        MetricsReport {
            snapshot: published.value.as_deref().cloned(),
            health: published.health.clone(),
        }
    }

    /// Staleness of both feeds.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        let containers = self.poller.containers().current().health.clone();
        let metrics = self.poller.metrics().current().health.clone();
        HealthReport {
            status: feed_status(&containers).max(feed_status(&metrics)),
            backend: self.backend_name().to_string(),
            checked_at: Utc::now(),
            containers,
            metrics,
        }
    }

    /// Validates and applies a wire-shaped action request.
    pub async fn submit(&self, request: RawActionRequest) -> ActionResult {
        self.dispatcher.dispatch_raw(request).await
    }

    /// Applies a validated action request.
    pub async fn dispatch(&self, request: ActionRequest) -> ActionResult {
        self.dispatcher.dispatch(request).await
    }

    /// Stops every running managed container.
    ///
    /// # Errors
    ///
    /// Returns the engine failure if the containers cannot be listed.
    pub async fn stop_all(&self) -> Result<Vec<BulkOutcome>, EngineError> {
        self.dispatcher.stop_all().await
    }

    /// Follows a container's output, replaying the last `tail` lines
    /// first (the configured `logTailLines` when `None`).
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown target, or the engine failure.
    pub async fn open_logs(
        &self,
        target: &Target,
        tail: Option<usize>,
    ) -> Result<LogStream, EngineError> {
        self.logs.open(target, tail).await
    }

    /// Reads the last `lines` lines of a container's output.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown target, or the engine failure.
    pub async fn tail_logs(&self, target: &Target, lines: usize) -> Result<Vec<LogLine>, EngineError> {
        self.logs.tail(target, lines).await
    }

    /// Subscribes to container snapshot publications.
    #[must_use]
    pub fn subscribe_containers(&self) -> watch::Receiver<Arc<Published<ContainerSnapshot>>> {
        self.poller.containers().subscribe()
    }

    /// Subscribes to metrics publications.
    #[must_use]
    pub fn subscribe_metrics(&self) -> watch::Receiver<Arc<Published<MetricsSnapshot>>> {
        self.poller.metrics().subscribe()
    }

    /// Creates a lifecycle event listener starting from the current state.
    #[must_use]
    pub fn events(&self) -> EventListener {
        EventListener::new(self.subscribe_containers())
    }
}

impl Drop for FleetController {
    fn drop(&mut self) {
        let _ = self.shutdown.send_replace(true);
    }
}

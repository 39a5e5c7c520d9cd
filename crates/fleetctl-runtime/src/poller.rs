//! Scheduled refresh of the container and metrics feeds.
//!
//! One loop, one tick at a time. Each tick refreshes both feeds
//! concurrently and independently; a failure in one never blocks the
//! other, and no failure ever stops the loop.
//!
//! Every refresh of a feed, scheduled or requested, holds that feed's
//! writer lock from the engine read to the publish, so snapshots are
//! published in the order the engine was read.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use fleetctl_common::config::FleetConfig;
use rand::Rng;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::engine::Engine;
use crate::metrics::{self, MetricsSnapshot};
use crate::snapshot::{ContainerSnapshot, Feed};

/// Outcome of one tick, per feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// The container feed published a new snapshot.
    pub containers: bool,
    /// The metrics feed published a new snapshot.
    pub metrics: bool,
}

/// Periodic refresher owning both feeds.
#[derive(Debug)]
pub struct Poller {
    engine: Engine,
    containers: Arc<Feed<ContainerSnapshot>>,
    metrics: Arc<Feed<MetricsSnapshot>>,
    interval: Duration,
    jitter: Duration,
    refresh: Arc<Notify>,
    generation: AtomicU64,
    containers_writer: Mutex<()>,
    metrics_writer: Mutex<()>,
}

impl Poller {
    /// Creates a poller with empty feeds.
    #[must_use]
    pub fn new(engine: Engine, config: &FleetConfig) -> Self {
        Self {
            engine,
            containers: Arc::new(Feed::new("containers", config.degraded_after)),
            metrics: Arc::new(Feed::new("metrics", config.degraded_after)),
            interval: config.poll_interval(),
            jitter: config.poll_jitter(),
            refresh: Arc::new(Notify::new()),
            generation: AtomicU64::new(0),
            containers_writer: Mutex::new(()),
            metrics_writer: Mutex::new(()),
        }
    }

    /// Returns the container feed.
    #[must_use]
    pub const fn containers(&self) -> &Arc<Feed<ContainerSnapshot>> {
        &self.containers
    }

    /// Returns the metrics feed.
    #[must_use]
    pub const fn metrics(&self) -> &Arc<Feed<MetricsSnapshot>> {
        &self.metrics
    }

    /// Returns the handle used to request an early tick.
    #[must_use]
    pub fn refresh_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.refresh)
    }

    /// Returns the configured tick interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Refreshes both feeds once.
    pub async fn tick(&self) -> TickOutcome {
        let (containers, metrics) =
            tokio::join!(self.refresh_containers(), self.refresh_metrics());
        TickOutcome {
            containers,
            metrics,
        }
    }

    /// Refreshes the container feed. Returns `true` on success.
    pub async fn refresh_containers(&self) -> bool {
        let _writer = self.containers_writer.lock().await;
        let started = Utc::now();
        match self.engine.list_views().await {
            Ok(views) => {
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                let count = views.len();
                self.containers
                    .publish(ContainerSnapshot::new(generation, started, views), Utc::now());
                tracing::debug!(generation, containers = count, "container snapshot published");
                true
            }
            Err(e) => {
                let _ = self.containers.record_failure(&e, Utc::now());
                false
            }
        }
    }

    /// Refreshes the metrics feed. Returns `true` on success.
    pub async fn refresh_metrics(&self) -> bool {
        let _writer = self.metrics_writer.lock().await;
        match metrics::collect_metrics(&self.engine).await {
            Ok(snapshot) => {
                tracing::debug!(
                    running = snapshot.containers_running,
                    cpu = snapshot.cpu_percent_total,
                    "metrics snapshot published"
                );
                self.metrics.publish(snapshot, Utc::now());
                true
            }
            Err(e) => {
                let _ = self.metrics.record_failure(&e, Utc::now());
                false
            }
        }
    }

    fn jitter_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }

    /// Runs the loop until `shutdown` turns `true` or its sender is dropped.
    ///
    /// The first tick runs immediately. Missed ticks are skipped, never
    /// bunched up, and a tick always finishes before the next starts.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            backend = self.engine.backend_name(),
            "poller started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let delay = self.jitter_delay();
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                () = self.refresh.notified() => {
                    tracing::debug!("early refresh requested");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
            let _ = self.tick().await;
        }
        tracing::info!("poller stopped");
    }

    /// Spawns [`run`](Self::run) on the current runtime.
    #[must_use]
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(shutdown))
    }
}

//! In-process simulated engine.
//!
//! Keeps a small container table in memory and honours the same contract
//! as the Docker backend, including 404-style `NotFound` errors and log
//! following. It backs the test suites and the CLI's `memory://` demo
//! mode, and exposes knobs for engine outages, slow calls, held actions,
//! and log streams that stay open after removal.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetctl_common::error::EngineError;
use fleetctl_common::types::{Action, ContainerId, LogLine, OutputStream, PortMapping};
use futures_util::{StreamExt, stream};
use tokio::sync::{Semaphore, broadcast};

use super::{
    ContainerBackend, ExecuteOptions, HostInfo, RawLogStream, RawRecord, RawResult, RawUsage,
};

const LOG_CHANNEL_CAPACITY: usize = 1024;

struct SimContainer {
    id: ContainerId,
    name: String,
    image: String,
    created: DateTime<Utc>,
    started: Option<DateTime<Utc>>,
    ever_started: bool,
    status_override: Option<Option<String>>,
    usage: RawUsage,
    ports: Vec<PortMapping>,
    labels: BTreeMap<String, String>,
    history: Vec<LogLine>,
    followers: broadcast::Sender<LogLine>,
}

impl SimContainer {
    fn status(&self) -> Option<String> {
        if let Some(status) = &self.status_override {
            return status.clone();
        }
        Some(match self.started {
            Some(at) => {
                let secs = (Utc::now() - at).num_seconds().max(0);
                format!("Up {secs} seconds")
            }
            None if self.ever_started => "Exited (0) Less than a second ago".to_string(),
            None => "Created".to_string(),
        })
    }

    fn record(&self) -> RawRecord {
        RawRecord {
            id: self.id.to_string(),
            name: format!("/{}", self.name),
            status: self.status(),
            image: Some(self.image.clone()),
            created: Some(self.created.timestamp()),
            ports: self.ports.clone(),
            labels: self.labels.clone(),
        }
    }
}

#[derive(Default)]
struct SimState {
    containers: Vec<SimContainer>,
    unavailable: bool,
    stats_unavailable: bool,
    hold_streams_open: bool,
    orphaned_streams: Vec<broadcast::Sender<LogLine>>,
    volumes_removed: Vec<ContainerId>,
    list_delay: Option<Duration>,
    action_gate: Option<Arc<Semaphore>>,
}

/// Simulated container engine.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<SimState>,
    list_calls: AtomicU64,
    execute_calls: AtomicU64,
}

impl MemoryBackend {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine seeded with a small demo fleet: three managed
    /// nodes (two running) and one unmanaged container.
    #[must_use]
    pub fn demo(prefix: &str) -> Self {
        let backend = Self::new();
        let first = backend.add_container(&format!("{prefix}node-01"), "nexus-cli:latest", true);
        let _ = backend.add_container(&format!("{prefix}node-02"), "nexus-cli:latest", true);
        let _ = backend.add_container(&format!("{prefix}node-03"), "nexus-cli:latest", false);
        let _ = backend.add_container("registry", "registry:2", true);
        backend.emit_log(&first, OutputStream::Stdout, "node started");
        backend.set_usage(
            &first,
            RawUsage {
                cpu_total_ns: 400_000_000,
                precpu_total_ns: 200_000_000,
                system_cpu_ns: 2_000_000_000,
                presystem_cpu_ns: 1_000_000_000,
                online_cpus: 2,
                memory_usage_bytes: 64 * 1024 * 1024,
                memory_limit_bytes: 512 * 1024 * 1024,
                network_rx_bytes: 4096,
                network_tx_bytes: 1024,
            },
        );
        backend
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a container and returns its generated id.
    pub fn add_container(&self, name: &str, image: &str, running: bool) -> ContainerId {
        let id = ContainerId::generate();
        let now = Utc::now();
        let (followers, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        self.lock().containers.push(SimContainer {
            id: id.clone(),
            name: name.to_string(),
            image: image.to_string(),
            created: now,
            started: running.then_some(now),
            ever_started: running,
            status_override: None,
            usage: RawUsage::default(),
            ports: Vec::new(),
            labels: BTreeMap::new(),
            history: Vec::new(),
            followers,
        });
        id
    }

    /// Adds a container whose status text is reported verbatim (or not at
    /// all for `None`) until an action changes its state.
    pub fn add_with_status(&self, name: &str, image: &str, status: Option<&str>) -> ContainerId {
        let running = status.is_some_and(|s| s.to_ascii_lowercase().starts_with("up"));
        let id = self.add_container(name, image, running);
        if let Some(c) = self.lock().containers.iter_mut().find(|c| c.id == id) {
            c.status_override = Some(status.map(str::to_string));
        }
        id
    }

    /// Simulates the engine going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    /// Makes stats calls fail while listings keep working.
    pub fn set_stats_available(&self, available: bool) {
        self.lock().stats_unavailable = !available;
    }

    /// Delays the answer of every listing by `delay`. The records are read
    /// before the delay.
    pub fn set_list_delay(&self, delay: Option<Duration>) {
        self.lock().list_delay = delay;
    }

    /// Keeps log followers attached after their container is removed, like
    /// an engine that never closes the follow connection.
    pub fn hold_streams_open(&self, hold: bool) {
        self.lock().hold_streams_open = hold;
    }

    /// Makes every subsequent `execute` wait until [`release_actions`](Self::release_actions).
    pub fn hold_actions(&self) {
        self.lock().action_gate = Some(Arc::new(Semaphore::new(0)));
    }

    /// Lets held and future actions proceed.
    pub fn release_actions(&self) {
        if let Some(gate) = self.lock().action_gate.take() {
            gate.close();
        }
    }

    /// Sets the resource counters reported for a container.
    pub fn set_usage(&self, id: &ContainerId, usage: RawUsage) {
        if let Some(c) = self.lock().containers.iter_mut().find(|c| c.id == *id) {
            c.usage = usage;
        }
    }

    /// Sets the ports reported for a container.
    pub fn set_ports(&self, id: &ContainerId, ports: Vec<PortMapping>) {
        if let Some(c) = self.lock().containers.iter_mut().find(|c| c.id == *id) {
            c.ports = ports;
        }
    }

    /// Sets one label on a container.
    pub fn set_label(&self, id: &ContainerId, key: &str, value: &str) {
        if let Some(c) = self.lock().containers.iter_mut().find(|c| c.id == *id) {
            let _ = c.labels.insert(key.to_string(), value.to_string());
        }
    }

    /// Returns whether a removal of `id` also deleted its volumes.
    pub fn volumes_removed(&self, id: &ContainerId) -> bool {
        self.lock().volumes_removed.contains(id)
    }

    /// Appends a line to a container's output.
    pub fn emit_log(&self, id: &ContainerId, stream: OutputStream, text: &str) {
        let mut state = self.lock();
        if let Some(c) = state.containers.iter_mut().find(|c| c.id == *id) {
            let line = LogLine {
                timestamp: Utc::now(),
                stream,
                text: text.to_string(),
            };
            c.history.push(line.clone());
            let _ = c.followers.send(line);
        }
    }

    /// Removes a container behind the control layer's back.
    pub fn remove_external(&self, id: &ContainerId) -> bool {
        self.remove_entry(&mut self.lock(), id)
    }

    /// Number of listings served so far.
    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of mutating calls received so far.
    pub fn execute_calls(&self) -> u64 {
        self.execute_calls.load(Ordering::SeqCst)
    }

    /// Returns whether a container with this id exists and is running.
    pub fn is_running(&self, id: &ContainerId) -> Option<bool> {
        self.lock()
            .containers
            .iter()
            .find(|c| c.id == *id)
            .map(|c| c.started.is_some())
    }

    fn remove_entry(&self, state: &mut SimState, id: &ContainerId) -> bool {
        let Some(pos) = state.containers.iter().position(|c| c.id == *id) else {
            return false;
        };
        let removed = state.containers.remove(pos);
        if state.hold_streams_open {
            state.orphaned_streams.push(removed.followers);
        }
        true
    }

    fn check_available(&self) -> Result<(), EngineError> {
        if self.lock().unavailable {
            return Err(EngineError::unavailable("connection refused (simulated)"));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), EngineError> {
        self.check_available()
    }

    async fn list_containers(&self) -> Result<Vec<RawRecord>, EngineError> {
        let _ = self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let (records, delay) = {
            let state = self.lock();
            let records: Vec<_> = state.containers.iter().map(SimContainer::record).collect();
            (records, state.list_delay)
        };
        // The answer reflects the moment of the read, however late it lands.
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(records)
    }

    async fn execute(
        &self,
        action: Action,
        id: &ContainerId,
        options: ExecuteOptions,
    ) -> Result<RawResult, EngineError> {
        let _ = self.execute_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.lock().action_gate.clone();
        if let Some(gate) = gate {
            // Closed on release; the error just means "go ahead".
            let _ = gate.acquire().await;
        }
        self.check_available()?;

        let mut state = self.lock();
        if action == Action::Remove {
            return if self.remove_entry(&mut state, id) {
                if options.remove_volumes {
                    state.volumes_removed.push(id.clone());
                }
                Ok(RawResult {
                    detail: "removed".into(),
                })
            } else {
                Err(EngineError::not_found(id.as_str()))
            };
        }

        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == *id)
            .ok_or_else(|| EngineError::not_found(id.as_str()))?;
        container.status_override = None;
        match action {
            Action::Start | Action::Restart => {
                container.started = Some(Utc::now());
                container.ever_started = true;
            }
            Action::Stop => container.started = None,
            Action::Remove => {}
        }
        Ok(RawResult {
            detail: format!("{action} applied"),
        })
    }

    async fn open_log_stream(
        &self,
        id: &ContainerId,
        tail: usize,
    ) -> Result<RawLogStream, EngineError> {
        self.check_available()?;
        let state = self.lock();
        let container = state
            .containers
            .iter()
            .find(|c| c.id == *id)
            .ok_or_else(|| EngineError::not_found(id.as_str()))?;

        let skip = container.history.len().saturating_sub(tail);
        let replay: Vec<_> = container.history[skip..].iter().cloned().map(Ok).collect();
        let receiver = container.followers.subscribe();
        drop(state);

        let live = stream::unfold(receiver, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(line) => return Some((Ok(line), rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream::iter(replay).chain(live).boxed())
    }

    async fn tail_logs(&self, id: &ContainerId, tail: usize) -> Result<Vec<LogLine>, EngineError> {
        self.check_available()?;
        let state = self.lock();
        let container = state
            .containers
            .iter()
            .find(|c| c.id == *id)
            .ok_or_else(|| EngineError::not_found(id.as_str()))?;
        let skip = container.history.len().saturating_sub(tail);
        Ok(container.history[skip..].to_vec())
    }

    async fn stats(&self, id: &ContainerId) -> Result<RawUsage, EngineError> {
        self.check_available()?;
        let state = self.lock();
        if state.stats_unavailable {
            return Err(EngineError::unavailable("stats endpoint failed (simulated)"));
        }
        state
            .containers
            .iter()
            .find(|c| c.id == *id)
            .map(|c| c.usage)
            .ok_or_else(|| EngineError::not_found(id.as_str()))
    }

    async fn host_info(&self) -> Result<HostInfo, EngineError> {
        self.check_available()?;
        Ok(HostInfo {
            engine_version: Some(format!("memory-{}", env!("CARGO_PKG_VERSION"))),
            cpu_count: std::thread::available_parallelism()
                .ok()
                .and_then(|n| u64::try_from(n.get()).ok()),
            memory_total_bytes: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_added_containers_with_engine_style_names() {
        let backend = MemoryBackend::new();
        let _ = backend.add_container("nexus-a", "img", true);
        let records = backend.list_containers().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "/nexus-a");
        assert!(records[0].status.as_deref().unwrap().starts_with("Up"));
    }

    #[tokio::test]
    async fn stop_then_start_changes_status() {
        let backend = MemoryBackend::new();
        let id = backend.add_container("nexus-a", "img", true);
        let _ = backend
            .execute(Action::Stop, &id, ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(backend.is_running(&id), Some(false));
        let _ = backend
            .execute(Action::Start, &id, ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(backend.is_running(&id), Some(true));
        assert_eq!(backend.execute_calls(), 2);
    }

    #[tokio::test]
    async fn remove_unknown_id_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend
            .execute(Action::Remove, &ContainerId::new("nope"), ExecuteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn remove_with_volumes_is_recorded() {
        let backend = MemoryBackend::new();
        let id = backend.add_container("nexus-a", "img", false);
        let options = ExecuteOptions {
            remove_volumes: true,
            ..ExecuteOptions::default()
        };
        let _ = backend.execute(Action::Remove, &id, options).await.unwrap();
        assert!(backend.volumes_removed(&id));
    }

    #[tokio::test]
    async fn unavailable_engine_fails_listing() {
        let backend = MemoryBackend::new();
        backend.set_available(false);
        assert!(backend.list_containers().await.is_err());
        backend.set_available(true);
        assert!(backend.list_containers().await.is_ok());
    }

    #[tokio::test]
    async fn log_stream_replays_tail_then_follows() {
        let backend = MemoryBackend::new();
        let id = backend.add_container("nexus-a", "img", true);
        backend.emit_log(&id, OutputStream::Stdout, "one");
        backend.emit_log(&id, OutputStream::Stdout, "two");

        let mut logs = backend.open_log_stream(&id, 1).await.unwrap();
        backend.emit_log(&id, OutputStream::Stderr, "three");

        assert_eq!(logs.next().await.unwrap().unwrap().text, "two");
        let live = logs.next().await.unwrap().unwrap();
        assert_eq!(live.text, "three");
        assert_eq!(live.stream, OutputStream::Stderr);
    }

    #[tokio::test]
    async fn removal_closes_followers_unless_held() {
        let backend = MemoryBackend::new();
        let id = backend.add_container("nexus-a", "img", true);
        let mut logs = backend.open_log_stream(&id, 0).await.unwrap();
        assert!(backend.remove_external(&id));
        assert!(logs.next().await.is_none());
    }

    #[test]
    fn status_override_can_be_missing() {
        let backend = MemoryBackend::new();
        let id = backend.add_with_status("nexus-x", "img", None);
        let state = backend.lock();
        let c = state.containers.iter().find(|c| c.id == id).unwrap();
        assert_eq!(c.record().status, None);
    }
}

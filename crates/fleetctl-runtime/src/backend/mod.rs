//! Container engine abstraction.
//!
//! A [`ContainerBackend`] speaks one engine's protocol and nothing else: no
//! filtering, no deadlines, no normalization. Those live in
//! [`Engine`](crate::engine::Engine), which wraps whichever backend
//! [`connect`] selects for the configured endpoint.

pub mod docker;
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetctl_common::config::{EndpointKind, FleetConfig};
use fleetctl_common::error::{EngineError, Result};
use fleetctl_common::types::{Action, ContainerId, LogLine, PortMapping};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// A container record exactly as the engine reported it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    /// Engine id; empty when the engine omitted it.
    pub id: String,
    /// Primary name, possibly with the engine's leading `/`.
    pub name: String,
    /// Human status text such as `Up 3 minutes`.
    pub status: Option<String>,
    /// Image reference.
    pub image: Option<String>,
    /// Creation time in seconds since the Unix epoch.
    pub created: Option<i64>,
    /// Exposed and published ports.
    pub ports: Vec<PortMapping>,
    /// Container labels.
    pub labels: BTreeMap<String, String>,
}

/// Per-call parameters of a mutating action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Time the engine waits for a graceful stop before killing.
    pub grace: Duration,
    /// Delete the container's volumes when removing it.
    pub remove_volumes: bool,
}

/// Engine acknowledgement of a mutating call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResult {
    /// Engine-provided detail, e.g. "already started".
    pub detail: String,
}

/// Raw resource counters for one container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawUsage {
    /// Cumulative container CPU time at this sample, in nanoseconds.
    pub cpu_total_ns: u64,
    /// Cumulative container CPU time at the previous sample.
    pub precpu_total_ns: u64,
    /// Cumulative host CPU time at this sample.
    pub system_cpu_ns: u64,
    /// Cumulative host CPU time at the previous sample.
    pub presystem_cpu_ns: u64,
    /// Number of CPUs visible to the container.
    pub online_cpus: u32,
    /// Memory in use, in bytes.
    pub memory_usage_bytes: u64,
    /// Memory limit, in bytes (0 when unlimited or unknown).
    pub memory_limit_bytes: u64,
    /// Bytes received over all interfaces.
    pub network_rx_bytes: u64,
    /// Bytes sent over all interfaces.
    pub network_tx_bytes: u64,
}

/// Host-level facts reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    /// Engine server version.
    pub engine_version: Option<String>,
    /// Number of host CPUs.
    pub cpu_count: Option<u64>,
    /// Total host memory in bytes.
    pub memory_total_bytes: Option<u64>,
}

/// Restricts listings to the managed naming convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameFilter {
    prefix: String,
}

impl NameFilter {
    /// Creates a filter matching names that start with `prefix`.
    #[must_use]
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Returns the configured prefix.
    #[must_use]
    pub fn as_prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns whether a raw engine name is managed.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        name.trim_start_matches('/').starts_with(&self.prefix)
    }
}

/// Lazy sequence of log lines coming from the engine.
pub type RawLogStream = BoxStream<'static, std::result::Result<LogLine, EngineError>>;

/// Engine-specific implementation of the container operations.
///
/// Implementors must be cheap to share: one instance is reused for every
/// call for the lifetime of the process.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Checks that the engine answers at all.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unavailable`] if the engine is unreachable.
    async fn ping(&self) -> std::result::Result<(), EngineError>;

    /// Lists every container the engine knows, running or not.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unavailable`] if the engine is unreachable.
    async fn list_containers(&self) -> std::result::Result<Vec<RawRecord>, EngineError>;

    /// Applies a mutating action. This is the only call that changes
    /// runtime state. `Remove` is always forced.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown id, or
    /// [`EngineError::Unavailable`] if the engine rejects the call.
    async fn execute(
        &self,
        action: Action,
        id: &ContainerId,
        options: ExecuteOptions,
    ) -> std::result::Result<RawResult, EngineError>;

    /// Attaches to a container's output, replaying the last `tail` lines
    /// and then following new ones.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown id.
    async fn open_log_stream(
        &self,
        id: &ContainerId,
        tail: usize,
    ) -> std::result::Result<RawLogStream, EngineError>;

    /// Reads the last `tail` lines without following.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown id.
    async fn tail_logs(
        &self,
        id: &ContainerId,
        tail: usize,
    ) -> std::result::Result<Vec<LogLine>, EngineError>;

    /// Samples resource counters for one container.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown id.
    async fn stats(&self, id: &ContainerId) -> std::result::Result<RawUsage, EngineError>;

    /// Reads host-level facts.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unavailable`] if the engine is unreachable.
    async fn host_info(&self) -> std::result::Result<HostInfo, EngineError>;
}

/// Creates the backend selected by the configured endpoint.
///
/// Never contacts the engine. An engine that is down, or a socket that
/// does not exist yet, shows up as `Unavailable` on each call instead.
///
/// # Errors
///
/// Returns an error only if the endpoint string is malformed.
pub fn connect(config: &FleetConfig) -> Result<Arc<dyn ContainerBackend>> {
    match config.endpoint_kind()? {
        EndpointKind::Memory => {
            tracing::info!("using in-memory engine");
            Ok(Arc::new(memory::MemoryBackend::demo(&config.managed_prefix)))
        }
        kind => {
            // Stop and restart answer only once the container is down.
            let request_timeout = config.call_timeout() + config.stop_grace();
            let backend = docker::DockerBackend::connect(&kind, request_timeout)?;
            tracing::info!(endpoint = %config.engine_endpoint, "docker engine client configured");
            Ok(Arc::new(backend))
        }
    }
}

//! Docker Engine API backend.
//!
//! Holds one long-lived `bollard` client for the whole process instead of
//! spawning a CLI process per call.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerSummary, Port};
use bollard::query_parameters::{
    ListContainersOptions, LogsOptionsBuilder, RemoveContainerOptions, RestartContainerOptions,
    StartContainerOptions, StatsOptionsBuilder, StopContainerOptions,
};
use fleetctl_common::config::EndpointKind;
use fleetctl_common::error::EngineError;
use fleetctl_common::types::{Action, ContainerId, LogLine, OutputStream, PortMapping};
use futures_util::{StreamExt, TryStreamExt, stream};

use super::{
    ContainerBackend, ExecuteOptions, HostInfo, RawLogStream, RawRecord, RawResult, RawUsage,
};

/// Backend talking to a Docker-compatible engine over its HTTP API.
///
/// The client is built on first use and then kept for the life of the
/// backend. Until it can be built (e.g. the socket does not exist yet)
/// every call fails with [`EngineError::Unavailable`] and the next call
/// tries again.
pub struct DockerBackend {
    endpoint: EndpointKind,
    request_timeout: Duration,
    client: Mutex<Option<Docker>>,
}

impl DockerBackend {
    /// Prepares a client for the given endpoint. The engine is not
    /// contacted and a missing socket is not an error here.
    ///
    /// `request_timeout` bounds every HTTP request the client makes; it
    /// must cover the longest engine-side wait, i.e. a graceful stop.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unavailable`] for the in-memory endpoint,
    /// which no docker client can serve.
    pub fn connect(endpoint: &EndpointKind, request_timeout: Duration) -> Result<Self, EngineError> {
        if *endpoint == EndpointKind::Memory {
            return Err(EngineError::unavailable(
                "memory endpoint cannot back a docker client",
            ));
        }
        let backend = Self {
            endpoint: endpoint.clone(),
            request_timeout,
            client: Mutex::new(None),
        };
        if let Err(e) = backend.client() {
            tracing::warn!(error = %e, "docker engine not reachable yet, retrying on each call");
        }
        Ok(backend)
    }

    fn client(&self) -> Result<Docker, EngineError> {
        let mut slot = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(docker) = slot.as_ref() {
            return Ok(docker.clone());
        }
        let timeout_secs = u64::try_from(self.request_timeout.as_millis().div_ceil(1000))
            .unwrap_or(u64::MAX)
            .max(1);
        let docker = match &self.endpoint {
            EndpointKind::Unix(path) => {
                Docker::connect_with_unix(path, timeout_secs, bollard::API_DEFAULT_VERSION)
            }
            EndpointKind::Http(addr) => {
                Docker::connect_with_http(addr, timeout_secs, bollard::API_DEFAULT_VERSION)
            }
            EndpointKind::Memory => {
                return Err(EngineError::unavailable(
                    "memory endpoint cannot back a docker client",
                ));
            }
        }
        .map_err(|e| EngineError::unavailable(e.to_string()))?;
        *slot = Some(docker.clone());
        Ok(docker)
    }

    fn map_error(&self, err: BollardError, target: &str) -> EngineError {
        map_error(err, target, self.request_timeout)
    }
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn ping(&self) -> Result<(), EngineError> {
        let _ = self
            .client()?
            .ping()
            .await
            .map_err(|e| self.map_error(e, "engine"))?;
        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<RawRecord>, EngineError> {
        let options = ListContainersOptions {
            all: true,
            ..Default::default()
        };
        let summaries = self
            .client()?
            .list_containers(Some(options))
            .await
            .map_err(|e| self.map_error(e, "containers"))?;
        Ok(summaries.into_iter().map(raw_record).collect())
    }

    async fn execute(
        &self,
        action: Action,
        id: &ContainerId,
        options: ExecuteOptions,
    ) -> Result<RawResult, EngineError> {
        let docker = self.client()?;
        let grace_secs = i32::try_from(options.grace.as_secs()).unwrap_or(i32::MAX);
        let outcome = match action {
            Action::Start => {
                docker
                    .start_container(id.as_str(), None::<StartContainerOptions>)
                    .await
            }
            Action::Stop => {
                let stop = StopContainerOptions {
                    t: Some(grace_secs),
                    signal: None,
                };
                docker.stop_container(id.as_str(), Some(stop)).await
            }
            Action::Restart => {
                let restart = RestartContainerOptions {
                    t: Some(grace_secs),
                    signal: None,
                };
                docker.restart_container(id.as_str(), Some(restart)).await
            }
            Action::Remove => {
                let remove = RemoveContainerOptions {
                    force: true,
                    v: options.remove_volumes,
                    link: false,
                };
                docker.remove_container(id.as_str(), Some(remove)).await
            }
        };
        outcome.map_err(|e| self.map_error(e, id.as_str()))?;
        Ok(applied(action, options))
    }

    async fn open_log_stream(
        &self,
        id: &ContainerId,
        tail: usize,
    ) -> Result<RawLogStream, EngineError> {
        let options = LogsOptionsBuilder::new()
            .follow(true)
            .stdout(true)
            .stderr(true)
            .timestamps(true)
            .tail(&tail.to_string())
            .build();
        let target = id.to_string();
        let timeout = self.request_timeout;
        let frames = self.client()?.logs(id.as_str(), Some(options));

        Ok(frames
            .map(move |frame| match frame {
                Ok(output) => frame_lines(&output).into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err(map_error(e, &target, timeout))],
            })
            .flat_map(stream::iter)
            .boxed())
    }

    async fn tail_logs(&self, id: &ContainerId, tail: usize) -> Result<Vec<LogLine>, EngineError> {
        let options = LogsOptionsBuilder::new()
            .follow(false)
            .stdout(true)
            .stderr(true)
            .timestamps(true)
            .tail(&tail.to_string())
            .build();
        let frames: Vec<LogOutput> = self
            .client()?
            .logs(id.as_str(), Some(options))
            .try_collect()
            .await
            .map_err(|e| self.map_error(e, id.as_str()))?;
        Ok(frames.iter().flat_map(frame_lines).collect())
    }

    async fn stats(&self, id: &ContainerId) -> Result<RawUsage, EngineError> {
        // A non one-shot sample makes the engine fill in the previous CPU
        // reading, which the percentage calculation needs.
        let options = StatsOptionsBuilder::new()
            .stream(false)
            .one_shot(false)
            .build();
        let docker = self.client()?;
        let mut samples = docker.stats(id.as_str(), Some(options));
        let Some(sample) = samples.next().await else {
            return Err(EngineError::unavailable(format!(
                "engine returned no stats for {id}"
            )));
        };
        let stats = sample.map_err(|e| self.map_error(e, id.as_str()))?;

        let mut usage = RawUsage::default();
        if let Some(cpu) = stats.cpu_stats.as_ref() {
            usage.cpu_total_ns = cpu
                .cpu_usage
                .as_ref()
                .and_then(|u| u.total_usage)
                .unwrap_or(0);
            usage.system_cpu_ns = cpu.system_cpu_usage.unwrap_or(0);
            usage.online_cpus = cpu
                .online_cpus
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(1);
        }
        if let Some(precpu) = stats.precpu_stats.as_ref() {
            usage.precpu_total_ns = precpu
                .cpu_usage
                .as_ref()
                .and_then(|u| u.total_usage)
                .unwrap_or(0);
            usage.presystem_cpu_ns = precpu.system_cpu_usage.unwrap_or(0);
        }
        if let Some(memory) = stats.memory_stats.as_ref() {
            usage.memory_usage_bytes = memory.usage.unwrap_or(0);
            usage.memory_limit_bytes = memory.limit.unwrap_or(0);
        }
        if let Some(networks) = stats.networks.as_ref() {
            for net in networks.values() {
                usage.network_rx_bytes += net.rx_bytes.unwrap_or(0);
                usage.network_tx_bytes += net.tx_bytes.unwrap_or(0);
            }
        }
        Ok(usage)
    }

    async fn host_info(&self) -> Result<HostInfo, EngineError> {
        let info = self
            .client()?
            .info()
            .await
            .map_err(|e| self.map_error(e, "engine"))?;
        Ok(HostInfo {
            engine_version: info.server_version,
            cpu_count: info.ncpu.and_then(|n| u64::try_from(n).ok()),
            memory_total_bytes: info.mem_total.and_then(|n| u64::try_from(n).ok()),
        })
    }
}

fn raw_record(summary: ContainerSummary) -> RawRecord {
    RawRecord {
        id: summary.id.unwrap_or_default(),
        name: summary
            .names
            .and_then(|names| names.into_iter().next())
            .unwrap_or_default(),
        status: summary.status,
        image: summary.image,
        created: summary.created,
        ports: summary
            .ports
            .unwrap_or_default()
            .iter()
            .map(port_mapping)
            .collect(),
        labels: summary
            .labels
            .map(|labels| labels.into_iter().collect::<BTreeMap<_, _>>())
            .unwrap_or_default(),
    }
}

fn port_mapping(port: &Port) -> PortMapping {
    let protocol = port
        .typ
        .as_ref()
        .map(ToString::to_string)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "tcp".to_string());
    PortMapping {
        private_port: port.private_port,
        public_port: port.public_port,
        host_ip: port.ip.clone().filter(|ip| !ip.is_empty()),
        protocol,
    }
}

/// Acknowledgement for an action the engine accepted. The engine answers
/// an already-applied start or stop the same way as a fresh one.
fn applied(action: Action, options: ExecuteOptions) -> RawResult {
    let detail = match action {
        Action::Remove if options.remove_volumes => "removed with volumes".to_string(),
        Action::Remove => "removed".to_string(),
        other => format!("{other} applied"),
    };
    RawResult { detail }
}

/// Splits one engine frame into log lines.
fn frame_lines(output: &LogOutput) -> Vec<LogLine> {
    let (stream, message) = match output {
        LogOutput::StdErr { message } => (OutputStream::Stderr, message),
        LogOutput::StdOut { message }
        | LogOutput::Console { message }
        | LogOutput::StdIn { message } => (OutputStream::Stdout, message),
    };
    let now = chrono::Utc::now();
    String::from_utf8_lossy(message)
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| LogLine::parse_timestamped(stream, l, now))
        .collect()
}

/// Maps a client error onto the engine taxonomy.
fn map_error(err: BollardError, target: &str, request_timeout: Duration) -> EngineError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => EngineError::not_found(target),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => EngineError::unavailable(format!("engine answered {status_code}: {message}")),
        BollardError::RequestTimeoutError => EngineError::Timeout {
            operation: "engine request",
            timeout_ms: u64::try_from(request_timeout.as_millis()).unwrap_or(u64::MAX),
        },
        other => EngineError::unavailable(other.to_string()),
    }
}

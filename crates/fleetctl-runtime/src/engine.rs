//! Engine adapter: the single gateway to the container runtime.
//!
//! Wraps a [`ContainerBackend`] with the managed-name filter and a bounded
//! deadline on every call. Dropping any returned future cancels the call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fleetctl_common::config::FleetConfig;
use fleetctl_common::error::{EngineError, Result};
use fleetctl_common::types::{Action, ContainerId, ContainerView, LogLine, Target};

use crate::backend::{
    self, ContainerBackend, ExecuteOptions, HostInfo, NameFilter, RawLogStream, RawRecord,
    RawResult, RawUsage,
};
use crate::normalize;

/// Filtered, deadline-bounded access to a container backend.
///
/// Cheap to clone; clones share the same long-lived backend client.
#[derive(Clone)]
pub struct Engine {
    backend: Arc<dyn ContainerBackend>,
    filter: NameFilter,
    call_timeout: Duration,
    stop_grace: Duration,
    log_tail: usize,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("backend", &self.backend.name())
            .field("filter", &self.filter)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Connects the backend selected by `config.engine_endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid. An unreachable
    /// engine is not an error here; it shows up in feed health.
    pub fn connect(config: &FleetConfig) -> Result<Self> {
        config.validate()?;
        let backend = backend::connect(config)?;
        Ok(Self::with_backend(backend, config))
    }

    /// Wraps an existing backend.
    #[must_use]
    pub fn with_backend(backend: Arc<dyn ContainerBackend>, config: &FleetConfig) -> Self {
        Self {
            backend,
            filter: NameFilter::prefix(config.managed_prefix.clone()),
            call_timeout: config.call_timeout(),
            stop_grace: config.stop_grace(),
            log_tail: config.log_tail_lines,
        }
    }

    /// Returns the per-call deadline.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Returns the backend name.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Checks that the engine answers.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` or `Timeout`.
    pub async fn ping(&self) -> std::result::Result<(), EngineError> {
        with_deadline("ping", self.call_timeout, self.backend.ping()).await
    }

    /// Lists managed containers only.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` or `Timeout`.
    pub async fn list_containers(&self) -> std::result::Result<Vec<RawRecord>, EngineError> {
        let records =
            with_deadline("list", self.call_timeout, self.backend.list_containers()).await?;
        Ok(records
            .into_iter()
            .filter(|r| self.filter.matches(&r.name))
            .collect())
    }

    /// Lists and normalizes managed containers.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` or `Timeout`.
    pub async fn list_views(&self) -> std::result::Result<Vec<ContainerView>, EngineError> {
        let records = self.list_containers().await?;
        Ok(records
            .iter()
            .map(|r| normalize::normalize(r, &self.filter))
            .collect())
    }

    /// Resolves a target against the managed listing.
    ///
    /// An id target is matched first by id; a name target by exact name.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when nothing managed matches, otherwise
    /// `Unavailable` or `Timeout`.
    pub async fn find(&self, target: &Target) -> std::result::Result<ContainerView, EngineError> {
        self.list_views()
            .await?
            .into_iter()
            .find(|v| target.matches(v))
            .ok_or_else(|| EngineError::not_found(target.as_str()))
    }

    /// Applies a mutating action. `remove_volumes` only affects
    /// [`Action::Remove`].
    ///
    /// Stop and restart get the grace period added to their deadline so a
    /// graceful shutdown is not reported as a timeout.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Unavailable`, or `Timeout`.
    pub async fn execute(
        &self,
        action: Action,
        id: &ContainerId,
        remove_volumes: bool,
    ) -> std::result::Result<RawResult, EngineError> {
        let deadline = match action {
            Action::Stop | Action::Restart => self.call_timeout + self.stop_grace,
            Action::Start | Action::Remove => self.call_timeout,
        };
        let options = ExecuteOptions {
            grace: self.stop_grace,
            remove_volumes: remove_volumes && action == Action::Remove,
        };
        with_deadline("execute", deadline, self.backend.execute(action, id, options)).await
    }

    /// Attaches to a container's output. Only the attach is bounded by the
    /// deadline; the returned stream is open-ended.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Unavailable`, or `Timeout`.
    pub async fn open_log_stream(
        &self,
        id: &ContainerId,
        tail: Option<usize>,
    ) -> std::result::Result<RawLogStream, EngineError> {
        let tail = tail.unwrap_or(self.log_tail);
        with_deadline(
            "open_log_stream",
            self.call_timeout,
            self.backend.open_log_stream(id, tail),
        )
        .await
    }

    /// Reads the last `tail` lines.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Unavailable`, or `Timeout`.
    pub async fn tail_logs(
        &self,
        id: &ContainerId,
        tail: usize,
    ) -> std::result::Result<Vec<LogLine>, EngineError> {
        with_deadline("tail_logs", self.call_timeout, self.backend.tail_logs(id, tail)).await
    }

    /// Samples resource counters for one container.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Unavailable`, or `Timeout`.
    pub async fn stats(&self, id: &ContainerId) -> std::result::Result<RawUsage, EngineError> {
        with_deadline("stats", self.call_timeout, self.backend.stats(id)).await
    }

    /// Reads host-level facts.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` or `Timeout`.
    pub async fn host_info(&self) -> std::result::Result<HostInfo, EngineError> {
        with_deadline("host_info", self.call_timeout, self.backend.host_info()).await
    }
}

/// Runs `fut` with a deadline, mapping expiry to [`EngineError::Timeout`].
async fn with_deadline<T, F>(
    operation: &'static str,
    timeout: Duration,
    fut: F,
) -> std::result::Result<T, EngineError>
where
    F: Future<Output = std::result::Result<T, EngineError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            tracing::warn!(operation, timeout_ms, "engine call timed out");
            Err(EngineError::Timeout {
                operation,
                timeout_ms,
            })
        }
    }
}

//! Fluent API for configuring a [`FleetController`].

use std::sync::Arc;
use std::time::Duration;

use fleetctl_common::config::FleetConfig;
use fleetctl_common::error::Result;
use fleetctl_runtime::backend::ContainerBackend;
use fleetctl_runtime::engine::Engine;

use crate::controller::FleetController;

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Builder for a controller and its engine connection.
pub struct ControllerBuilder {
    config: FleetConfig,
    backend: Option<Arc<dyn ContainerBackend>>,
}

impl std::fmt::Debug for ControllerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerBuilder")
            .field("config", &self.config)
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .finish()
    }
}

impl ControllerBuilder {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(FleetConfig::default())
    }

    /// Starts from an existing configuration.
    #[must_use]
    pub const fn from_config(config: FleetConfig) -> Self {
        Self {
            config,
            backend: None,
        }
    }

    /// Sets the engine endpoint, e.g. `unix:///var/run/docker.sock`.
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.engine_endpoint = endpoint.into();
        self
    }

    /// Sets the name prefix of managed containers.
    #[must_use]
    pub fn managed_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.managed_prefix = prefix.into();
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = millis(interval);
        self
    }

    /// Sets the maximum random delay added to each tick.
    #[must_use]
    pub fn poll_jitter(mut self, jitter: Duration) -> Self {
        self.config.poll_jitter_ms = millis(jitter);
        self
    }

    /// Sets the per-call engine deadline.
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout_ms = millis(timeout);
        self
    }

    /// Sets the stop/restart grace period in seconds.
    #[must_use]
    pub const fn stop_grace_secs(mut self, secs: u32) -> Self {
        self.config.stop_grace_secs = secs;
        self
    }

    /// Sets the per-subscriber log buffer bound.
    #[must_use]
    pub const fn log_buffer_lines(mut self, lines: usize) -> Self {
        self.config.log_buffer_lines = lines;
        self
    }

    /// Sets how many historical lines a log stream replays on attach.
    #[must_use]
    pub const fn log_tail_lines(mut self, lines: usize) -> Self {
        self.config.log_tail_lines = lines;
        self
    }

    /// Sets the consecutive-failure threshold for degraded feeds.
    #[must_use]
    pub const fn degraded_after(mut self, failures: u32) -> Self {
        self.config.degraded_after = failures;
        self
    }

    /// Uses an already constructed backend instead of connecting to the
    /// configured endpoint.
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn ContainerBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Returns the configuration as built so far.
    #[must_use]
    pub const fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Builds the controller. The poll loop is not started.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid. An unreachable
    /// engine is not an error here; it shows up in feed health.
    pub fn build(self) -> Result<FleetController> {
        self.config.validate()?;
        let engine = match self.backend {
            Some(backend) => Engine::with_backend(backend, &self.config),
            None => Engine::connect(&self.config)?,
        };
        tracing::debug!(backend = engine.backend_name(), "controller built");
        Ok(FleetController::new(engine, self.config))
    }
}

impl Default for ControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use fleetctl_runtime::backend::memory::MemoryBackend;

    use super::*;

    #[test]
    fn setters_update_config() {
        let builder = ControllerBuilder::new()
            .endpoint("memory://")
            .managed_prefix("edge-")
            .poll_interval(Duration::from_secs(2))
            .call_timeout(Duration::from_millis(1500))
            .stop_grace_secs(3)
            .degraded_after(5);
        let config = builder.config();
        assert_eq!(config.engine_endpoint, "memory://");
        assert_eq!(config.managed_prefix, "edge-");
        assert_eq!(config.poll_interval_ms, 2000);
        assert_eq!(config.call_timeout_ms, 1500);
        assert_eq!(config.stop_grace_secs, 3);
        assert_eq!(config.degraded_after, 5);
    }

    #[test]
    fn build_rejects_invalid_config() {
        let result = ControllerBuilder::new()
            .endpoint("memory://")
            .managed_prefix("")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn build_with_explicit_backend() {
        let controller = ControllerBuilder::new()
            .backend(Arc::new(MemoryBackend::new()))
            .build()
            .unwrap();
        assert_eq!(controller.backend_name(), "memory");
    }
}

//! Configuration model consumed by the control layer.
//!
//! Every value is externally supplied: defaults come from
//! [`constants`](crate::constants), may be overridden by a JSON file, and
//! finally by command-line flags or `FLEETCTL_*` environment variables in
//! the binary.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{FleetError, Result};

/// Kind of engine an endpoint string selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointKind {
    /// Local Unix socket path.
    Unix(String),
    /// TCP/HTTP address of a remote engine API.
    Http(String),
    /// In-process simulated engine.
    Memory,
}

/// Root configuration for the control layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FleetConfig {
    /// Engine connection endpoint (`unix://`, `tcp://`, `http://`, `memory://`).
    pub engine_endpoint: String,
    /// Name prefix that marks a container as managed.
    pub managed_prefix: String,
    /// Interval between poll ticks, in milliseconds.
    pub poll_interval_ms: u64,
    /// Upper bound of random extra delay per tick, in milliseconds.
    pub poll_jitter_ms: u64,
    /// Deadline for every engine call, in milliseconds.
    pub call_timeout_ms: u64,
    /// Grace period passed to the engine on stop and restart, in seconds.
    pub stop_grace_secs: u32,
    /// Maximum buffered lines per log subscriber.
    pub log_buffer_lines: usize,
    /// Historical lines replayed when a log stream attaches.
    pub log_tail_lines: usize,
    /// Consecutive failed ticks before a feed is flagged degraded.
    pub degraded_after: u32,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            engine_endpoint: constants::DEFAULT_ENGINE_ENDPOINT.to_string(),
            managed_prefix: constants::DEFAULT_MANAGED_PREFIX.to_string(),
            poll_interval_ms: constants::DEFAULT_POLL_INTERVAL_MS,
            poll_jitter_ms: constants::DEFAULT_POLL_JITTER_MS,
            call_timeout_ms: constants::DEFAULT_CALL_TIMEOUT_MS,
            stop_grace_secs: constants::DEFAULT_STOP_GRACE_SECS,
            log_buffer_lines: constants::DEFAULT_LOG_BUFFER_LINES,
            log_tail_lines: constants::DEFAULT_LOG_TAIL_LINES,
            degraded_after: constants::DEFAULT_DEGRADED_AFTER,
        }
    }
}

impl FleetConfig {
    /// Loads a configuration file. Missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails [`validate`](Self::validate).
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| FleetError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let _ = self.endpoint_kind()?;
        if self.managed_prefix.trim().is_empty() {
            return Err(config_error("managedPrefix must not be empty"));
        }
        if self.poll_interval_ms == 0 {
            return Err(config_error("pollIntervalMs must be greater than zero"));
        }
        if self.call_timeout_ms == 0 {
            return Err(config_error("callTimeoutMs must be greater than zero"));
        }
        if self.log_buffer_lines == 0 {
            return Err(config_error("logBufferLines must be greater than zero"));
        }
        if self.degraded_after == 0 {
            return Err(config_error("degradedAfter must be greater than zero"));
        }
        Ok(())
    }

    /// Classifies the engine endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Config`] for an unsupported scheme.
    pub fn endpoint_kind(&self) -> Result<EndpointKind> {
        let endpoint = self.engine_endpoint.trim();
        if endpoint == constants::MEMORY_ENGINE_ENDPOINT || endpoint == "memory" {
            return Ok(EndpointKind::Memory);
        }
        if let Some(path) = endpoint.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(config_error("unix endpoint is missing a socket path"));
            }
            return Ok(EndpointKind::Unix(path.to_string()));
        }
        if endpoint.starts_with("tcp://") || endpoint.starts_with("http://") {
            return Ok(EndpointKind::Http(endpoint.to_string()));
        }
        Err(config_error(&format!(
            "unsupported engine endpoint '{endpoint}' (expected unix://, tcp://, http:// or memory://)"
        )))
    }

    /// Interval between poll ticks.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Upper bound of jitter added to each tick.
    #[must_use]
    pub const fn poll_jitter(&self) -> Duration {
        Duration::from_millis(self.poll_jitter_ms)
    }

    /// Deadline for a single engine call.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Grace period for stop and restart.
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(u64::from(self.stop_grace_secs))
    }
}

fn config_error(message: &str) -> FleetError {
    FleetError::Config {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = FleetConfig::default();
        cfg.validate().expect("defaults should validate");
        assert_eq!(cfg.poll_interval(), Duration::from_secs(5));
        assert_eq!(cfg.degraded_after, 3);
    }

    #[test]
    fn endpoint_kinds_are_classified() {
        let mut cfg = FleetConfig::default();
        assert_eq!(
            cfg.endpoint_kind().unwrap(),
            EndpointKind::Unix("/var/run/docker.sock".into())
        );
        cfg.engine_endpoint = "tcp://127.0.0.1:2375".into();
        assert!(matches!(cfg.endpoint_kind().unwrap(), EndpointKind::Http(_)));
        cfg.engine_endpoint = "memory://".into();
        assert_eq!(cfg.endpoint_kind().unwrap(), EndpointKind::Memory);
        cfg.engine_endpoint = "ftp://nope".into();
        assert!(cfg.endpoint_kind().is_err());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let cfg = FleetConfig {
            poll_interval_ms: 0,
            ..FleetConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_prefix_is_rejected() {
        let cfg = FleetConfig {
            managed_prefix: "  ".into(),
            ..FleetConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_merges_partial_file_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fleetctl.json");
        std::fs::write(&path, r#"{"managedPrefix":"app-","pollIntervalMs":1000}"#).unwrap();

        let cfg = FleetConfig::load(&path).expect("load");
        assert_eq!(cfg.managed_prefix, "app-");
        assert_eq!(cfg.poll_interval_ms, 1000);
        assert_eq!(cfg.call_timeout_ms, constants::DEFAULT_CALL_TIMEOUT_MS);
    }

    #[test]
    fn load_missing_file_reports_path() {
        let err = FleetConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"logBufferLines":0}"#).unwrap();
        assert!(matches!(
            FleetConfig::load(&path),
            Err(FleetError::Config { .. })
        ));
    }
}

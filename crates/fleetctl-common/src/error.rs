//! Unified error types for the fleetctl workspace.
//!
//! [`ErrorKind`] is the closed taxonomy that crosses the query/command
//! surface. [`EngineError`] is what engine calls fail with, and
//! [`FleetError`] covers everything outside the engine path (configuration,
//! files, serialization).

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of failure kinds reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// The container runtime could not be reached or refused the call.
    EngineUnavailable,
    /// An engine call exceeded its deadline.
    EngineTimeout,
    /// The id or name resolves to no managed container.
    TargetNotFound,
    /// The request was malformed and rejected before any engine call.
    InvalidAction,
    /// Another mutating action is already pending for the same target.
    ActionInProgress,
    /// A log stream ended because its target went away.
    StreamTerminated,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::EngineUnavailable => "engine unavailable",
            Self::EngineTimeout => "engine timeout",
            Self::TargetNotFound => "target not found",
            Self::InvalidAction => "invalid action",
            Self::ActionInProgress => "action in progress",
            Self::StreamTerminated => "stream terminated",
        };
        f.write_str(s)
    }
}

/// Failure of a single engine call.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The runtime socket or API could not be reached, or answered with
    /// a server-side failure.
    #[error("engine unavailable: {message}")]
    Unavailable {
        /// Description of the failure reported by the transport or engine.
        message: String,
    },

    /// The call did not finish before its deadline.
    #[error("engine call `{operation}` timed out after {timeout_ms} ms")]
    Timeout {
        /// Name of the engine operation that timed out.
        operation: &'static str,
        /// Deadline that was exceeded.
        timeout_ms: u64,
    },

    /// No managed container matches the target.
    #[error("container not found: {target}")]
    NotFound {
        /// The id or name that failed to resolve.
        target: String,
    },
}

impl EngineError {
    /// Shorthand for an [`EngineError::Unavailable`].
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Shorthand for an [`EngineError::NotFound`].
    pub fn not_found(target: impl Into<String>) -> Self {
        Self::NotFound {
            target: target.into(),
        }
    }

    /// Maps this error onto the client-facing taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable { .. } => ErrorKind::EngineUnavailable,
            Self::Timeout { .. } => ErrorKind::EngineTimeout,
            Self::NotFound { .. } => ErrorKind::TargetNotFound,
        }
    }
}

/// Errors outside the engine call path.
#[derive(Debug, Error)]
pub enum FleetError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// An engine call failed outside of a dispatch or poll.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_kinds() {
        assert_eq!(
            EngineError::unavailable("refused").kind(),
            ErrorKind::EngineUnavailable
        );
        assert_eq!(
            EngineError::Timeout {
                operation: "list",
                timeout_ms: 10
            }
            .kind(),
            ErrorKind::EngineTimeout
        );
        assert_eq!(
            EngineError::not_found("nexus-x").kind(),
            ErrorKind::TargetNotFound
        );
    }

    #[test]
    fn error_kind_serializes_camel_case() {
        let json = serde_json::to_string(&ErrorKind::ActionInProgress).unwrap();
        assert_eq!(json, "\"actionInProgress\"");
    }
}

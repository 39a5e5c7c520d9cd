//! Domain types shared by the runtime and its clients.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Engine-assigned identifier of a container.
///
/// This is the only identity that stays stable across polls; names may be
/// reused after a container is removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random engine-style ID (64 hex characters).
    #[must_use]
    pub fn generate() -> Self {
        let a = uuid::Uuid::new_v4().simple().to_string();
        let b = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{a}{b}"))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the 12-character short form used in listings.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }

    /// Returns whether `candidate` names this container by full id or by an
    /// unambiguous prefix of at least 12 characters.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        self.0 == candidate || (candidate.len() >= 12 && self.0.starts_with(candidate))
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalized lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleState {
    /// The engine reports the container as up.
    Running,
    /// The engine reports any non-running status.
    Stopped,
    /// The engine record carried no usable status.
    Unknown,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A container port and where the engine publishes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    /// Port inside the container.
    pub private_port: u16,
    /// Host port, absent when the port is only exposed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_port: Option<u16>,
    /// Host address the port is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
    /// Transport protocol (`tcp`, `udp`, `sctp`).
    pub protocol: String,
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(public) = self.public_port {
            let ip = self.host_ip.as_deref().unwrap_or("0.0.0.0");
            write!(f, "{ip}:{public}->")?;
        }
        write!(f, "{}/{}", self.private_port, self.protocol)
    }
}

/// Canonical view of one container at one poll instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerView {
    /// Engine-assigned identifier.
    pub id: ContainerId,
    /// Container name, unique within the managed namespace.
    pub name: String,
    /// Normalized lifecycle state.
    pub lifecycle_state: LifecycleState,
    /// Image reference the container was created from.
    pub image: String,
    /// Creation time reported by the engine.
    pub created_at: DateTime<Utc>,
    /// Whether the name matches the managed naming convention.
    pub managed: bool,
    /// Raw status text for display, e.g. `Up 3 minutes`.
    pub status: String,
    /// Exposed and published ports.
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    /// Labels set on the container.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ContainerView {
    /// Returns whether the container is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lifecycle_state == LifecycleState::Running
    }
}

/// Mutating action that can be applied to a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    /// Start a stopped container.
    Start,
    /// Gracefully stop a running container.
    Stop,
    /// Stop then start a container.
    Restart,
    /// Remove a container. Always forced: a running container is killed
    /// and removed. Irreversible.
    Remove,
}

impl Action {
    /// All actions, in display order.
    pub const ALL: [Self; 4] = [Self::Start, Self::Stop, Self::Restart, Self::Remove];

    /// Returns the lowercase wire name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Remove => "remove",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when an action string names no known action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAction(pub String);

impl fmt::Display for UnknownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown action '{}'", self.0)
    }
}

impl std::error::Error for UnknownAction {}

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == lower)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// The container an action or log stream refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Target {
    /// Resolve by engine id (full or 12+ character prefix).
    Id(ContainerId),
    /// Resolve by container name.
    Name(String),
}

impl Target {
    /// Builds a target from optional id and name, preferring the id.
    ///
    /// Returns `None` when neither is present or both are blank.
    #[must_use]
    pub fn from_parts(id: Option<&str>, name: Option<&str>) -> Option<Self> {
        let id = id.map(str::trim).filter(|s| !s.is_empty());
        let name = name.map(str::trim).filter(|s| !s.is_empty());
        match (id, name) {
            (Some(id), _) => Some(Self::Id(ContainerId::new(id))),
            (None, Some(name)) => Some(Self::Name(name.to_string())),
            (None, None) => None,
        }
    }

    /// Returns the raw id or name string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Id(id) => id.as_str(),
            Self::Name(name) => name,
        }
    }

    /// Returns whether the given view is the container this target names.
    #[must_use]
    pub fn matches(&self, view: &ContainerView) -> bool {
        match self {
            Self::Id(id) => view.id.matches(id.as_str()),
            Self::Name(name) => view.name == *name,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated request to mutate one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    /// What to do.
    pub action: Action,
    /// Which container to do it to.
    pub target: Target,
    /// With [`Action::Remove`], also delete the container's volumes.
    /// Ignored by every other action.
    #[serde(default)]
    pub remove_volumes: bool,
}

impl ActionRequest {
    /// Creates a request for the given action and target.
    #[must_use]
    pub const fn new(action: Action, target: Target) -> Self {
        Self {
            action,
            target,
            remove_volumes: false,
        }
    }

    /// Sets whether a removal also deletes the container's volumes.
    #[must_use]
    pub const fn with_remove_volumes(mut self, remove_volumes: bool) -> Self {
        self.remove_volumes = remove_volumes;
        self
    }
}

/// Unvalidated request shape as received from a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawActionRequest {
    /// Action name (`start`, `stop`, `restart`, `remove`).
    pub action: String,
    /// Engine id of the target, preferred when both are given.
    #[serde(default)]
    pub container_id: Option<String>,
    /// Name of the target.
    #[serde(default)]
    pub container_name: Option<String>,
    /// Delete the container's volumes along with it (remove only).
    #[serde(default)]
    pub remove_volumes: bool,
}

/// Reason a [`RawActionRequest`] failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidRequest {
    /// The action string is not one of the known actions.
    UnknownAction(UnknownAction),
    /// Neither a container id nor a name was supplied.
    MissingTarget,
}

impl fmt::Display for InvalidRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAction(e) => e.fmt(f),
            Self::MissingTarget => f.write_str("a container id or name is required"),
        }
    }
}

impl std::error::Error for InvalidRequest {}

impl TryFrom<RawActionRequest> for ActionRequest {
    type Error = InvalidRequest;

    fn try_from(raw: RawActionRequest) -> Result<Self, Self::Error> {
        let action = raw
            .action
            .parse::<Action>()
            .map_err(InvalidRequest::UnknownAction)?;
        let target = Target::from_parts(raw.container_id.as_deref(), raw.container_name.as_deref())
            .ok_or(InvalidRequest::MissingTarget)?;
        Ok(Self::new(action, target).with_remove_volumes(raw.remove_volumes))
    }
}

/// Outcome of one dispatched action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    /// Whether the engine applied the action.
    pub success: bool,
    /// Failure classification, absent on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActionResult {
    /// A successful outcome with a confirmation message.
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            error_kind: None,
            message: Some(message.into()),
        }
    }

    /// A failed outcome of the given kind.
    #[must_use]
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_kind: Some(kind),
            message: Some(message.into()),
        }
    }
}

/// Output stream a log line was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// One line of container output, in engine emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLine {
    /// Time the engine recorded the line.
    pub timestamp: DateTime<Utc>,
    /// Stream the line was written to.
    pub stream: OutputStream,
    /// Line content without the trailing newline.
    pub text: String,
}

impl LogLine {
    /// Parses a line emitted with engine timestamps enabled
    /// (`2024-01-01T00:00:00.000000000Z message`).
    ///
    /// Lines without a parsable timestamp prefix keep their full text and
    /// are stamped with `fallback`.
    #[must_use]
    pub fn parse_timestamped(stream: OutputStream, raw: &str, fallback: DateTime<Utc>) -> Self {
        let raw = raw.trim_end_matches(['\n', '\r']);
        if let Some((head, rest)) = raw.split_once(' ') {
            if let Ok(ts) = DateTime::parse_from_rfc3339(head) {
                return Self {
                    timestamp: ts.with_timezone(&Utc),
                    stream,
                    text: rest.to_string(),
                };
            }
        }
        Self {
            timestamp: fallback,
            stream,
            text: raw.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parses_case_insensitively() {
        assert_eq!("Stop".parse::<Action>(), Ok(Action::Stop));
        assert_eq!(" remove ".parse::<Action>(), Ok(Action::Remove));
        assert!("kill".parse::<Action>().is_err());
        assert!("".parse::<Action>().is_err());
    }

    #[test]
    fn target_prefers_id_over_name() {
        let t = Target::from_parts(Some("abc"), Some("nexus-a")).unwrap();
        assert_eq!(t, Target::Id(ContainerId::new("abc")));
    }

    #[test]
    fn target_ignores_blank_parts() {
        let t = Target::from_parts(Some("  "), Some("nexus-a")).unwrap();
        assert_eq!(t, Target::Name("nexus-a".into()));
        assert!(Target::from_parts(None, Some("")).is_none());
    }

    #[test]
    fn raw_request_without_target_is_invalid() {
        let raw = RawActionRequest {
            action: "start".into(),
            ..Default::default()
        };
        assert_eq!(
            ActionRequest::try_from(raw),
            Err(InvalidRequest::MissingTarget)
        );
    }

    #[test]
    fn raw_request_with_unknown_action_is_invalid() {
        let raw = RawActionRequest {
            action: "explode".into(),
            container_name: Some("nexus-a".into()),
            ..Default::default()
        };
        assert!(matches!(
            ActionRequest::try_from(raw),
            Err(InvalidRequest::UnknownAction(_))
        ));
    }

    #[test]
    fn raw_request_deserializes_original_field_names() {
        let raw: RawActionRequest =
            serde_json::from_str(r#"{"action":"restart","containerName":"nexus-a"}"#).unwrap();
        let req = ActionRequest::try_from(raw).unwrap();
        assert_eq!(req.action, Action::Restart);
        assert_eq!(req.target, Target::Name("nexus-a".into()));
    }

    #[test]
    fn raw_request_carries_volume_removal() {
        let raw: RawActionRequest = serde_json::from_str(
            r#"{"action":"remove","containerName":"nexus-a","removeVolumes":true}"#,
        )
        .unwrap();
        let req = ActionRequest::try_from(raw).unwrap();
        assert_eq!(req.action, Action::Remove);
        assert!(req.remove_volumes);
    }

    #[test]
    fn port_mapping_displays_like_the_engine() {
        let published = PortMapping {
            private_port: 80,
            public_port: Some(8080),
            host_ip: Some("127.0.0.1".into()),
            protocol: "tcp".into(),
        };
        assert_eq!(published.to_string(), "127.0.0.1:8080->80/tcp");
        let exposed = PortMapping {
            private_port: 9000,
            public_port: None,
            host_ip: None,
            protocol: "udp".into(),
        };
        assert_eq!(exposed.to_string(), "9000/udp");
    }

    #[test]
    fn container_id_matches_long_prefix_only() {
        let id = ContainerId::new("0123456789abcdef0123");
        assert!(id.matches("0123456789abcdef0123"));
        assert!(id.matches("0123456789ab"));
        assert!(!id.matches("0123"));
        assert_eq!(id.short(), "0123456789ab");
    }

    #[test]
    fn action_result_omits_empty_fields() {
        let json = serde_json::to_string(&ActionResult::ok("done")).unwrap();
        assert_eq!(json, r#"{"success":true,"message":"done"}"#);
        let json =
            serde_json::to_string(&ActionResult::failed(ErrorKind::TargetNotFound, "gone")).unwrap();
        assert!(json.contains(r#""errorKind":"targetNotFound""#));
    }

    #[test]
    fn log_line_splits_engine_timestamp() {
        let fallback = DateTime::<Utc>::UNIX_EPOCH;
        let line = LogLine::parse_timestamped(
            OutputStream::Stdout,
            "2024-05-01T10:00:00.123456789Z hello world\n",
            fallback,
        );
        assert_eq!(line.text, "hello world");
        assert_ne!(line.timestamp, fallback);
    }

    #[test]
    fn log_line_without_timestamp_keeps_text() {
        let fallback = DateTime::<Utc>::UNIX_EPOCH;
        let line = LogLine::parse_timestamped(OutputStream::Stderr, "plain text", fallback);
        assert_eq!(line.text, "plain text");
        assert_eq!(line.timestamp, fallback);
        assert_eq!(line.stream, OutputStream::Stderr);
    }
}

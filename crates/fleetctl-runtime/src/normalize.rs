//! Raw engine record to [`ContainerView`] mapping.
//!
//! Everything here is pure: no I/O, no clock, no global state. Drift in
//! the engine's status strings is handled by [`classify_status`] alone.

use chrono::{DateTime, Utc};
use fleetctl_common::types::{ContainerId, ContainerView, LifecycleState};

use crate::backend::{NameFilter, RawRecord};

/// Classifies an engine status string.
///
/// A status containing `up` anywhere, in any case, means
/// [`LifecycleState::Running`]; any other status with at least one
/// alphanumeric character means [`LifecycleState::Stopped`]; a missing
/// status or one without alphanumerics is [`LifecycleState::Unknown`].
#[must_use]
pub fn classify_status(status: Option<&str>) -> LifecycleState {
    let Some(status) = status else {
        return LifecycleState::Unknown;
    };
    if !status.chars().any(|c| c.is_ascii_alphanumeric()) {
        return LifecycleState::Unknown;
    }
    if status.to_ascii_lowercase().contains("up") {
        LifecycleState::Running
    } else {
        LifecycleState::Stopped
    }
}

/// Maps one raw record to its canonical view.
///
/// Never drops a record: a missing id, name, or status still produces a
/// row, flagged [`LifecycleState::Unknown`] when the status is unusable.
#[must_use]
pub fn normalize(record: &RawRecord, filter: &NameFilter) -> ContainerView {
    let name = record.name.trim_start_matches('/').to_string();
    let status = record.status.as_deref().unwrap_or_default().trim();
    ContainerView {
        id: ContainerId::new(record.id.trim()),
        managed: filter.matches(&name),
        lifecycle_state: classify_status(record.status.as_deref()),
        image: record.image.clone().unwrap_or_default(),
        created_at: created_at(record.created),
        status: status.to_string(),
        ports: record.ports.clone(),
        labels: record.labels.clone(),
        name,
    }
}

fn created_at(epoch_secs: Option<i64>) -> DateTime<Utc> {
    epoch_secs
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, status: Option<&str>) -> RawRecord {
        RawRecord {
            id: format!("{name}-id"),
            name: format!("/{name}"),
            status: status.map(str::to_string),
            image: Some("nexus-cli:latest".into()),
            created: Some(1_700_000_000),
            ..RawRecord::default()
        }
    }

    #[test]
    fn up_statuses_are_running() {
        for s in [
            "Up 3 minutes",
            "up",
            "UP 2 hours (healthy)",
            "Up Less than a second",
            "Up 5 seconds (Paused)",
            "Up About an hour",
            "setup",
            "upgrading",
            "Backup running",
        ] {
            assert_eq!(classify_status(Some(s)), LifecycleState::Running, "{s}");
        }
    }

    #[test]
    fn other_non_empty_statuses_are_stopped() {
        for s in [
            "Exited (1) 2 hours ago",
            "Created",
            "Dead",
            "Removal In Progress",
            "Restarting (1) 5 seconds ago",
            "Paused",
            "0",
        ] {
            assert_eq!(classify_status(Some(s)), LifecycleState::Stopped, "{s}");
        }
    }

    #[test]
    fn empty_or_unparsable_statuses_are_unknown() {
        for s in ["", "   ", "???", "--", "\t\n"] {
            assert_eq!(classify_status(Some(s)), LifecycleState::Unknown, "{s:?}");
        }
        assert_eq!(classify_status(None), LifecycleState::Unknown);
    }

    #[test]
    fn classification_is_deterministic() {
        let s = Some("Up 3 minutes");
        assert_eq!(classify_status(s), classify_status(s));
    }

    #[test]
    fn normalize_strips_engine_slash_and_flags_managed() {
        let filter = NameFilter::prefix("nexus-");
        let view = normalize(&record("nexus-a", Some("Up 3 minutes")), &filter);
        assert_eq!(view.name, "nexus-a");
        assert!(view.managed);
        assert_eq!(view.lifecycle_state, LifecycleState::Running);
        assert_eq!(view.status, "Up 3 minutes");
        assert_eq!(view.created_at.timestamp(), 1_700_000_000);

        let view = normalize(&record("other", Some("Up 1 second")), &filter);
        assert!(!view.managed);
    }

    #[test]
    fn normalize_keeps_degraded_rows() {
        let filter = NameFilter::prefix("nexus-");
        let raw = RawRecord {
            id: String::new(),
            name: "/nexus-broken".into(),
            status: None,
            image: None,
            created: None,
            ..RawRecord::default()
        };
        let view = normalize(&raw, &filter);
        assert_eq!(view.lifecycle_state, LifecycleState::Unknown);
        assert_eq!(view.name, "nexus-broken");
        assert!(view.image.is_empty());
        assert_eq!(view.created_at, DateTime::UNIX_EPOCH);
        assert!(view.status.is_empty());
    }

    #[test]
    fn normalize_keeps_ports_and_labels() {
        let filter = NameFilter::prefix("nexus-");
        let mut raw = record("nexus-a", Some("Up 1 minute"));
        raw.ports.push(fleetctl_common::types::PortMapping {
            private_port: 8080,
            public_port: Some(18080),
            host_ip: None,
            protocol: "tcp".into(),
        });
        let _ = raw.labels.insert("nexus.node-id".into(), "7".into());
        let view = normalize(&raw, &filter);
        assert_eq!(view.ports.len(), 1);
        assert_eq!(view.ports[0].public_port, Some(18080));
        assert_eq!(view.labels["nexus.node-id"], "7");
    }

    #[test]
    fn out_of_range_creation_time_falls_back_to_epoch() {
        let filter = NameFilter::prefix("nexus-");
        let mut raw = record("nexus-a", Some("Created"));
        raw.created = Some(i64::MAX);
        assert_eq!(normalize(&raw, &filter).created_at, DateTime::UNIX_EPOCH);
    }
}

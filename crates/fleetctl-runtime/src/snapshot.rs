//! Published snapshots and their freshness.
//!
//! A [`Feed`] is a single-writer, multi-reader cell. The writer replaces
//! the whole [`Published`] value on every tick; readers clone an `Arc` and
//! never observe a half-updated value. A failed tick republishes the same
//! snapshot `Arc` with updated [`FeedHealth`], so the last known good data
//! stays current and the failure is visible next to it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleetctl_common::error::{EngineError, ErrorKind};
use fleetctl_common::types::{ContainerView, Target};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Immutable list of managed containers at one poll instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSnapshot {
    /// Monotonic counter of successful container refreshes.
    pub generation: u64,
    /// When the engine was queried.
    pub captured_at: DateTime<Utc>,
    /// Views sorted by name.
    pub containers: Vec<ContainerView>,
}

impl ContainerSnapshot {
    /// Assembles a snapshot, sorting views by name then id.
    #[must_use]
    pub fn new(generation: u64, captured_at: DateTime<Utc>, mut containers: Vec<ContainerView>) -> Self {
        containers.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Self {
            generation,
            captured_at,
            containers,
        }
    }

    /// Finds the view a target refers to.
    #[must_use]
    pub fn find(&self, target: &Target) -> Option<&ContainerView> {
        self.containers.iter().find(|v| target.matches(v))
    }
}

/// One recorded refresh failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    /// When the failure happened.
    pub at: DateTime<Utc>,
    /// Failure classification.
    pub kind: ErrorKind,
    /// Engine-provided detail.
    pub message: String,
}

/// Freshness of a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedHealth {
    /// Last successful refresh.
    pub last_success_at: Option<DateTime<Utc>>,
    /// Most recent failure, kept after recovery for inspection.
    pub last_failure: Option<FailureRecord>,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Threshold at which the feed counts as degraded.
    pub degraded_after: u32,
}

impl FeedHealth {
    /// Fresh health record for a feed that has not ticked yet.
    #[must_use]
    pub const fn new(degraded_after: u32) -> Self {
        Self {
            last_success_at: None,
            last_failure: None,
            consecutive_failures: 0,
            degraded_after,
        }
    }

    /// The latest refresh failed, so the published data is older than the
    /// last tick.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        self.consecutive_failures > 0
    }

    /// Enough consecutive refreshes failed to escalate.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.consecutive_failures >= self.degraded_after
    }
}

/// A feed value together with its health, published as one unit.
#[derive(Debug, Clone)]
pub struct Published<T> {
    /// Latest successfully produced value, `None` before the first success.
    pub value: Option<Arc<T>>,
    /// Freshness of `value`.
    pub health: FeedHealth,
}

impl<T> Published<T> {
    /// Returns whether the feed currently counts as stale.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        self.health.is_stale()
    }

    /// Returns whether the feed is degraded.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.health.is_degraded()
    }
}

/// Single-writer cell holding the latest [`Published`] value.
#[derive(Debug)]
pub struct Feed<T> {
    name: &'static str,
    tx: watch::Sender<Arc<Published<T>>>,
}

impl<T: Send + Sync + 'static> Feed<T> {
    /// Creates an empty feed.
    #[must_use]
    pub fn new(name: &'static str, degraded_after: u32) -> Self {
        let (tx, _) = watch::channel(Arc::new(Published {
            value: None,
            health: FeedHealth::new(degraded_after),
        }));
        Self { name, tx }
    }

    /// Returns the feed name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the current published value.
    #[must_use]
    pub fn current(&self) -> Arc<Published<T>> {
        Arc::clone(&self.tx.borrow())
    }

    /// Subscribes to future publications.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<Published<T>>> {
        self.tx.subscribe()
    }

    /// Replaces the value after a successful refresh.
    pub fn publish(&self, value: T, at: DateTime<Utc>) {
        let previous = self.current();
        if previous.health.consecutive_failures > 0 {
            tracing::info!(
                feed = self.name,
                failures = previous.health.consecutive_failures,
                "feed recovered"
            );
        }
        let health = FeedHealth {
            last_success_at: Some(at),
            last_failure: previous.health.last_failure.clone(),
            consecutive_failures: 0,
            degraded_after: previous.health.degraded_after,
        };
        let _ = self.tx.send_replace(Arc::new(Published {
            value: Some(Arc::new(value)),
            health,
        }));
    }

    /// Records a failed refresh, keeping the previous value.
    ///
    /// Returns `true` when this failure crossed the degraded threshold.
    pub fn record_failure(&self, err: &EngineError, at: DateTime<Utc>) -> bool {
        let previous = self.current();
        let mut health = previous.health.clone();
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        health.last_failure = Some(FailureRecord {
            at,
            kind: err.kind(),
            message: err.to_string(),
        });
        let escalated = health.consecutive_failures == health.degraded_after;

        if escalated {
            tracing::error!(
                feed = self.name,
                failures = health.consecutive_failures,
                error = %err,
                "feed degraded"
            );
        } else {
            tracing::warn!(
                feed = self.name,
                failures = health.consecutive_failures,
                error = %err,
                "refresh failed, keeping last known good snapshot"
            );
        }

        let _ = self.tx.send_replace(Arc::new(Published {
            value: previous.value.clone(),
            health,
        }));
        escalated
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use fleetctl_common::types::{ContainerId, LifecycleState};

    use super::*;

    fn view(name: &str) -> ContainerView {
        ContainerView {
            id: ContainerId::new(format!("{name}-id")),
            name: name.into(),
            lifecycle_state: LifecycleState::Running,
            image: "img".into(),
            created_at: DateTime::UNIX_EPOCH,
            managed: true,
            status: "Up".into(),
            ports: Vec::new(),
            labels: BTreeMap::new(),
        }
    }

    #[test]
    fn snapshot_sorts_by_name() {
        let snap = ContainerSnapshot::new(1, Utc::now(), vec![view("nexus-b"), view("nexus-a")]);
        assert_eq!(snap.containers[0].name, "nexus-a");
        assert!(snap.find(&Target::Name("nexus-b".into())).is_some());
    }

    #[test]
    fn failure_keeps_previous_value_and_marks_stale() {
        let feed = Feed::new("containers", 3);
        feed.publish(ContainerSnapshot::new(1, Utc::now(), vec![view("nexus-a")]), Utc::now());
        let before = feed.current();

        let _ = feed.record_failure(&EngineError::unavailable("down"), Utc::now());
        let after = feed.current();

        assert!(Arc::ptr_eq(
            before.value.as_ref().unwrap(),
            after.value.as_ref().unwrap()
        ));
        assert!(after.is_stale());
        assert!(!after.is_degraded());
        assert_eq!(
            after.health.last_failure.as_ref().unwrap().kind,
            ErrorKind::EngineUnavailable
        );
    }

    #[test]
    fn third_consecutive_failure_escalates_once() {
        let feed: Feed<ContainerSnapshot> = Feed::new("containers", 3);
        let err = EngineError::unavailable("down");
        assert!(!feed.record_failure(&err, Utc::now()));
        assert!(!feed.record_failure(&err, Utc::now()));
        assert!(feed.record_failure(&err, Utc::now()));
        assert!(feed.current().is_degraded());
        assert!(!feed.record_failure(&err, Utc::now()));
        assert!(feed.current().is_degraded());
    }

    #[test]
    fn success_clears_staleness_but_keeps_failure_history() {
        let feed = Feed::new("containers", 3);
        let _ = feed.record_failure(&EngineError::unavailable("down"), Utc::now());
        feed.publish(ContainerSnapshot::new(1, Utc::now(), vec![]), Utc::now());
        let current = feed.current();
        assert!(!current.is_stale());
        assert!(current.health.last_failure.is_some());
        assert!(current.health.last_success_at.is_some());
    }

    #[tokio::test]
    async fn subscribers_see_whole_replacements() {
        let feed = Feed::new("containers", 3);
        let mut rx = feed.subscribe();
        feed.publish(ContainerSnapshot::new(7, Utc::now(), vec![view("nexus-a")]), Utc::now());
        rx.changed().await.unwrap();
        let published = rx.borrow_and_update().clone();
        assert_eq!(published.value.as_ref().unwrap().generation, 7);
    }
}

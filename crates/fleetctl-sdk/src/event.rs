//! Container lifecycle event streaming.
//!
//! Turns successive container snapshots into discrete events so clients
//! can react to changes instead of re-rendering whole listings.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use fleetctl_common::types::{ContainerId, ContainerView, LifecycleState};
use fleetctl_runtime::dispatch::SnapshotReceiver;
use fleetctl_runtime::snapshot::ContainerSnapshot;
use serde::{Deserialize, Serialize};

/// A fleet lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum FleetEvent {
    /// A managed container showed up.
    Appeared {
        /// The new container.
        container: ContainerView,
    },
    /// A container changed state.
    #[serde(rename_all = "camelCase")]
    StateChanged {
        /// Container that changed.
        container_id: ContainerId,
        /// Container name.
        name: String,
        /// Previous state.
        from: LifecycleState,
        /// New state.
        to: LifecycleState,
    },
    /// A managed container is gone.
    #[serde(rename_all = "camelCase")]
    Vanished {
        /// Container that disappeared.
        container_id: ContainerId,
        /// Its last known name.
        name: String,
    },
    /// The container feed crossed its failure threshold.
    #[serde(rename_all = "camelCase")]
    FeedDegraded {
        /// Consecutive failures so far.
        consecutive_failures: u32,
    },
    /// The container feed refreshed successfully after failing.
    FeedRecovered,
}

/// Computes the events that lead from `previous` to `next`.
///
/// Containers are matched by id; names may be reused after removal.
/// Vanished containers come first, then appearances and state changes in
/// the order of `next`.
#[must_use]
pub fn diff(previous: Option<&ContainerSnapshot>, next: &ContainerSnapshot) -> Vec<FleetEvent> {
    let before: HashMap<&ContainerId, &ContainerView> = previous
        .map(|p| p.containers.iter().map(|v| (&v.id, v)).collect())
        .unwrap_or_default();
    let after: HashMap<&ContainerId, &ContainerView> =
        next.containers.iter().map(|v| (&v.id, v)).collect();

    let mut events = Vec::new();
    if let Some(previous) = previous {
        for view in &previous.containers {
            if !after.contains_key(&view.id) {
                events.push(FleetEvent::Vanished {
                    container_id: view.id.clone(),
                    name: view.name.clone(),
                });
            }
        }
    }
    for view in &next.containers {
        match before.get(&view.id) {
            None => events.push(FleetEvent::Appeared {
                container: view.clone(),
            }),
            Some(old) if old.lifecycle_state != view.lifecycle_state => {
                events.push(FleetEvent::StateChanged {
                    container_id: view.id.clone(),
                    name: view.name.clone(),
                    from: old.lifecycle_state,
                    to: view.lifecycle_state,
                });
            }
            Some(_) => {}
        }
    }
    events
}

/// Listens for container lifecycle events.
#[derive(Debug)]
pub struct EventListener {
    rx: SnapshotReceiver,
    last: Option<Arc<ContainerSnapshot>>,
    degraded: bool,
    pending: VecDeque<FleetEvent>,
}

impl EventListener {
    /// Creates a listener. Only changes after the currently published
    /// snapshot are reported.
    #[must_use]
    pub fn new(mut rx: SnapshotReceiver) -> Self {
        let current = rx.borrow_and_update().clone();
        Self {
            rx,
            last: current.value.clone(),
            degraded: current.is_degraded(),
            pending: VecDeque::new(),
        }
    }

    /// Waits for the next event. Returns `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<FleetEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            self.rx.changed().await.ok()?;
            let published = self.rx.borrow_and_update().clone();

            let degraded = published.is_degraded();
            if degraded && !self.degraded {
                self.pending.push_back(FleetEvent::FeedDegraded {
                    consecutive_failures: published.health.consecutive_failures,
                });
            } else if !degraded && self.degraded {
                self.pending.push_back(FleetEvent::FeedRecovered);
            }
            self.degraded = degraded;

            if let Some(next) = &published.value {
                let unchanged = self.last.as_ref().is_some_and(|last| Arc::ptr_eq(last, next));
                if !unchanged {
                    self.pending.extend(diff(self.last.as_deref(), next));
                    self.last = Some(Arc::clone(next));
                }
            }
        }
    }
}

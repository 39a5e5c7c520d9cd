//! Serialized mutating actions.
//!
//! Every action request goes through [`Dispatcher::dispatch`]. At most one
//! mutating call per container id is in flight at any time; a second
//! request for the same id is rejected with
//! [`ErrorKind::ActionInProgress`] instead of being queued. Bulk stops go
//! through the same per-container guard.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fleetctl_common::error::{EngineError, ErrorKind};
use fleetctl_common::types::{
    Action, ActionRequest, ActionResult, ContainerId, ContainerView, LifecycleState,
    RawActionRequest, Target,
};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, watch};
use uuid::Uuid;

use crate::engine::Engine;
use crate::snapshot::{ContainerSnapshot, Published};

/// Receiver side of the container feed.
pub type SnapshotReceiver = watch::Receiver<Arc<Published<ContainerSnapshot>>>;

/// Set of container ids with a mutating call in flight.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    ids: Arc<Mutex<HashSet<ContainerId>>>,
}

impl InFlight {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<ContainerId>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `id` as pending unless it already is.
    ///
    /// The returned guard clears the mark when dropped, including when the
    /// owning future is cancelled.
    #[must_use]
    pub fn try_acquire(&self, id: &ContainerId) -> Option<InFlightGuard> {
        if self.lock().insert(id.clone()) {
            Some(InFlightGuard {
                ids: Arc::clone(&self.ids),
                id: id.clone(),
            })
        } else {
            None
        }
    }

    /// Returns whether `id` has a pending action.
    #[must_use]
    pub fn contains(&self, id: &ContainerId) -> bool {
        self.lock().contains(id)
    }

    /// Number of pending actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns whether no action is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Releases a pending mark on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    ids: Arc<Mutex<HashSet<ContainerId>>>,
    id: ContainerId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let _ = self
            .ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Resolves a target to a managed container.
///
/// The snapshot, when given, is consulted first; on a miss the engine's
/// managed listing is queried.
///
/// # Errors
///
/// Returns `NotFound` when no managed container matches, otherwise the
/// listing failure.
pub async fn resolve_target(
    engine: &Engine,
    snapshot: Option<&ContainerSnapshot>,
    target: &Target,
) -> Result<ContainerView, EngineError> {
    if let Some(view) = snapshot
        .and_then(|s| s.find(target))
        .filter(|v| !v.id.as_str().is_empty())
    {
        return Ok(view.clone());
    }
    engine.find(target).await
}

/// Result of one container's share of a bulk action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    /// Engine id of the container.
    pub id: ContainerId,
    /// Container name.
    pub name: String,
    /// What happened to it.
    pub result: ActionResult,
}

/// Applies action requests to the engine, one at a time per target.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    engine: Engine,
    in_flight: InFlight,
    snapshot: Option<SnapshotReceiver>,
    refresh: Option<Arc<Notify>>,
}

impl Dispatcher {
    /// Creates a dispatcher that resolves targets through the engine only.
    #[must_use]
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            in_flight: InFlight::new(),
            snapshot: None,
            refresh: None,
        }
    }

    /// Resolves targets against the published container snapshot first.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: SnapshotReceiver) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Requests an early poll after every successful action.
    #[must_use]
    pub fn with_refresh(mut self, refresh: Arc<Notify>) -> Self {
        self.refresh = Some(refresh);
        self
    }

    /// Returns whether an action is pending for `id`.
    #[must_use]
    pub fn is_pending(&self, id: &ContainerId) -> bool {
        self.in_flight.contains(id)
    }

    /// Returns the in-flight set.
    #[must_use]
    pub const fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    fn latest_snapshot(&self) -> Option<Arc<ContainerSnapshot>> {
        self.snapshot
            .as_ref()
            .and_then(|rx| rx.borrow().value.clone())
    }

    /// Validates a wire request, then dispatches it.
    ///
    /// An unknown action or a missing target fails with
    /// [`ErrorKind::InvalidAction`] before the engine is contacted.
    pub async fn dispatch_raw(&self, raw: RawActionRequest) -> ActionResult {
        match ActionRequest::try_from(raw) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => {
                tracing::debug!(error = %e, "rejected action request");
                ActionResult::failed(ErrorKind::InvalidAction, e.to_string())
            }
        }
    }

    /// Resolves the target and applies the action.
    ///
    /// Never fails: every outcome, including engine errors, is reported in
    /// the returned [`ActionResult`].
    pub async fn dispatch(&self, request: ActionRequest) -> ActionResult {
        let request_id = Uuid::new_v4();
        let ActionRequest {
            action,
            target,
            remove_volumes,
        } = request;

        let snapshot = self.latest_snapshot();
        let view = match resolve_target(&self.engine, snapshot.as_deref(), &target).await {
            Ok(view) => view,
            Err(e) => {
                tracing::info!(%request_id, %action, target = %target, error = %e, "action target not resolved");
                return ActionResult::failed(e.kind(), e.to_string());
            }
        };
        self.apply(request_id, action, &view, remove_volumes).await
    }

    /// Stops every running managed container, concurrently.
    ///
    /// The set of targets comes from a fresh engine listing. Each stop
    /// takes the same per-container guard as [`dispatch`](Self::dispatch),
    /// so a container with a pending action reports
    /// [`ErrorKind::ActionInProgress`] and is left alone.
    ///
    /// # Errors
    ///
    /// Returns the listing failure; individual stop failures are reported
    /// in their [`BulkOutcome`].
    pub async fn stop_all(&self) -> Result<Vec<BulkOutcome>, EngineError> {
        let request_id = Uuid::new_v4();
        let running: Vec<ContainerView> = self
            .engine
            .list_views()
            .await?
            .into_iter()
            .filter(|v| v.is_running() && !v.id.as_str().is_empty())
            .collect();
        tracing::info!(%request_id, count = running.len(), "stopping all managed containers");

        let results = join_all(
            running
                .iter()
                .map(|view| self.apply(request_id, Action::Stop, view, false)),
        )
        .await;
        Ok(running
            .into_iter()
            .zip(results)
            .map(|(view, result)| BulkOutcome {
                id: view.id,
                name: view.name,
                result,
            })
            .collect())
    }

    async fn apply(
        &self,
        request_id: Uuid,
        action: Action,
        view: &ContainerView,
        remove_volumes: bool,
    ) -> ActionResult {
        let Some(_guard) = self.in_flight.try_acquire(&view.id) else {
            tracing::info!(%request_id, %action, id = %view.id, "action already in progress");
            return ActionResult::failed(
                ErrorKind::ActionInProgress,
                format!("an action is already in progress for {}", view.name),
            );
        };

        if action == Action::Remove && view.lifecycle_state == LifecycleState::Running {
            tracing::warn!(%request_id, id = %view.id, name = %view.name, forced = true, "removing running container");
        }
        tracing::info!(%request_id, %action, id = %view.id, name = %view.name, remove_volumes, "dispatching action");

        match self.engine.execute(action, &view.id, remove_volumes).await {
            Ok(raw) => {
                tracing::info!(%request_id, %action, id = %view.id, detail = %raw.detail, "action succeeded");
                if let Some(refresh) = &self.refresh {
                    refresh.notify_one();
                }
                ActionResult::ok(format!("{action} {}: {}", view.name, raw.detail))
            }
            Err(e) => {
                tracing::warn!(%request_id, %action, id = %view.id, error = %e, "action failed");
                ActionResult::failed(e.kind(), e.to_string())
            }
        }
    }
}

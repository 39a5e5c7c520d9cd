//! End-to-end tests for the fleetctl runtime against the in-memory engine.
//!
//! These tests drive the public runtime API the way a control surface does:
//! 1. Listing and normalization of a mixed fleet
//! 2. Serialized actions per container
//! 3. Poll failures and last-known-good snapshots
//! 4. Log streams that outlive their container
//! 5. Early refresh after a successful action

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use fleetctl_common::config::FleetConfig;
use fleetctl_common::error::ErrorKind;
use fleetctl_common::types::{
    Action, ActionRequest, ContainerId, LifecycleState, OutputStream, RawActionRequest, Target,
};
use fleetctl_runtime::backend::memory::MemoryBackend;
use fleetctl_runtime::dispatch::Dispatcher;
use fleetctl_runtime::engine::Engine;
use fleetctl_runtime::logs::{EndReason, LogEvent, LogReader};
use fleetctl_runtime::poller::Poller;
use tokio::sync::watch;

fn engine(backend: &Arc<MemoryBackend>) -> Engine {
    Engine::with_backend(Arc::clone(backend) as _, &FleetConfig::default())
}

async fn wait_pending(dispatcher: &Dispatcher, id: &ContainerId) {
    for _ in 0..1_000 {
        if dispatcher.is_pending(id) {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("action never became pending");
}

// ── Listing ──────────────────────────────────────────────────────────

#[tokio::test]
async fn pipeline_mixed_fleet_lists_only_managed() {
    let backend = Arc::new(MemoryBackend::new());
    let _ = backend.add_with_status("nexus-a", "img", Some("Up 3 minutes"));
    let _ = backend.add_with_status("nexus-b", "img", Some("Exited (1) 2 hours ago"));
    let _ = backend.add_with_status("other", "img", Some("Up 1 second"));

    let config = FleetConfig::default();
    let poller = Poller::new(engine(&backend), &config);
    assert!(poller.refresh_containers().await);

    let published = poller.containers().current();
    let snapshot = published.value.as_ref().unwrap();
    assert_eq!(snapshot.containers.len(), 2);
    assert_eq!(snapshot.containers[0].name, "nexus-a");
    assert_eq!(snapshot.containers[0].lifecycle_state, LifecycleState::Running);
    assert_eq!(snapshot.containers[1].name, "nexus-b");
    assert_eq!(snapshot.containers[1].lifecycle_state, LifecycleState::Stopped);
    assert!(snapshot.containers.iter().all(|v| v.managed));
}

#[tokio::test]
async fn pipeline_missing_status_is_listed_as_unknown() {
    let backend = Arc::new(MemoryBackend::new());
    let _ = backend.add_with_status("nexus-ghost", "img", None);
    let views = engine(&backend).list_views().await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].lifecycle_state, LifecycleState::Unknown);
}

// ── Actions ──────────────────────────────────────────────────────────

#[tokio::test]
async fn pipeline_concurrent_stop_is_rejected_while_pending() {
    let backend = Arc::new(MemoryBackend::new());
    let id = backend.add_with_status("nexus-a", "img", Some("Up 3 minutes"));
    backend.hold_actions();
    let dispatcher = Dispatcher::new(engine(&backend));

    let first = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move {
            dispatcher
                .dispatch(ActionRequest::new(Action::Stop, Target::Name("nexus-a".into())))
                .await
        }
    });
    wait_pending(&dispatcher, &id).await;

    let second = dispatcher
        .dispatch(ActionRequest::new(Action::Stop, Target::Name("nexus-a".into())))
        .await;
    assert!(!second.success);
    assert_eq!(second.error_kind, Some(ErrorKind::ActionInProgress));
    assert_eq!(backend.execute_calls(), 1);

    backend.release_actions();
    let first = first.await.unwrap();
    assert!(first.success, "{first:?}");
    assert!(!dispatcher.is_pending(&id));
    assert_eq!(backend.is_running(&id), Some(false));
}

#[tokio::test]
async fn pipeline_distinct_targets_proceed_concurrently() {
    let backend = Arc::new(MemoryBackend::new());
    let a = backend.add_container("nexus-a", "img", true);
    let b = backend.add_container("nexus-b", "img", true);
    backend.hold_actions();
    let dispatcher = Dispatcher::new(engine(&backend));

    let spawn_stop = |id: ContainerId| {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            dispatcher
                .dispatch(ActionRequest::new(Action::Stop, Target::Id(id)))
                .await
        })
    };
    let first = spawn_stop(a.clone());
    let second = spawn_stop(b.clone());
    wait_pending(&dispatcher, &a).await;
    wait_pending(&dispatcher, &b).await;
    assert_eq!(dispatcher.in_flight().len(), 2);

    backend.release_actions();
    assert!(first.await.unwrap().success);
    assert!(second.await.unwrap().success);
    assert_eq!(backend.execute_calls(), 2);
}

#[tokio::test]
async fn pipeline_remove_missing_target_makes_no_mutation_call() {
    let backend = Arc::new(MemoryBackend::new());
    let _ = backend.add_container("nexus-a", "img", true);
    let dispatcher = Dispatcher::new(engine(&backend));

    let result = dispatcher
        .dispatch_raw(RawActionRequest {
            action: "remove".into(),
            container_name: Some("nexus-does-not-exist".into()),
            ..RawActionRequest::default()
        })
        .await;
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::TargetNotFound));
    assert_eq!(backend.execute_calls(), 0);
}

#[tokio::test]
async fn pipeline_remove_running_target_is_forced() {
    let backend = Arc::new(MemoryBackend::new());
    let id = backend.add_container("nexus-a", "img", true);
    let result = Dispatcher::new(engine(&backend))
        .dispatch(ActionRequest::new(Action::Remove, Target::Id(id.clone())))
        .await;
    assert!(result.success, "{result:?}");
    assert_eq!(backend.is_running(&id), None);
}

// ── Polling ──────────────────────────────────────────────────────────

#[tokio::test]
async fn pipeline_failed_tick_keeps_previous_snapshot() {
    let backend = Arc::new(MemoryBackend::new());
    let _ = backend.add_container("nexus-a", "img", true);
    let poller = Poller::new(engine(&backend), &FleetConfig::default());
    let _ = poller.tick().await;
    let before = poller.containers().current();

    backend.set_available(false);
    let outcome = poller.tick().await;
    assert!(!outcome.containers);

    let after = poller.containers().current();
    assert!(Arc::ptr_eq(
        before.value.as_ref().unwrap(),
        after.value.as_ref().unwrap()
    ));
    assert_eq!(after.value, before.value);
    assert!(after.is_stale());
    assert_eq!(
        after.health.last_failure.as_ref().unwrap().kind,
        ErrorKind::EngineUnavailable
    );
}

#[tokio::test]
async fn pipeline_three_failures_degrade_both_feeds() {
    let backend = Arc::new(MemoryBackend::new());
    let poller = Poller::new(engine(&backend), &FleetConfig::default());
    backend.set_available(false);
    for _ in 0..3 {
        let _ = poller.tick().await;
    }
    assert!(poller.containers().current().is_degraded());
    assert!(poller.metrics().current().is_degraded());

    backend.set_available(true);
    let outcome = poller.tick().await;
    assert!(outcome.containers && outcome.metrics);
    assert!(!poller.containers().current().is_degraded());
}

#[tokio::test(start_paused = true)]
async fn pipeline_successful_action_triggers_early_refresh() {
    let backend = Arc::new(MemoryBackend::new());
    let id = backend.add_container("nexus-a", "img", true);
    let poller = Arc::new(Poller::new(engine(&backend), &FleetConfig::default()));
    let mut snapshots = poller.containers().subscribe();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = poller.spawn(shutdown_rx);

    snapshots.changed().await.unwrap();
    let dispatcher = Dispatcher::new(engine(&backend))
        .with_snapshot(poller.containers().subscribe())
        .with_refresh(poller.refresh_handle());
    let result = dispatcher
        .dispatch(ActionRequest::new(Action::Stop, Target::Id(id)))
        .await;
    assert!(result.success);

    tokio::time::timeout(Duration::from_secs(1), snapshots.changed())
        .await
        .expect("refresh well before the next interval")
        .unwrap();
    let current = poller.containers().current();
    let snapshot = current.value.as_ref().unwrap();
    assert_eq!(snapshot.containers[0].lifecycle_state, LifecycleState::Stopped);
    handle.abort();
}

// ── Logs ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn pipeline_log_stream_ends_after_target_removed() {
    let backend = Arc::new(MemoryBackend::new());
    let id = backend.add_container("nexus-a", "img", true);
    backend.hold_streams_open(true);
    backend.emit_log(&id, OutputStream::Stdout, "hello");

    let engine = engine(&backend);
    let window = engine.call_timeout() * 2;
    let mut logs = LogReader::new(engine, 16)
        .open(&Target::Id(id.clone()), None)
        .await
        .unwrap();
    assert!(matches!(logs.next().await, Some(LogEvent::Line(l)) if l.text == "hello"));

    assert!(backend.remove_external(&id));
    let event = tokio::time::timeout(window, logs.next())
        .await
        .expect("stream ends within one probe window");
    assert_eq!(
        event,
        Some(LogEvent::End {
            reason: EndReason::TargetRemoved
        })
    );
}

#[tokio::test]
async fn pipeline_slow_subscriber_sees_gap() {
    let backend = Arc::new(MemoryBackend::new());
    let id = backend.add_container("nexus-a", "img", true);
    let mut logs = LogReader::new(engine(&backend), 2)
        .open(&Target::Id(id.clone()), None)
        .await
        .unwrap();

    for i in 0..5 {
        backend.emit_log(&id, OutputStream::Stdout, &format!("line {i}"));
    }
    assert!(backend.remove_external(&id));

    let mut events = Vec::new();
    while let Some(event) = logs.next().await {
        events.push(event);
    }
    let dropped: u64 = events
        .iter()
        .map(|e| match e {
            LogEvent::Gap { dropped } => *dropped,
            _ => 0,
        })
        .sum();
    let lines = u64::try_from(
        events
            .iter()
            .filter(|e| matches!(e, LogEvent::Line(_)))
            .count(),
    )
    .unwrap();
    assert_eq!(dropped + lines, 5);
    assert!(matches!(events.last(), Some(LogEvent::End { .. })));
}

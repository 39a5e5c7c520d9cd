//! Aggregate resource metrics for the managed fleet.
//!
//! Samples every running managed container's counters through the engine,
//! derives per-container figures, and folds them into one immutable
//! [`MetricsSnapshot`] per tick.

use chrono::{DateTime, Utc};
use fleetctl_common::error::EngineError;
use fleetctl_common::types::{ContainerId, ContainerView, LifecycleState};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use crate::backend::{HostInfo, RawUsage};
use crate::engine::Engine;

/// Resource usage of one running container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerUsage {
    /// Container this row belongs to.
    pub container_id: ContainerId,
    /// Container name.
    pub name: String,
    /// CPU usage as a percentage of one CPU (may exceed 100 on multi-core).
    pub cpu_percent: f64,
    /// Memory in use, in bytes.
    pub memory_usage_bytes: u64,
    /// Memory limit, in bytes (0 when unknown).
    pub memory_limit_bytes: u64,
    /// Memory usage as a percentage of the limit.
    pub memory_percent: f64,
    /// Bytes received.
    pub network_rx_bytes: u64,
    /// Bytes sent.
    pub network_tx_bytes: u64,
}

/// Fleet-wide figures at one polling instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// When the sample was taken.
    pub captured_at: DateTime<Utc>,
    /// Managed containers seen.
    pub containers_total: usize,
    /// Of which running.
    pub containers_running: usize,
    /// Of which stopped.
    pub containers_stopped: usize,
    /// Of which in an unknown state.
    pub containers_unknown: usize,
    /// Sum of per-container CPU percentages.
    pub cpu_percent_total: f64,
    /// Sum of memory in use.
    pub memory_usage_bytes: u64,
    /// Sum of memory limits.
    pub memory_limit_bytes: u64,
    /// Sum of bytes received.
    pub network_rx_bytes: u64,
    /// Sum of bytes sent.
    pub network_tx_bytes: u64,
    /// Per-container rows for running containers, sorted by name.
    pub per_container: Vec<ContainerUsage>,
    /// Host facts reported by the engine.
    pub host: HostInfo,
}

/// CPU percentage from two cumulative samples.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn cpu_percent(usage: &RawUsage) -> f64 {
    let cpu_delta = usage.cpu_total_ns.saturating_sub(usage.precpu_total_ns);
    let system_delta = usage.system_cpu_ns.saturating_sub(usage.presystem_cpu_ns);
    if system_delta == 0 || cpu_delta == 0 {
        return 0.0;
    }
    let cpus = f64::from(usage.online_cpus.max(1));
    (cpu_delta as f64 / system_delta as f64) * cpus * 100.0
}

/// Memory usage as a percentage of the limit; 0 without a limit.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn memory_percent(usage_bytes: u64, limit_bytes: u64) -> f64 {
    if limit_bytes == 0 {
        return 0.0;
    }
    usage_bytes as f64 / limit_bytes as f64 * 100.0
}

/// Rounds to two decimals for display-friendly figures.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Builds one usage row from raw counters.
#[must_use]
pub fn usage_row(view: &ContainerView, raw: &RawUsage) -> ContainerUsage {
    ContainerUsage {
        container_id: view.id.clone(),
        name: view.name.clone(),
        cpu_percent: round2(cpu_percent(raw)),
        memory_usage_bytes: raw.memory_usage_bytes,
        memory_limit_bytes: raw.memory_limit_bytes,
        memory_percent: round2(memory_percent(raw.memory_usage_bytes, raw.memory_limit_bytes)),
        network_rx_bytes: raw.network_rx_bytes,
        network_tx_bytes: raw.network_tx_bytes,
    }
}

/// Folds views and usage rows into a snapshot.
#[must_use]
pub fn aggregate(
    views: &[ContainerView],
    mut rows: Vec<ContainerUsage>,
    host: HostInfo,
    captured_at: DateTime<Utc>,
) -> MetricsSnapshot {
    let count = |state| views.iter().filter(|v| v.lifecycle_state == state).count();
    rows.sort_by(|a, b| a.name.cmp(&b.name));
    MetricsSnapshot {
        captured_at,
        containers_total: views.len(),
        containers_running: count(LifecycleState::Running),
        containers_stopped: count(LifecycleState::Stopped),
        containers_unknown: count(LifecycleState::Unknown),
        cpu_percent_total: round2(rows.iter().map(|r| r.cpu_percent).sum()),
        memory_usage_bytes: rows.iter().map(|r| r.memory_usage_bytes).sum(),
        memory_limit_bytes: rows.iter().map(|r| r.memory_limit_bytes).sum(),
        network_rx_bytes: rows.iter().map(|r| r.network_rx_bytes).sum(),
        network_tx_bytes: rows.iter().map(|r| r.network_tx_bytes).sum(),
        per_container: rows,
        host,
    }
}

/// Collects a metrics snapshot for all managed containers.
///
/// A container that disappears between listing and sampling is skipped.
///
/// # Errors
///
/// Returns the first engine-level failure (unreachable engine, timeout).
pub async fn collect_metrics(engine: &Engine) -> Result<MetricsSnapshot, EngineError> {
    let captured_at = Utc::now();
    let views = engine.list_views().await?;
    let running: Vec<&ContainerView> = views.iter().filter(|v| v.is_running()).collect();
    tracing::debug!(running = running.len(), "collecting metrics");

    let samples = join_all(running.iter().map(|v| engine.stats(&v.id))).await;
    let mut rows = Vec::with_capacity(running.len());
    for (view, sample) in running.iter().zip(samples) {
        match sample {
            Ok(raw) => rows.push(usage_row(view, &raw)),
            Err(EngineError::NotFound { .. }) => {
                tracing::debug!(id = %view.id, "container vanished before sampling");
            }
            Err(e) => return Err(e),
        }
    }

    let host = engine.host_info().await?;
    Ok(aggregate(&views, rows, host, captured_at))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fleetctl_common::config::FleetConfig;

    use super::*;
    use crate::backend::memory::MemoryBackend;

    fn raw(cpu: u64, sys: u64, cpus: u32, mem: u64, limit: u64) -> RawUsage {
        RawUsage {
            cpu_total_ns: cpu,
            precpu_total_ns: 0,
            system_cpu_ns: sys,
            presystem_cpu_ns: 0,
            online_cpus: cpus,
            memory_usage_bytes: mem,
            memory_limit_bytes: limit,
            network_rx_bytes: 10,
            network_tx_bytes: 5,
        }
    }

    #[test]
    fn cpu_percent_scales_with_online_cpus() {
        let usage = raw(50, 1000, 4, 0, 0);
        assert!((cpu_percent(&usage) - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn cpu_percent_is_zero_without_deltas() {
        assert!(cpu_percent(&RawUsage::default()).abs() < f64::EPSILON);
    }

    #[test]
    fn memory_percent_handles_missing_limit() {
        assert!(memory_percent(100, 0).abs() < f64::EPSILON);
        assert!((memory_percent(256, 1024) - 25.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn collect_counts_states_and_sums_running_usage() {
        let backend = Arc::new(MemoryBackend::new());
        let a = backend.add_container("nexus-a", "img", true);
        let b = backend.add_container("nexus-b", "img", true);
        let _ = backend.add_container("nexus-c", "img", false);
        let _ = backend.add_with_status("nexus-d", "img", None);
        let other = backend.add_container("other", "img", true);
        backend.set_usage(&a, raw(100, 1000, 1, 100, 1000));
        backend.set_usage(&b, raw(200, 1000, 1, 300, 1000));
        backend.set_usage(&other, raw(900, 1000, 1, 900, 1000));

        let engine = Engine::with_backend(backend, &FleetConfig::default());
        let snap = collect_metrics(&engine).await.unwrap();

        assert_eq!(snap.containers_total, 4);
        assert_eq!(snap.containers_running, 2);
        assert_eq!(snap.containers_stopped, 1);
        assert_eq!(snap.containers_unknown, 1);
        assert_eq!(snap.per_container.len(), 2);
        assert!((snap.cpu_percent_total - 30.0).abs() < 1e-9);
        assert_eq!(snap.memory_usage_bytes, 400);
        assert_eq!(snap.network_rx_bytes, 20);
    }

    #[tokio::test]
    async fn collect_fails_when_stats_endpoint_fails() {
        let backend = Arc::new(MemoryBackend::new());
        let _ = backend.add_container("nexus-a", "img", true);
        backend.set_stats_available(false);
        let engine = Engine::with_backend(backend, &FleetConfig::default());
        assert!(collect_metrics(&engine).await.is_err());
    }
}

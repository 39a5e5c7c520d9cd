//! `fleetctl metrics` — Show aggregate resource metrics.

use fleetctl_sdk::FleetController;

use crate::output::{self, format_bytes, format_percent};

/// Executes the `metrics` command.
///
/// # Errors
///
/// Returns an error if the metrics could not be collected.
pub async fn execute(controller: &FleetController, json: bool) -> anyhow::Result<()> {
    let _ = controller.refresh_metrics().await;
    let report = controller.metrics();
    let Some(snapshot) = &report.snapshot else {
        let reason = report.health.last_failure.as_ref().map_or_else(
            || "no metrics available".to_string(),
            |f| format!("{}: {}", f.kind, f.message),
        );
        anyhow::bail!("{reason}");
    };

    if json {
        return output::print_json(&report);
    }

    println!(
        "Containers: {} total, {} running, {} stopped, {} unknown",
        snapshot.containers_total,
        snapshot.containers_running,
        snapshot.containers_stopped,
        snapshot.containers_unknown
    );
    println!(
        "CPU: {}   Memory: {} / {}   Net: {} rx / {} tx",
        format_percent(snapshot.cpu_percent_total),
        format_bytes(snapshot.memory_usage_bytes),
        format_bytes(snapshot.memory_limit_bytes),
        format_bytes(snapshot.network_rx_bytes),
        format_bytes(snapshot.network_tx_bytes)
    );
    let host = &snapshot.host;
    println!(
        "Host: engine {}, {} CPUs, {} memory",
        host.engine_version.as_deref().unwrap_or("-"),
        host.cpu_count.map_or_else(|| "-".to_string(), |n| n.to_string()),
        host.memory_total_bytes
            .map_or_else(|| "-".to_string(), format_bytes)
    );

    if snapshot.per_container.is_empty() {
        return Ok(());
    }
    println!();
    println!(
        "{:<24} {:>9} {:>12} {:>12} {:>8} {:>12} {:>12}",
        "NAME", "CPU", "MEM", "LIMIT", "MEM %", "NET RX", "NET TX"
    );
    for row in &snapshot.per_container {
        println!(
            "{:<24} {:>9} {:>12} {:>12} {:>8} {:>12} {:>12}",
            row.name,
            format_percent(row.cpu_percent),
            format_bytes(row.memory_usage_bytes),
            format_bytes(row.memory_limit_bytes),
            format_percent(row.memory_percent),
            format_bytes(row.network_rx_bytes),
            format_bytes(row.network_tx_bytes)
        );
    }
    Ok(())
}

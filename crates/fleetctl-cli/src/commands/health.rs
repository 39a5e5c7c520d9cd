//! `fleetctl health` — Check engine reachability and feed freshness.

use std::fmt::Write;

use fleetctl_runtime::snapshot::FeedHealth;
use fleetctl_sdk::FleetController;
use fleetctl_sdk::controller::HealthStatus;

use crate::output;

fn describe(name: &str, health: &FeedHealth) -> String {
    let last_success = health
        .last_success_at
        .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
    let mut line = format!(
        "{name:<11} last success {last_success}, {} consecutive failures",
        health.consecutive_failures
    );
    if let Some(failure) = &health.last_failure {
        let _ = write!(line, "; last error {}: {}", failure.kind, failure.message);
    }
    line
}

/// Executes the `health` command.
///
/// Pings the engine, runs one refresh of both feeds and reports their state.
///
/// # Errors
///
/// Returns an error if either feed is not current.
pub async fn execute(controller: &FleetController, json: bool) -> anyhow::Result<()> {
    let reachable = controller.ping().await;
    let _ = controller.refresh_now().await;
    let report = controller.health();

    if json {
        output::print_json(&report)?;
    } else {
        let color = output::stdout_is_terminal();
        let status = report.status.to_string();
        let status = if report.status == HealthStatus::Ok {
            status
        } else {
            output::warn_text(&status, color)
        };
        println!("status:     {status}");
        println!("backend:    {}", report.backend);
        match &reachable {
            Ok(()) => println!("engine:     reachable"),
            Err(e) => println!("engine:     {}", output::warn_text(&e.to_string(), color)),
        }
        println!("{}", describe("containers", &report.containers));
        println!("{}", describe("metrics", &report.metrics));
    }

    if let Err(e) = reachable {
        tracing::debug!(error = %e, "engine ping failed");
    }
    if report.status != HealthStatus::Ok {
        anyhow::bail!("fleet control layer is {}", report.status);
    }
    Ok(())
}

//! `fleetctl ps` — List managed containers.

use chrono::Utc;
use clap::Args;
use fleetctl_common::types::PortMapping;
use fleetctl_sdk::FleetController;
use fleetctl_sdk::controller::ContainerListing;

use crate::output;

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Show all containers (including stopped).
    #[arg(short, long)]
    pub all: bool,
}

/// Executes the `ps` command.
///
/// Refreshes the container feed once and prints the managed containers
/// in a tabular format.
///
/// # Errors
///
/// Returns an error if the engine could not be queried.
pub async fn execute(controller: &FleetController, args: PsArgs, json: bool) -> anyhow::Result<()> {
    let _ = controller.refresh_containers().await;
    let mut listing = controller.containers();
    if listing.generation.is_none() {
        anyhow::bail!("{}", failure_message(&listing));
    }
    if !args.all {
        listing.containers.retain(|v| v.is_running());
    }

    if json {
        return output::print_json(&listing);
    }

    if listing.containers.is_empty() {
        println!("No containers found.");
        return Ok(());
    }

    let color = output::stdout_is_terminal();
    let now = Utc::now();
    println!(
        "{:<14} {:<24} {:<9} {:<28} {:<16} {:<20} {}",
        "CONTAINER ID", "NAME", "STATE", "STATUS", "CREATED", "IMAGE", "PORTS"
    );
    for v in &listing.containers {
        println!(
            "{:<14} {:<24} {} {:<28} {:<16} {:<20} {}",
            v.id.short(),
            v.name,
            output::format_state(v.lifecycle_state, 9, color),
            v.status,
            output::format_age(v.created_at, now),
            v.image,
            format_ports(&v.ports)
        );
    }
    Ok(())
}

fn format_ports(ports: &[PortMapping]) -> String {
    ports
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn failure_message(listing: &ContainerListing) -> String {
    listing.health.last_failure.as_ref().map_or_else(
        || "no container data available".to_string(),
        |f| format!("{}: {}", f.kind, f.message),
    )
}

//! `fleetctl watch` — Stream lifecycle events until interrupted.

use chrono::Utc;
use fleetctl_sdk::{FleetController, FleetEvent};

use crate::output;

fn describe(event: &FleetEvent) -> String {
    match event {
        FleetEvent::Appeared { container } => format!(
            "appeared  {} ({}) {}",
            container.name,
            container.id.short(),
            container.lifecycle_state
        ),
        FleetEvent::StateChanged { name, from, to, .. } => {
            format!("changed   {name} {from} -> {to}")
        }
        FleetEvent::Vanished { name, container_id } => {
            format!("vanished  {name} ({})", container_id.short())
        }
        FleetEvent::FeedDegraded {
            consecutive_failures,
        } => format!("degraded  engine unreachable for {consecutive_failures} polls"),
        FleetEvent::FeedRecovered => "recovered engine reachable again".to_string(),
    }
}

/// Executes the `watch` command.
///
/// Starts the poll loop and prints every lifecycle event, beginning with
/// the containers present at startup.
///
/// # Errors
///
/// Returns an error if the Ctrl+C handler cannot be installed.
pub async fn execute(controller: &FleetController, json: bool) -> anyhow::Result<()> {
    let interrupt = super::interrupt_signal()?;
    let mut events = controller.events();
    let _ = controller.start();

    loop {
        let event = tokio::select! {
            event = events.next() => event,
            () = interrupt.notified() => break,
        };
        let Some(event) = event else { break };
        if json {
            output::print_json_line(&event)?;
        } else {
            println!("{} {}", Utc::now().format("%H:%M:%S"), describe(&event));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use fleetctl_common::types::{ContainerId, LifecycleState};

    use super::*;

    #[test]
    fn describe_state_change() {
        let event = FleetEvent::StateChanged {
            container_id: ContainerId::new("0123456789abcdef"),
            name: "nexus-a".into(),
            from: LifecycleState::Running,
            to: LifecycleState::Stopped,
        };
        assert_eq!(describe(&event), "changed   nexus-a running -> stopped");
    }

    #[test]
    fn describe_vanished_uses_short_id() {
        let event = FleetEvent::Vanished {
            container_id: ContainerId::new("0123456789abcdef"),
            name: "nexus-a".into(),
        };
        assert_eq!(describe(&event), "vanished  nexus-a (0123456789ab)");
    }
}

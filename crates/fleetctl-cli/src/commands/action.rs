//! `fleetctl start|stop|restart|rm` — Apply a lifecycle action.

use clap::Args;
use fleetctl_common::types::{ActionResult, RawActionRequest, Target};
use fleetctl_sdk::FleetController;
use serde::Serialize;

use crate::output;

/// Arguments shared by the lifecycle commands.
#[derive(Args, Debug)]
pub struct ActionArgs {
    /// Container names or ids.
    #[arg(required = true)]
    pub containers: Vec<String>,
}

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container names or ids.
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub containers: Vec<String>,

    /// Stop every running managed container.
    #[arg(short, long)]
    pub all: bool,
}

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Container names or ids.
    #[arg(required = true)]
    pub containers: Vec<String>,

    /// Also delete the container's anonymous volumes.
    #[arg(short, long)]
    pub volumes: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TargetOutcome {
    target: String,
    #[serde(flatten)]
    result: ActionResult,
}

/// Builds the wire request for one command-line target.
#[must_use]
pub fn request_for(action: &str, raw: &str, remove_volumes: bool) -> RawActionRequest {
    let (container_id, container_name) = match super::parse_target(raw) {
        Target::Id(id) => (Some(id.to_string()), None),
        Target::Name(name) => (None, Some(name)),
    };
    RawActionRequest {
        action: action.to_string(),
        container_id,
        container_name,
        remove_volumes,
    }
}

/// Executes a lifecycle command against every named target in order.
///
/// # Errors
///
/// Returns an error if any action failed.
pub async fn execute(
    controller: &FleetController,
    action: &str,
    containers: Vec<String>,
    remove_volumes: bool,
    json: bool,
) -> anyhow::Result<()> {
    let mut outcomes = Vec::with_capacity(containers.len());
    for target in containers {
        let result = controller
            .submit(request_for(action, &target, remove_volumes))
            .await;
        outcomes.push(TargetOutcome { target, result });
    }
    report(action, &outcomes, json)
}

/// Executes `stop --all`: every running managed container, concurrently.
///
/// # Errors
///
/// Returns an error if the engine cannot list containers or any stop failed.
pub async fn stop_all(controller: &FleetController, json: bool) -> anyhow::Result<()> {
    let outcomes: Vec<TargetOutcome> = controller
        .stop_all()
        .await?
        .into_iter()
        .map(|outcome| TargetOutcome {
            target: outcome.name,
            result: outcome.result,
        })
        .collect();
    if outcomes.is_empty() && !json {
        println!("No running managed containers");
        return Ok(());
    }
    report("stop", &outcomes, json)
}

fn report(action: &str, outcomes: &[TargetOutcome], json: bool) -> anyhow::Result<()> {
    if json {
        output::print_json(&outcomes)?;
    } else {
        for outcome in outcomes {
            let message = outcome.result.message.as_deref().unwrap_or_default();
            match outcome.result.error_kind {
                None => println!("{}: {message}", outcome.target),
                Some(kind) => eprintln!("{}: {kind}: {message}", outcome.target),
            }
        }
    }

    let failed = outcomes.iter().filter(|o| !o.result.success).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} {action} actions failed", outcomes.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use clap::Parser;
    use fleetctl_runtime::backend::memory::MemoryBackend;
    use fleetctl_sdk::ControllerBuilder;

    use super::*;
    use crate::commands::{Cli, Command};

    fn controller(backend: &Arc<MemoryBackend>) -> FleetController {
        ControllerBuilder::new()
            .backend(Arc::clone(backend) as _)
            .build()
            .unwrap()
    }

    #[test]
    fn request_uses_id_field_for_hex_targets() {
        let request = request_for("stop", "0123456789abcdef", false);
        assert_eq!(request.container_id.as_deref(), Some("0123456789abcdef"));
        assert!(request.container_name.is_none());
    }

    #[test]
    fn request_uses_name_field_otherwise() {
        let request = request_for("remove", "nexus-a", false);
        assert_eq!(request.action, "remove");
        assert_eq!(request.container_name.as_deref(), Some("nexus-a"));
        assert!(request.container_id.is_none());
    }

    #[test]
    fn rm_volumes_flag_is_parsed() {
        let cli = Cli::try_parse_from(["fleetctl", "rm", "-v", "nexus-a"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Rm(RmArgs { volumes: true, ref containers }) if containers == &["nexus-a"]
        ));
    }

    #[test]
    fn stop_needs_targets_or_all_but_not_both() {
        assert!(Cli::try_parse_from(["fleetctl", "stop"]).is_err());
        assert!(Cli::try_parse_from(["fleetctl", "stop", "--all", "nexus-a"]).is_err());
        let cli = Cli::try_parse_from(["fleetctl", "stop", "--all"]).unwrap();
        assert!(matches!(cli.command, Command::Stop(StopArgs { all: true, .. })));
    }

    #[tokio::test]
    async fn rm_with_volumes_reaches_the_engine() {
        let backend = Arc::new(MemoryBackend::new());
        let id = backend.add_container("nexus-a", "img", false);
        let controller = controller(&backend);

        execute(&controller, "remove", vec!["nexus-a".into()], true, false)
            .await
            .unwrap();
        assert!(backend.volumes_removed(&id));
    }

    #[tokio::test]
    async fn stop_all_stops_running_nodes_and_fails_without_engine() {
        let backend = Arc::new(MemoryBackend::new());
        let a = backend.add_container("nexus-a", "img", true);
        let b = backend.add_container("nexus-b", "img", true);
        let controller = controller(&backend);

        stop_all(&controller, true).await.unwrap();
        assert_eq!(backend.is_running(&a), Some(false));
        assert_eq!(backend.is_running(&b), Some(false));

        backend.set_available(false);
        assert!(stop_all(&controller, true).await.is_err());
    }
}

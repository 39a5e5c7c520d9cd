//! `fleetctl logs` — View or follow container logs.

use clap::Args;
use fleetctl_common::types::{LogLine, OutputStream};
use fleetctl_runtime::logs::LogEvent;
use fleetctl_sdk::FleetController;

use crate::output;

/// Arguments for the `logs` command.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Container name or id.
    pub container: String,

    /// Follow log output.
    #[arg(short, long)]
    pub follow: bool,

    /// Number of lines to show from the end (defaults to the configured
    /// tail). With `--follow`, the history replayed before new lines.
    #[arg(short = 'n', long)]
    pub tail: Option<usize>,

    /// Prefix each line with its timestamp.
    #[arg(short, long)]
    pub timestamps: bool,
}

fn print_line(line: &LogLine, timestamps: bool) {
    let text = if timestamps {
        format!("{} {}", line.timestamp.to_rfc3339(), line.text)
    } else {
        line.text.clone()
    };
    match line.stream {
        OutputStream::Stdout => println!("{text}"),
        OutputStream::Stderr => eprintln!("{text}"),
    }
}

/// Executes the `logs` command.
///
/// Without `--follow`, prints the last lines and exits. With it, streams
/// until the container goes away or Ctrl+C is pressed.
///
/// # Errors
///
/// Returns an error if the container is not found or the engine fails.
pub async fn execute(controller: &FleetController, args: LogsArgs, json: bool) -> anyhow::Result<()> {
    let target = super::parse_target(&args.container);
    if !args.follow {
        let tail = args.tail.unwrap_or(controller.config().log_tail_lines);
        let lines = controller.tail_logs(&target, tail).await?;
        if json {
            return output::print_json(&lines);
        }
        if lines.is_empty() {
            println!("No logs available for container: {}", args.container);
        }
        for line in &lines {
            print_line(line, args.timestamps);
        }
        return Ok(());
    }

    let interrupt = super::interrupt_signal()?;
    let mut stream = controller.open_logs(&target, args.tail).await?;
    tracing::debug!(id = %stream.id(), name = stream.name(), "following logs");
    loop {
        let event = tokio::select! {
            event = stream.next() => event,
            () = interrupt.notified() => break,
        };
        let Some(event) = event else { break };
        if json {
            output::print_json_line(&event)?;
            continue;
        }
        match event {
            LogEvent::Line(line) => print_line(&line, args.timestamps),
            LogEvent::Gap { dropped } => eprintln!("... {dropped} lines dropped ..."),
            LogEvent::End { reason } => eprintln!("--- log stream ended: {reason} ---"),
        }
    }
    Ok(())
}

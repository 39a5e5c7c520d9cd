//! CLI command definitions and dispatch.

pub mod action;
pub mod health;
pub mod logs;
pub mod metrics;
pub mod ps;
pub mod watch;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use fleetctl_common::config::FleetConfig;
use fleetctl_common::types::{ContainerId, Target};
use fleetctl_sdk::{ControllerBuilder, FleetController};
use tokio::sync::Notify;

/// fleetctl — Control a managed container fleet.
#[derive(Parser, Debug)]
#[command(name = fleetctl_common::constants::BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Engine and polling options.
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Print machine-readable JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,

    /// Diagnostic log format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, env = "FLEETCTL_LOG_FORMAT")]
    pub log_format: LogFormat,
}

/// Diagnostic log output format.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Options shared by every command. Each overrides the config file.
#[derive(Args, Debug, Default)]
pub struct EngineArgs {
    /// Path to a JSON configuration file.
    #[arg(long, global = true, env = "FLEETCTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Engine endpoint (unix://, tcp://, http://, memory://).
    #[arg(long, global = true, env = "FLEETCTL_ENGINE")]
    pub engine: Option<String>,

    /// Name prefix of managed containers.
    #[arg(long, global = true, env = "FLEETCTL_MANAGED_PREFIX")]
    pub prefix: Option<String>,

    /// Poll interval in milliseconds.
    #[arg(long, global = true, env = "FLEETCTL_POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,

    /// Maximum random delay added to each poll, in milliseconds.
    #[arg(long, global = true, env = "FLEETCTL_POLL_JITTER_MS")]
    pub poll_jitter_ms: Option<u64>,

    /// Deadline for each engine call, in milliseconds.
    #[arg(long, global = true, env = "FLEETCTL_CALL_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Grace period for stop and restart, in seconds.
    #[arg(long, global = true, env = "FLEETCTL_STOP_GRACE_SECS")]
    pub stop_grace_secs: Option<u32>,

    /// Maximum buffered log lines per stream.
    #[arg(long, global = true, env = "FLEETCTL_LOG_BUFFER_LINES")]
    pub log_buffer_lines: Option<usize>,

    /// Failed polls before a feed is reported degraded.
    #[arg(long, global = true, env = "FLEETCTL_DEGRADED_AFTER")]
    pub degraded_after: Option<u32>,
}

impl EngineArgs {
    /// Loads the config file, if any, and applies the overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the result is invalid.
    pub fn load_config(&self) -> anyhow::Result<FleetConfig> {
        let mut config = match &self.config {
            Some(path) => FleetConfig::load(path)?,
            None => FleetConfig::default(),
        };
        if let Some(engine) = &self.engine {
            config.engine_endpoint.clone_from(engine);
        }
        if let Some(prefix) = &self.prefix {
            config.managed_prefix.clone_from(prefix);
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        if let Some(ms) = self.poll_jitter_ms {
            config.poll_jitter_ms = ms;
        }
        if let Some(ms) = self.timeout_ms {
            config.call_timeout_ms = ms;
        }
        if let Some(secs) = self.stop_grace_secs {
            config.stop_grace_secs = secs;
        }
        if let Some(lines) = self.log_buffer_lines {
            config.log_buffer_lines = lines;
        }
        if let Some(n) = self.degraded_after {
            config.degraded_after = n;
        }
        config.validate()?;
        Ok(config)
    }

    /// Builds a controller from the effective configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid. An unreachable
    /// engine is not an error here; it shows up in feed health.
    pub fn controller(&self) -> anyhow::Result<FleetController> {
        let config = self.load_config()?;
        tracing::debug!(endpoint = %config.engine_endpoint, prefix = %config.managed_prefix, "effective configuration");
        Ok(ControllerBuilder::from_config(config).build()?)
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List managed containers.
    Ps(ps::PsArgs),
    /// Start containers.
    Start(action::ActionArgs),
    /// Stop containers gracefully.
    Stop(action::StopArgs),
    /// Restart containers.
    Restart(action::ActionArgs),
    /// Remove containers (forced, even when running).
    Rm(action::RmArgs),
    /// View or follow container logs.
    Logs(logs::LogsArgs),
    /// Show aggregate resource metrics.
    Metrics,
    /// Stream lifecycle events until interrupted.
    Watch,
    /// Check engine reachability and feed freshness.
    Health,
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let controller = cli.engine.controller()?;
    let json = cli.json;
    let result = match cli.command {
        Command::Ps(args) => ps::execute(&controller, args, json).await,
        Command::Start(args) => {
            action::execute(&controller, "start", args.containers, false, json).await
        }
        Command::Stop(args) if args.all => action::stop_all(&controller, json).await,
        Command::Stop(args) => {
            action::execute(&controller, "stop", args.containers, false, json).await
        }
        Command::Restart(args) => {
            action::execute(&controller, "restart", args.containers, false, json).await
        }
        Command::Rm(args) => {
            action::execute(&controller, "remove", args.containers, args.volumes, json).await
        }
        Command::Logs(args) => logs::execute(&controller, args, json).await,
        Command::Metrics => metrics::execute(&controller, json).await,
        Command::Watch => watch::execute(&controller, json).await,
        Command::Health => health::execute(&controller, json).await,
    };
    controller.shutdown().await;
    result
}

/// Interprets a command-line container reference.
///
/// Full or abbreviated hex ids (12 characters or more) are ids; anything
/// else is a name.
#[must_use]
pub fn parse_target(raw: &str) -> Target {
    let raw = raw.trim();
    if looks_like_id(raw) {
        Target::Id(ContainerId::new(raw))
    } else {
        Target::Name(raw.to_string())
    }
}

fn looks_like_id(raw: &str) -> bool {
    raw.len() >= 12 && raw.len() <= 64 && raw.chars().all(|c| c.is_ascii_hexdigit())
}

/// Installs a Ctrl-C handler and returns the notifier it signals.
///
/// # Errors
///
/// Returns an error if a handler is already installed.
pub fn interrupt_signal() -> anyhow::Result<Arc<Notify>> {
    let notify = Arc::new(Notify::new());
    let handle = Arc::clone(&notify);
    ctrlc::set_handler(move || handle.notify_one())
        .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;
    Ok(notify)
}

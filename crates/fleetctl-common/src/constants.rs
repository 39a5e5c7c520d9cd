//! System-wide constants and defaults.

/// Default container engine endpoint (local Docker socket).
pub const DEFAULT_ENGINE_ENDPOINT: &str = "unix:///var/run/docker.sock";

/// Endpoint that selects the in-process simulated engine.
pub const MEMORY_ENGINE_ENDPOINT: &str = "memory://";

/// Name prefix that marks a container as managed by this system.
pub const DEFAULT_MANAGED_PREFIX: &str = "nexus-";

/// Default interval between two poll ticks, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// Default upper bound of the random extra delay added to each tick.
pub const DEFAULT_POLL_JITTER_MS: u64 = 0;

/// Default deadline applied to every engine call, in milliseconds.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 8_000;

/// Grace period handed to the engine on stop and restart, in seconds.
pub const DEFAULT_STOP_GRACE_SECS: u32 = 10;

/// Maximum number of buffered log lines per subscriber.
pub const DEFAULT_LOG_BUFFER_LINES: usize = 1_000;

/// Number of historical lines replayed when a log stream attaches.
pub const DEFAULT_LOG_TAIL_LINES: usize = 100;

/// Consecutive failed ticks after which a feed is flagged degraded.
pub const DEFAULT_DEGRADED_AFTER: u32 = 3;

/// Binary name for the CLI.
pub const BIN_NAME: &str = "fleetctl";

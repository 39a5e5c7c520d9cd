//! Formatted output helpers for CLI commands.
//!
//! Provides consistent table formatting, colored status indicators,
//! and human-readable byte/percent/age formatting.

use chrono::{DateTime, Utc};
use fleetctl_common::types::LifecycleState;
use serde::Serialize;

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// Formats a byte count into a human-readable string (e.g., "128 MiB").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Formats a percentage with two decimals.
#[must_use]
pub fn format_percent(value: f64) -> String {
    format!("{value:.2}%")
}

/// Formats the time elapsed since `then` (e.g., "3 hours ago").
#[must_use]
pub fn format_age(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    let (amount, unit) = match secs {
        0..60 => (secs, "second"),
        60..3_600 => (secs / 60, "minute"),
        3_600..86_400 => (secs / 3_600, "hour"),
        _ => (secs / 86_400, "day"),
    };
    let plural = if amount == 1 { "" } else { "s" };
    format!("{amount} {unit}{plural} ago")
}

/// Renders a lifecycle state padded to `width`, colored when writing to a
/// terminal.
#[must_use]
pub fn format_state(state: LifecycleState, width: usize, color: bool) -> String {
    let text = format!("{:<width$}", state.to_string());
    if !color {
        return text;
    }
    let code = match state {
        LifecycleState::Running => GREEN,
        LifecycleState::Stopped => RED,
        LifecycleState::Unknown => YELLOW,
    };
    format!("{code}{text}{RESET}")
}

/// Wraps `text` in a warning color.
#[must_use]
pub fn warn_text(text: &str, color: bool) -> String {
    if color {
        format!("{YELLOW}{text}{RESET}")
    } else {
        text.to_string()
    }
}

/// Returns whether stdout is an interactive terminal.
#[must_use]
pub fn stdout_is_terminal() -> bool {
    use std::io::IsTerminal;
    std::io::stdout().is_terminal()
}

/// Prints a value as pretty JSON on stdout.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints a value as one JSON line on stdout.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn print_json_line<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn format_bytes_displays_bytes() {
        assert_eq!(format_bytes(512), "512 B");
    }

    #[test]
    fn format_bytes_displays_kib() {
        assert_eq!(format_bytes(2048), "2.0 KiB");
    }

    #[test]
    fn format_bytes_displays_mib() {
        assert_eq!(format_bytes(134_217_728), "128.0 MiB");
    }

    #[test]
    fn format_bytes_displays_gib() {
        assert_eq!(format_bytes(2_147_483_648), "2.0 GiB");
    }

    #[test]
    fn format_percent_uses_two_decimals() {
        assert_eq!(format_percent(12.346), "12.35%");
        assert_eq!(format_percent(0.0), "0.00%");
    }

    #[test]
    fn format_age_picks_largest_unit() {
        let now = Utc::now();
        assert_eq!(format_age(now - Duration::seconds(1), now), "1 second ago");
        assert_eq!(format_age(now - Duration::minutes(3), now), "3 minutes ago");
        assert_eq!(format_age(now - Duration::hours(2), now), "2 hours ago");
        assert_eq!(format_age(now - Duration::days(1), now), "1 day ago");
        assert_eq!(format_age(now + Duration::seconds(5), now), "0 seconds ago");
    }

    #[test]
    fn format_state_plain_and_colored() {
        assert_eq!(format_state(LifecycleState::Running, 0, false), "running");
        assert_eq!(format_state(LifecycleState::Unknown, 9, false), "unknown  ");
        let colored = format_state(LifecycleState::Stopped, 0, true);
        assert!(colored.starts_with(RED));
        assert!(colored.contains("stopped"));
    }
}

//! Formatted output helpers for CLI commands.
//!
//! Status lines go to stderr with ANSI styling; tables and values meant
//! for scripts go to stdout.

use chrono::{DateTime, Utc};

pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const RESET: &str = "\x1b[0m";

/// Formats a byte count with binary units (e.g., "128.0 MiB").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["KiB", "MiB", "GiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Coarse age of a timestamp ("42s", "5m", "3h", "2d").
#[must_use]
pub fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m", secs / 60),
        3600..=86_399 => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / 86_400),
    }
}

/// Prints a success line to stderr.
pub fn done(message: &str) {
    eprintln!("  {GREEN}✓{RESET} {message}");
}

/// Prints a warning line to stderr.
pub fn note(message: &str) {
    eprintln!("  {YELLOW}!{RESET} {message}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_picks_largest_unit() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(134_217_728), "128.0 MiB");
        assert_eq!(format_bytes(2_147_483_648), "2.0 GiB");
    }

    #[test]
    fn format_age_is_coarse() {
        let now = Utc::now();
        assert_eq!(format_age(now - chrono::Duration::seconds(42), now), "42s");
        assert_eq!(format_age(now - chrono::Duration::minutes(5), now), "5m");
        assert_eq!(format_age(now - chrono::Duration::hours(49), now), "2d");
        assert_eq!(format_age(now + chrono::Duration::seconds(5), now), "0s");
    }
}

//! Time formatting utilities

use std::time::Duration;

/// Format a playback offset the way the decoder's `--start` flag expects:
/// `H:MM:SS.mmm`. Negative inputs are treated as zero.
pub fn format_start_offset(seconds: f64) -> String {
    let clamped = seconds.max(0.0);
    let hours = (clamped / 3600.0).floor() as u64;
    let minutes = ((clamped % 3600.0) / 60.0).floor() as u64;
    let secs = clamped % 60.0;
    format!("{}:{:02}:{:06.3}", hours, minutes, secs)
}

/// Format a position for logs: `H:MM:SS` with fractional seconds dropped.
pub fn format_clock(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    format!("{}:{:02}:{:02}", hours, minutes, secs)
}

/// Convert whole minutes to a `Duration`.
pub fn minutes(minutes: u64) -> Duration {
    Duration::from_secs(minutes * 60)
}

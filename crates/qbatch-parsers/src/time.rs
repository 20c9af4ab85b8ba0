//! Walltime parsing utilities for scheduler output.

use std::time::Duration;
use thiserror::Error;

/// A status field that does not follow the expected grammar.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid walltime {0:?}: expected HH:MM:SS")]
    Walltime(String),
}

/// Parse an elapsed walltime as printed by `qstat`.
///
/// The field is normally `HH:MM:SS` (hours may exceed 24). Torque prints a
/// bare `0` for a job that has just entered the running state, before its
/// timer has ticked; that literal is read as a seconds-only value of zero.
///
/// Anything else is rejected rather than read as zero.
pub fn parse_walltime(s: &str) -> Result<Duration, ParseError> {
    let s = s.trim();
    let invalid = || ParseError::Walltime(s.to_string());

    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let parts: Vec<&str> = s.split(':').collect();
    let all_digits = |p: &&str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    if parts.len() != 3 || !parts.iter().all(all_digits) {
        return Err(invalid());
    }

    let hours: u64 = parts[0].parse().map_err(|_| invalid())?;
    let mins: u64 = parts[1].parse().map_err(|_| invalid())?;
    let secs: u64 = parts[2].parse().map_err(|_| invalid())?;
    if mins >= 60 || secs >= 60 {
        return Err(invalid());
    }

    hours
        .checked_mul(3600)
        .and_then(|h| h.checked_add(mins * 60 + secs))
        .map(Duration::from_secs)
        .ok_or_else(invalid)
}

/// Format a duration as `HH:MM:SS` (e.g. "01:30:00", "26:00:05").
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let hours = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

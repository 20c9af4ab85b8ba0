//! Query job status via qstat.
//!
//! Two output shapes are parsed here:
//!
//! - the columnar listing of `qstat -x`, one job per line;
//! - the key/value report of `qstat -x -f <id>`, scanned for the job's exit
//!   status.
//!
//! Lines that don't fit either grammar are skipped, never errors: the next
//! polling cycle gets another look.

use crate::config::TorqueConfig;
use crate::types::{ListingRow, SchedulerJobId, TorqueJobState};
use qbatch_parsers::{non_empty_string, run_command_allow_failure, run_command_merged};
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum QstatError {
    #[error("Failed to execute qstat: {0}")]
    ExecutionError(String),
}

/// Parse a single line of `qstat -x` output.
///
/// Columns are `Job id, Name, User, Time Use, S, Queue`. Header and
/// separator lines are rejected by requiring a single-letter state code.
pub fn parse_listing_line(line: &str) -> Option<ListingRow> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return None;
    }

    let code = fields[4];
    if code.len() != 1 || !code.chars().all(|c| c.is_ascii_uppercase()) {
        return None;
    }

    Some(ListingRow {
        job_id: fields[0].to_string(),
        name: fields[1].to_string(),
        user: fields[2].to_string(),
        walltime: fields[3].to_string(),
        state: TorqueJobState::from_code(code),
        queue: fields.get(5).and_then(|q| non_empty_string(q)),
    })
}

/// Parse the full `qstat -x` listing.
pub fn parse_listing(output: &str) -> Vec<ListingRow> {
    output.lines().filter_map(parse_listing_line).collect()
}

/// Scan `qstat -x -f` output for the job's exit code.
///
/// A `failed 1` / `FAILED 1` line (PBS Pro) reports exit code 1. Otherwise
/// an `exit_status = N` / `Exit_status = N` line (Torque / PBS Pro) gives
/// the code. `None` means the job has not finished as far as the scheduler
/// is telling.
pub fn parse_exit_status(output: &str) -> Option<i32> {
    for line in output.lines() {
        let line = line.trim();

        if line.starts_with("failed") || line.starts_with("FAILED") {
            let code = line.split_whitespace().nth(1).and_then(|v| v.parse::<i32>().ok());
            if code == Some(1) {
                return Some(1);
            }
            continue;
        }

        if line.starts_with("exit_status") || line.starts_with("Exit_status") {
            let value = match line.split_once(" = ") {
                Some((_, value)) => Some(value),
                None => line.split_once('=').map(|(_, value)| value),
            };
            match value.map(str::trim).and_then(|v| v.parse::<i32>().ok()) {
                Some(code) => return Some(code),
                None => tracing::debug!(line, "ignoring malformed exit status line"),
            }
        }
    }

    None
}

/// Query all jobs visible to `qstat -x`.
pub async fn query_listing(config: &TorqueConfig) -> Result<Vec<ListingRow>, QstatError> {
    let mut cmd = Command::new(&config.qstat);
    cmd.arg("-x");

    let stdout = run_command_allow_failure(&mut cmd, "qstat")
        .await
        .map_err(|e| QstatError::ExecutionError(e.to_string()))?;

    Ok(parse_listing(&stdout))
}

/// Query the exit code of one job with `qstat -x -f`.
pub async fn query_exit_status(
    config: &TorqueConfig,
    job_id: &SchedulerJobId,
) -> Result<Option<i32>, QstatError> {
    let mut cmd = Command::new(&config.qstat);
    cmd.args(["-x", "-f", job_id.base()]);

    let output = run_command_merged(&mut cmd, "qstat")
        .await
        .map_err(|e| QstatError::ExecutionError(e.to_string()))?;

    Ok(parse_exit_status(&output))
}

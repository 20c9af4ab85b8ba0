//! Command execution utilities for scheduler CLIs.
//!
//! Every call to `qsub`, `qstat` and `qdel` goes through here. Nothing is
//! retried; callers decide what a failure means for them.

use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

/// Error type for command execution.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to execute {command}: {error}")]
    Execution { command: String, error: String },
    #[error("Command {command} failed ({status}): {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

/// Render a command line for log output.
fn describe(cmd: &Command) -> String {
    let std_cmd = cmd.as_std();
    let mut parts = vec![std_cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(std_cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

async fn spawn(cmd: &mut Command, name: &str) -> Result<std::process::Output, CommandError> {
    tracing::debug!(command = %describe(cmd), "running scheduler command");
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd.output().await.map_err(|e| CommandError::Execution {
        command: name.to_string(),
        error: e.to_string(),
    })
}

/// Execute a command and return stdout as a string.
///
/// A non-zero exit status is reported as [`CommandError::Failed`] carrying
/// the command's stderr.
pub async fn run_command(cmd: &mut Command, name: &str) -> Result<String, CommandError> {
    let output = spawn(cmd, name).await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CommandError::Failed {
            command: name.to_string(),
            status: output.status.to_string(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Execute a command and return stdout, treating non-zero exit as OK.
///
/// `qstat` exits non-zero when asked about a job it has already purged;
/// the (possibly empty) output is still meaningful to the caller.
pub async fn run_command_allow_failure(
    cmd: &mut Command,
    name: &str,
) -> Result<String, CommandError> {
    let output = spawn(cmd, name).await?;

    if !output.status.success() {
        tracing::debug!(command = name, status = %output.status, "command exited non-zero");
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Execute a command and return stdout followed by stderr, ignoring the
/// exit status.
///
/// Used for line-oriented scans where a marker may be printed on either
/// stream.
pub async fn run_command_merged(cmd: &mut Command, name: &str) -> Result<String, CommandError> {
    let output = spawn(cmd, name).await?;

    let mut merged = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.stderr.is_empty() {
        if !merged.is_empty() && !merged.ends_with('\n') {
            merged.push('\n');
        }
        merged.push_str(&String::from_utf8_lossy(&output.stderr));
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_command_returns_stdout() {
        let mut cmd = Command::new("printf");
        cmd.arg("12.torque-server\n");
        let stdout = run_command(&mut cmd, "qsub").await.unwrap();
        assert_eq!(stdout, "12.torque-server\n");
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let mut cmd = Command::new("qbatch_no_such_qstat");
        let err = run_command_merged(&mut cmd, "qstat").await.unwrap_err();
        assert!(matches!(err, CommandError::Execution { ref command, .. } if command == "qstat"));
    }

    #[tokio::test]
    async fn test_run_command_nonzero_exit() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo oops >&2; exit 3"]);
        let result = run_command(&mut cmd, "sh").await;
        match result {
            Err(CommandError::Failed { stderr, .. }) => assert_eq!(stderr, "oops"),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_command_allow_failure() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo partial; exit 1"]);
        let result = run_command_allow_failure(&mut cmd, "sh").await.unwrap();
        assert_eq!(result.trim(), "partial");
    }

    #[tokio::test]
    async fn test_run_command_merged() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err >&2; exit 153"]);
        let result = run_command_merged(&mut cmd, "sh").await.unwrap();
        let lines: Vec<&str> = result.lines().collect();
        assert_eq!(lines, vec!["out", "err"]);
    }
}

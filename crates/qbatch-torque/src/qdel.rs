//! Cancel jobs via qdel.

use crate::config::TorqueConfig;
use crate::types::SchedulerJobId;
use qbatch_parsers::{run_command, CommandError};
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum QdelError {
    #[error("Failed to execute qdel: {0}")]
    ExecutionError(String),
    #[error("qdel refused to delete {job_id}: {stderr}")]
    Refused { job_id: String, stderr: String },
}

/// Ask the scheduler to delete a job. A non-zero exit is an error.
pub async fn kill_job(config: &TorqueConfig, job_id: &SchedulerJobId) -> Result<(), QdelError> {
    let mut cmd = Command::new(&config.qdel);
    cmd.arg(job_id.as_str());

    match run_command(&mut cmd, "qdel").await {
        Ok(_) => Ok(()),
        Err(CommandError::Failed { stderr, .. }) => Err(QdelError::Refused {
            job_id: job_id.to_string(),
            stderr,
        }),
        Err(e @ CommandError::Execution { .. }) => Err(QdelError::ExecutionError(e.to_string())),
    }
}

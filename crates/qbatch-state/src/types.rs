//! Job tracking types.

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use qbatch_torque::{JobResources, SchedulerJobId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Internal job identifier assigned by the calling engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    #[error("CPU request must be positive, got {0}")]
    InvalidCpus(f64),
    #[error("Command for job {0} is empty")]
    EmptyCommand(JobId),
}

/// A request to run one shell command on the cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRequest {
    pub job_id: JobId,
    pub resources: JobResources,
    pub command: String,
}

impl ResourceRequest {
    pub fn new(job_id: JobId, command: impl Into<String>) -> Self {
        Self {
            job_id,
            resources: JobResources::default(),
            command: command.into(),
        }
    }

    pub fn with_cpus(mut self, cpus: f64) -> Self {
        self.resources.cpus = Some(cpus);
        self
    }

    pub fn with_memory_bytes(mut self, bytes: u64) -> Self {
        self.resources.memory_bytes = Some(bytes);
        self
    }

    /// Reject requests the scheduler could never satisfy.
    pub fn validate(&self) -> Result<(), RequestError> {
        if let Some(cpus) = self.resources.cpus {
            if !(cpus.is_finite() && cpus > 0.0) {
                return Err(RequestError::InvalidCpus(cpus));
            }
        }
        if self.command.trim().is_empty() {
            return Err(RequestError::EmptyCommand(self.job_id));
        }
        Ok(())
    }
}

/// Lifecycle of a tracked job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    /// Submitted, not yet seen running
    Queued,
    /// Seen in state R
    Running,
    /// Exit code reported by the scheduler
    Finished { exit_code: i32 },
    /// Gave up waiting for an exit code
    Failed { reason: String },
    /// Deleted with qdel
    Killed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished { .. } | Self::Failed { .. } | Self::Killed
        )
    }
}

/// A job tracked from submission until its result has been delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,

    pub scheduler_id: SchedulerJobId,

    pub state: JobState,

    /// Last walltime reported while running
    pub walltime: Option<Duration>,

    /// Listed in state R by the most recent successful listing
    pub listed_running: bool,

    pub submitted_at: DateTime<Utc>,

    /// Generated wrapper script
    pub wrapper: Utf8PathBuf,

    /// Consecutive polls without an exit code after the job left the
    /// running listing
    pub unresolved_polls: u32,
}

impl JobRecord {
    pub fn new(job_id: JobId, scheduler_id: SchedulerJobId, wrapper: Utf8PathBuf) -> Self {
        Self {
            job_id,
            scheduler_id,
            state: JobState::Queued,
            walltime: None,
            listed_running: false,
            submitted_at: Utc::now(),
            wrapper,
            unresolved_polls: 0,
        }
    }

    /// Terminal notification for this record, if it has reached a terminal
    /// state.
    pub fn to_update(&self) -> Option<UpdatedJob> {
        if !self.state.is_terminal() {
            return None;
        }
        let exit_code = match self.state {
            JobState::Finished { exit_code } => Some(exit_code),
            _ => None,
        };
        Some(UpdatedJob {
            job_id: self.job_id,
            exit_code,
            state: self.state.clone(),
            walltime: self.walltime,
        })
    }
}

/// Terminal notification handed to the caller exactly once per job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatedJob {
    pub job_id: JobId,
    pub exit_code: Option<i32>,
    pub state: JobState,
    pub walltime: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validate() {
        assert!(ResourceRequest::new(JobId(1), "true").validate().is_ok());
        assert!(ResourceRequest::new(JobId(1), "true").with_cpus(0.5).validate().is_ok());
        assert_eq!(
            ResourceRequest::new(JobId(1), "true").with_cpus(0.0).validate(),
            Err(RequestError::InvalidCpus(0.0))
        );
        assert!(ResourceRequest::new(JobId(1), "true")
            .with_cpus(f64::NAN)
            .validate()
            .is_err());
        assert_eq!(
            ResourceRequest::new(JobId(2), "  ").validate(),
            Err(RequestError::EmptyCommand(JobId(2)))
        );
    }

    #[test]
    fn test_is_terminal() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Finished { exit_code: 0 }.is_terminal());
        assert!(JobState::Failed {
            reason: "gone".to_string()
        }
        .is_terminal());
        assert!(JobState::Killed.is_terminal());
    }

    #[test]
    fn test_to_update() {
        let mut record = JobRecord::new(
            JobId(5),
            SchedulerJobId::new("55.srv"),
            Utf8PathBuf::from("/tmp/w.sh"),
        );
        assert!(record.to_update().is_none());

        record.state = JobState::Finished { exit_code: 3 };
        record.walltime = Some(Duration::from_secs(90));
        let update = record.to_update().unwrap();
        assert_eq!(update.job_id, JobId(5));
        assert_eq!(update.exit_code, Some(3));
        assert_eq!(update.walltime, Some(Duration::from_secs(90)));

        record.state = JobState::Killed;
        assert_eq!(record.to_update().unwrap().exit_code, None);
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&JobState::Finished { exit_code: 2 }).unwrap();
        assert_eq!(json, r#"{"state":"finished","exit_code":2}"#);
    }
}

//! Torque job types.

use qbatch_parsers::base_job_id;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Job identifier assigned by `qsub`, e.g. `12345.torque-server`.
///
/// Treated as an opaque token, except that the numeric part before the
/// first `.` is used for detailed queries and listing matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchedulerJobId(String);

impl SchedulerJobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identifier with any `.server` suffix stripped.
    pub fn base(&self) -> &str {
        base_job_id(&self.0)
    }

    /// Whether an identifier printed by `qstat` refers to this job.
    ///
    /// Listings may print the full identifier or a truncated server suffix,
    /// so the numeric base is compared when the text differs.
    pub fn matches(&self, listed: &str) -> bool {
        let listed = listed.trim();
        listed == self.0 || base_job_id(listed) == self.base()
    }
}

impl fmt::Display for SchedulerJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Torque job status, from the single-letter `S` column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TorqueJobState {
    /// Q - queued, eligible to run
    Queued,
    /// R - running
    Running,
    /// E - exiting after having run
    Exiting,
    /// C - completed (kept visible by `keep_completed`)
    Completed,
    /// H - held
    Held,
    /// W - waiting for its execution time
    Waiting,
    /// S - suspended
    Suspended,
    /// T - being moved to a new location
    Transit,
    /// B - array job with running subjobs
    Begun,
    /// F - finished (PBS Pro history, shown with -x)
    Finished,
    /// X - expired or deleted subjob (PBS Pro)
    Expired,
    /// Anything else
    Unknown(String),
}

impl TorqueJobState {
    pub fn from_code(code: &str) -> Self {
        match code {
            "Q" => Self::Queued,
            "R" => Self::Running,
            "E" => Self::Exiting,
            "C" => Self::Completed,
            "H" => Self::Held,
            "W" => Self::Waiting,
            "S" => Self::Suspended,
            "T" => Self::Transit,
            "B" => Self::Begun,
            "F" => Self::Finished,
            "X" => Self::Expired,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// One row of `qstat -x` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRow {
    /// Job identifier as printed (possibly truncated)
    pub job_id: String,

    /// Job name
    pub name: String,

    /// Owner
    pub user: String,

    /// Elapsed walltime field, unparsed
    pub walltime: String,

    /// Job state
    pub state: TorqueJobState,

    /// Queue
    pub queue: Option<String>,
}

/// Resources requested for one submission.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JobResources {
    /// Requested CPUs; fractional requests are rounded up.
    pub cpus: Option<f64>,

    /// Requested memory in bytes.
    pub memory_bytes: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_job_id_base() {
        let id = SchedulerJobId::new("12345.torque-server");
        assert_eq!(id.base(), "12345");
        assert_eq!(id.to_string(), "12345.torque-server");
    }

    #[test]
    fn test_scheduler_job_id_matches() {
        let id = SchedulerJobId::new("12345.torque-server.example.org");
        assert!(id.matches("12345.torque-server.example.org"));
        assert!(id.matches("12345.torque-se"));
        assert!(id.matches("12345"));
        assert!(!id.matches("123456.torque-server"));
        assert!(!id.matches("1234.torque-server"));
    }

    #[test]
    fn test_from_code() {
        assert_eq!(TorqueJobState::from_code("R"), TorqueJobState::Running);
        assert_eq!(TorqueJobState::from_code("Q"), TorqueJobState::Queued);
        assert_eq!(TorqueJobState::from_code("C"), TorqueJobState::Completed);
        assert_eq!(
            TorqueJobState::from_code("Z"),
            TorqueJobState::Unknown("Z".to_string())
        );
    }
}

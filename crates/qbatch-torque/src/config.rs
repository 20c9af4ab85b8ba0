//! Torque adapter configuration.

use camino::Utf8PathBuf;
use std::collections::BTreeMap;
use std::fmt::Display;

/// Prefix of every job name handed to `qsub -N`.
pub const JOB_NAME_PREFIX: &str = "qbatch_job_";

/// Variables always forwarded by name with `qsub -v`.
pub const FORWARDED_VARIABLES: [&str; 2] = ["PATH", "PROJECT"];

/// How the scheduler's stdout/stderr log files are named.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LogNaming {
    /// `qbatch_job_<id>.out.log` / `qbatch_job_<id>.err.log` in the job's
    /// working directory.
    #[default]
    PerJob,
    /// Fixed names shared by every job; concurrent jobs overwrite each
    /// other's logs.
    Shared { stdout: String, stderr: String },
}

impl LogNaming {
    /// Log file names (stdout, stderr) for the given job name.
    pub fn files(&self, job_name: &str) -> (String, String) {
        match self {
            Self::PerJob => (
                format!("{}.out.log", job_name),
                format!("{}.err.log", job_name),
            ),
            Self::Shared { stdout, stderr } => (stdout.clone(), stderr.clone()),
        }
    }
}

/// Configuration for the Torque adapter.
#[derive(Debug, Clone)]
pub struct TorqueConfig {
    /// Submission executable.
    pub qsub: String,
    /// Status executable.
    pub qstat: String,
    /// Cancellation executable.
    pub qdel: String,
    /// Queue written into the wrapper's `#PBS -q` directive.
    pub queue: Option<String>,
    /// Directory for generated wrapper scripts (system temp dir if unset).
    pub script_dir: Option<Utf8PathBuf>,
    /// Keep wrapper scripts after a job's result has been delivered.
    pub keep_scripts: bool,
    /// Log file naming.
    pub log_naming: LogNaming,
    /// Extra variables forwarded as `KEY=value`. A `None` value forwards the
    /// current process's value for that key.
    pub environment: BTreeMap<String, Option<String>>,
}

impl Default for TorqueConfig {
    fn default() -> Self {
        Self {
            qsub: "qsub".to_string(),
            qstat: "qstat".to_string(),
            qdel: "qdel".to_string(),
            queue: None,
            script_dir: None,
            keep_scripts: false,
            log_naming: LogNaming::default(),
            environment: BTreeMap::new(),
        }
    }
}

impl TorqueConfig {
    /// Deterministic `qsub -N` name for an internal job identifier.
    pub fn job_name(&self, job_id: impl Display) -> String {
        format!("{}{}", JOB_NAME_PREFIX, job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_name() {
        let config = TorqueConfig::default();
        assert_eq!(config.job_name(42), "qbatch_job_42");
    }

    #[test]
    fn test_log_naming() {
        assert_eq!(
            LogNaming::PerJob.files("qbatch_job_7"),
            (
                "qbatch_job_7.out.log".to_string(),
                "qbatch_job_7.err.log".to_string()
            )
        );

        let shared = LogNaming::Shared {
            stdout: "out.log".to_string(),
            stderr: "err.log".to_string(),
        };
        assert_eq!(
            shared.files("qbatch_job_7"),
            ("out.log".to_string(), "err.log".to_string())
        );
    }
}

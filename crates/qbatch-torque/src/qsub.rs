//! Submit jobs via qsub.

use crate::config::{TorqueConfig, FORWARDED_VARIABLES};
use crate::types::{JobResources, SchedulerJobId};
use crate::wrapper::{write_wrapper, WrapperDirectives, WrapperError};
use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::Lazy;
use qbatch_parsers::{format_memory_kb, run_command, shell_quote};
use regex::Regex;
use thiserror::Error;
use tokio::process::Command;

/// Job identifiers printed by qsub: a sequence number, optionally followed
/// by the server name (`12345`, `12345.torque-server.example.org`).
static JOB_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d+(\.[A-Za-z0-9_.-]+)?$").expect("job id pattern is valid")
});

#[derive(Error, Debug)]
pub enum QsubError {
    #[error("Failed to execute qsub: {0}")]
    ExecutionError(String),
    #[error("qsub printed no job identifier")]
    EmptyOutput,
    #[error("Unexpected qsub output: {0}")]
    ParseError(String),
}

/// A prepared submission: qsub arguments plus the wrapper they reference.
#[derive(Debug, Clone)]
pub struct Submission {
    pub args: Vec<String>,
    pub script: Utf8PathBuf,
}

/// Build the qsub argument list (without executable and script path).
///
/// `lookup_env` supplies the current process's value for forwarded
/// variables whose configured value is unset.
pub fn build_qsub_args(
    job_name: &str,
    resources: &JobResources,
    config: &TorqueConfig,
    lookup_env: impl Fn(&str) -> Option<String>,
) -> Vec<String> {
    let (stdout_log, stderr_log) = config.log_naming.files(job_name);

    let mut args = vec![
        "-N".to_string(),
        job_name.to_string(),
        "-j".to_string(),
        "oe".to_string(),
        "-e".to_string(),
        stderr_log,
        "-o".to_string(),
        stdout_log,
    ];

    for name in FORWARDED_VARIABLES {
        args.push("-v".to_string());
        args.push(name.to_string());
    }

    for (key, value) in &config.environment {
        let value = match value {
            Some(v) => v.clone(),
            None => lookup_env(key).unwrap_or_default(),
        };
        args.push("-v".to_string());
        args.push(format!("{}={}", key, shell_quote(&value)));
    }

    if let Some(bytes) = resources.memory_bytes {
        args.push("-l".to_string());
        args.push(format!("mem={}", format_memory_kb(bytes)));
    }

    if let Some(cpus) = resources.cpus {
        let whole = cpus.ceil();
        if whole > 1.0 {
            args.push("-l".to_string());
            args.push(format!("ncpus={}", whole as u64));
        }
    }

    args
}

/// Build the argument list and write the wrapper script for a command.
pub fn prepare_submission(
    job_name: &str,
    command: &str,
    resources: &JobResources,
    config: &TorqueConfig,
) -> Result<Submission, WrapperError> {
    let args = build_qsub_args(job_name, resources, config, |key| std::env::var(key).ok());
    let (stdout_log, stderr_log) = config.log_naming.files(job_name);
    let directives = WrapperDirectives {
        queue: config.queue.clone(),
        stdout_log,
        stderr_log,
    };
    let script = write_wrapper(config.script_dir.as_deref(), command, &directives)?;
    Ok(Submission { args, script })
}

/// Parse qsub output to extract the job identifier.
pub fn parse_qsub_output(output: &str) -> Result<SchedulerJobId, QsubError> {
    let line = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or(QsubError::EmptyOutput)?;

    if JOB_ID_RE.is_match(line) {
        Ok(SchedulerJobId::new(line))
    } else {
        Err(QsubError::ParseError(line.to_string()))
    }
}

/// Run qsub with the given arguments and wrapper script.
pub async fn submit_job(
    config: &TorqueConfig,
    args: &[String],
    script: &Utf8Path,
) -> Result<SchedulerJobId, QsubError> {
    let mut cmd = Command::new(&config.qsub);
    cmd.args(args).arg(script.as_str());

    let stdout = run_command(&mut cmd, "qsub")
        .await
        .map_err(|e| QsubError::ExecutionError(e.to_string()))?;

    parse_qsub_output(&stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn flag_values<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
        args.windows(2)
            .filter(|w| w[0] == flag)
            .map(|w| w[1].as_str())
            .collect()
    }

    #[test]
    fn test_build_qsub_args_minimal() {
        let config = TorqueConfig::default();
        let args = build_qsub_args("qbatch_job_3", &JobResources::default(), &config, no_env);
        assert_eq!(
            args,
            vec![
                "-N",
                "qbatch_job_3",
                "-j",
                "oe",
                "-e",
                "qbatch_job_3.err.log",
                "-o",
                "qbatch_job_3.out.log",
                "-v",
                "PATH",
                "-v",
                "PROJECT",
            ]
        );
    }

    #[test]
    fn test_build_qsub_args_memory() {
        let config = TorqueConfig::default();
        let resources = JobResources {
            cpus: None,
            memory_bytes: Some(2_097_152),
        };
        let args = build_qsub_args("j", &resources, &config, no_env);
        assert_eq!(flag_values(&args, "-l"), vec!["mem=2048K"]);

        let resources = JobResources {
            cpus: None,
            memory_bytes: Some(1500),
        };
        let args = build_qsub_args("j", &resources, &config, no_env);
        assert_eq!(flag_values(&args, "-l"), vec!["mem=1K"]);
    }

    #[test]
    fn test_build_qsub_args_cpus() {
        let config = TorqueConfig::default();
        let limits = |cpus: Option<f64>| {
            let resources = JobResources {
                cpus,
                memory_bytes: None,
            };
            let args = build_qsub_args("j", &resources, &config, no_env);
            flag_values(&args, "-l")
                .into_iter()
                .map(str::to_string)
                .collect::<Vec<_>>()
        };

        assert!(limits(None).is_empty());
        assert!(limits(Some(0.5)).is_empty());
        assert!(limits(Some(1.0)).is_empty());
        assert_eq!(limits(Some(1.01)), vec!["ncpus=2"]);
        assert_eq!(limits(Some(2.3)), vec!["ncpus=3"]);
        assert_eq!(limits(Some(4.0)), vec!["ncpus=4"]);
    }

    #[test]
    fn test_build_qsub_args_memory_then_cpus() {
        let config = TorqueConfig::default();
        let resources = JobResources {
            cpus: Some(8.0),
            memory_bytes: Some(4 * 1024 * 1024 * 1024),
        };
        let args = build_qsub_args("j", &resources, &config, no_env);
        assert_eq!(flag_values(&args, "-l"), vec!["mem=4194304K", "ncpus=8"]);
    }

    #[test]
    fn test_build_qsub_args_environment() {
        let mut environment = BTreeMap::new();
        environment.insert("TOIL_HOME".to_string(), Some("/shared/toil".to_string()));
        environment.insert("GREETING".to_string(), Some("hello world".to_string()));
        environment.insert("FROM_PROCESS".to_string(), None);
        environment.insert("MISSING".to_string(), None);
        let config = TorqueConfig {
            environment,
            ..TorqueConfig::default()
        };

        let lookup = |key: &str| match key {
            "FROM_PROCESS" => Some("it's here".to_string()),
            _ => None,
        };
        let args = build_qsub_args("j", &JobResources::default(), &config, lookup);
        assert_eq!(
            flag_values(&args, "-v"),
            vec![
                "PATH",
                "PROJECT",
                "FROM_PROCESS='it'\"'\"'s here'",
                "GREETING='hello world'",
                "MISSING=''",
                "TOIL_HOME=/shared/toil",
            ]
        );
    }

    #[test]
    fn test_build_qsub_args_shared_logs() {
        let config = TorqueConfig {
            log_naming: crate::config::LogNaming::Shared {
                stdout: "cwltoil_pbspro_out.log".to_string(),
                stderr: "cwltoil_pbspro_err.log".to_string(),
            },
            ..TorqueConfig::default()
        };
        let args = build_qsub_args("j", &JobResources::default(), &config, no_env);
        assert_eq!(flag_values(&args, "-e"), vec!["cwltoil_pbspro_err.log"]);
        assert_eq!(flag_values(&args, "-o"), vec!["cwltoil_pbspro_out.log"]);
    }

    #[test]
    fn test_parse_qsub_output() {
        assert_eq!(
            parse_qsub_output("12345.torque-server\n").unwrap(),
            SchedulerJobId::new("12345.torque-server")
        );
        assert_eq!(
            parse_qsub_output("\n  678\n").unwrap(),
            SchedulerJobId::new("678")
        );
        assert!(matches!(
            parse_qsub_output("  \n"),
            Err(QsubError::EmptyOutput)
        ));
        assert!(matches!(
            parse_qsub_output("qsub: submit error"),
            Err(QsubError::ParseError(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_job_appends_script() {
        let config = TorqueConfig {
            qsub: "echo".to_string(),
            ..TorqueConfig::default()
        };
        // `echo` prints its arguments, so the last word is the script path.
        let result = submit_job(&config, &[], Utf8Path::new("/tmp/x.sh")).await;
        assert!(matches!(result, Err(QsubError::ParseError(ref s)) if s == "/tmp/x.sh"));
    }

    #[tokio::test]
    async fn test_submit_job_failure() {
        let config = TorqueConfig {
            qsub: "false".to_string(),
            ..TorqueConfig::default()
        };
        let result = submit_job(&config, &[], Utf8Path::new("/tmp/x.sh")).await;
        assert!(matches!(result, Err(QsubError::ExecutionError(_))));
    }
}

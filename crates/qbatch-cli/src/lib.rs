//! CLI argument parsing for qbatch.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use qbatch_parsers::{parse_memory_bytes, shell_quote};
use qbatch_torque::{LogNaming, TorqueConfig};
use std::collections::BTreeMap;

#[derive(Parser, Debug)]
#[command(name = "qbatch")]
#[command(about = "Run commands on a PBS/Torque cluster")]
pub struct Args {
    /// Log debug output (commands run, parsed qstat rows)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Submission executable
    #[arg(long, global = true, default_value = "qsub")]
    pub qsub: String,

    /// Status executable
    #[arg(long, global = true, default_value = "qstat")]
    pub qstat: String,

    /// Cancellation executable
    #[arg(long, global = true, default_value = "qdel")]
    pub qdel: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit one command, wait for it and exit with its exit code
    Run(RunArgs),
    /// Print the qstat listing as JSON
    Status,
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Internal job identifier
    #[arg(long, default_value = "1")]
    pub job_id: u64,

    /// CPUs to request (fractions round up)
    #[arg(long)]
    pub cpus: Option<f64>,

    /// Memory to request, in bytes or with a K/M/G/T suffix
    #[arg(long, value_parser = parse_memory)]
    pub memory: Option<u64>,

    /// Extra variable to forward, as KEY=VALUE or KEY (current value)
    #[arg(long = "env", value_name = "KEY[=VALUE]", value_parser = parse_env)]
    pub env: Vec<(String, Option<String>)>,

    /// Queue for the #PBS -q directive
    #[arg(long)]
    pub queue: Option<String>,

    /// Directory for generated wrapper scripts
    #[arg(long)]
    pub script_dir: Option<Utf8PathBuf>,

    /// Keep the wrapper script after the job ends
    #[arg(long)]
    pub keep_scripts: bool,

    /// Write logs to the shared torque_job.out.log / torque_job.err.log
    #[arg(long)]
    pub shared_logs: bool,

    /// qstat poll interval in seconds
    #[arg(long, default_value = "10")]
    pub poll_interval: u64,

    /// Polls a job may be missing from qstat before it counts as failed (0 = never)
    #[arg(long, default_value = "30")]
    pub give_up_after: u32,

    /// Command to run on the cluster
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

fn parse_memory(s: &str) -> Result<u64, String> {
    parse_memory_bytes(s).ok_or_else(|| format!("invalid memory size {:?}", s))
}

/// Parse `KEY=VALUE` or a bare `KEY`.
fn parse_env(s: &str) -> Result<(String, Option<String>), String> {
    let (key, value) = match s.split_once('=') {
        Some((key, value)) => (key, Some(value.to_string())),
        None => (s, None),
    };
    if key.is_empty() {
        return Err(format!("missing variable name in {:?}", s));
    }
    Ok((key.to_string(), value))
}

impl Args {
    /// Adapter configuration for the `status` subcommand.
    pub fn torque_config(&self) -> TorqueConfig {
        TorqueConfig {
            qsub: self.qsub.clone(),
            qstat: self.qstat.clone(),
            qdel: self.qdel.clone(),
            ..TorqueConfig::default()
        }
    }
}

impl RunArgs {
    /// Adapter configuration for a `run`, on top of the global executables.
    pub fn torque_config(&self, base: TorqueConfig) -> TorqueConfig {
        let log_naming = if self.shared_logs {
            LogNaming::Shared {
                stdout: "torque_job.out.log".to_string(),
                stderr: "torque_job.err.log".to_string(),
            }
        } else {
            LogNaming::PerJob
        };

        TorqueConfig {
            queue: self.queue.clone(),
            script_dir: self.script_dir.clone(),
            keep_scripts: self.keep_scripts,
            log_naming,
            environment: self.environment(),
            ..base
        }
    }

    /// Forwarded variables; a later `--env` for the same key wins.
    pub fn environment(&self) -> BTreeMap<String, Option<String>> {
        self.env.iter().cloned().collect()
    }

    /// The command line handed to the wrapper script, each argument quoted
    /// so the shell sees the same words.
    pub fn command_line(&self) -> String {
        self.command
            .iter()
            .map(|arg| shell_quote(arg))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_parse_env() {
        assert_eq!(
            parse_env("FOO=bar=baz"),
            Ok(("FOO".to_string(), Some("bar=baz".to_string())))
        );
        assert_eq!(parse_env("HOME"), Ok(("HOME".to_string(), None)));
        assert_eq!(parse_env("EMPTY="), Ok(("EMPTY".to_string(), Some(String::new()))));
        assert!(parse_env("=x").is_err());
    }

    #[test]
    fn test_run_args() {
        let args = parse(&[
            "qbatch",
            "--qsub",
            "/opt/pbs/bin/qsub",
            "run",
            "--cpus",
            "2.5",
            "--memory",
            "4G",
            "--env",
            "A=1",
            "--env",
            "B",
            "--env",
            "A=2",
            "--queue",
            "long",
            "--",
            "python",
            "-c",
            "print(1)",
        ]);
        let Command::Run(run) = &args.command else {
            panic!("expected run");
        };
        assert_eq!(run.cpus, Some(2.5));
        assert_eq!(run.memory, Some(4 * 1024 * 1024 * 1024));
        assert_eq!(run.command_line(), "python -c 'print(1)'");

        let config = run.torque_config(args.torque_config());
        assert_eq!(config.qsub, "/opt/pbs/bin/qsub");
        assert_eq!(config.qstat, "qstat");
        assert_eq!(config.queue.as_deref(), Some("long"));
        assert_eq!(config.log_naming, LogNaming::PerJob);
        assert_eq!(config.environment.get("A"), Some(&Some("2".to_string())));
        assert_eq!(config.environment.get("B"), Some(&None));
    }

    #[test]
    fn test_command_line_keeps_argument_boundaries() {
        let args = parse(&["qbatch", "run", "--", "sh", "-c", "echo a; exit 3"]);
        let Command::Run(run) = &args.command else {
            panic!("expected run");
        };
        assert_eq!(run.command_line(), "sh -c 'echo a; exit 3'");

        let args = parse(&["qbatch", "run", "echo", "it's", ""]);
        let Command::Run(run) = &args.command else {
            panic!("expected run");
        };
        assert_eq!(run.command_line(), "echo 'it'\"'\"'s' ''");
    }

    #[test]
    fn test_shared_logs() {
        let args = parse(&["qbatch", "run", "--shared-logs", "true"]);
        let Command::Run(run) = &args.command else {
            panic!("expected run");
        };
        let config = run.torque_config(TorqueConfig::default());
        assert_eq!(
            config.log_naming.files("qbatch_job_1"),
            (
                "torque_job.out.log".to_string(),
                "torque_job.err.log".to_string()
            )
        );
    }

    #[test]
    fn test_rejects_bad_memory() {
        assert!(Args::try_parse_from(["qbatch", "run", "--memory", "lots", "true"]).is_err());
    }

    #[test]
    fn test_run_requires_command() {
        assert!(Args::try_parse_from(["qbatch", "run"]).is_err());
    }

    #[test]
    fn test_status() {
        let args = parse(&["qbatch", "-v", "status"]);
        assert!(args.verbose);
        assert!(matches!(args.command, Command::Status));
    }
}

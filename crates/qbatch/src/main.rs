//! qbatch - run commands on a PBS/Torque cluster.

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use qbatch::{JobId, JobState, PollingConfig, ResourceRequest, TorqueBatchSystem, TorqueConfig};
use qbatch_cli::{Args, Command, RunArgs};
use qbatch_parsers::format_duration;
use std::process::ExitCode;
use std::time::Duration;

/// How long each wait for a result lasts before walltime is reported.
const REPORT_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let torque = args.torque_config();
    match &args.command {
        Command::Run(run_args) => run(run_args, torque).await,
        Command::Status => status(&torque).await,
    }
}

async fn run(args: &RunArgs, base: TorqueConfig) -> Result<ExitCode> {
    let torque = args.torque_config(base);
    let polling = PollingConfig {
        poll_interval: Duration::from_secs(args.poll_interval.max(1)),
        give_up_after: args.give_up_after,
        ..PollingConfig::default()
    };

    let job_id = JobId(args.job_id);
    let mut request = ResourceRequest::new(job_id, args.command_line());
    if let Some(cpus) = args.cpus {
        request = request.with_cpus(cpus);
    }
    if let Some(memory) = args.memory {
        request = request.with_memory_bytes(memory);
    }

    let batch = TorqueBatchSystem::new(torque, polling);
    let scheduler_id = batch.issue_job(request).await.into_diagnostic()?;
    eprintln!("Submitted {} as {}", job_id, scheduler_id);

    let update = loop {
        tokio::select! {
            update = batch.get_updated_job(REPORT_INTERVAL) => {
                match update.into_diagnostic()? {
                    Some(update) => break update,
                    None => {
                        let running = batch.get_running_jobs().await.into_diagnostic()?;
                        match running.get(&job_id) {
                            Some(walltime) => {
                                eprintln!("{} running for {}", scheduler_id, format_duration(*walltime));
                            }
                            None => eprintln!("{} waiting", scheduler_id),
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Interrupted, killing {}", scheduler_id);
                batch.kill_job(job_id).await.into_diagnostic()?;
            }
        }
    };

    batch.shutdown().await.into_diagnostic()?;

    if let Some(walltime) = update.walltime {
        eprintln!("Walltime {}", format_duration(walltime));
    }
    let code = match &update.state {
        JobState::Finished { exit_code } => {
            eprintln!("{} finished with exit code {}", scheduler_id, exit_code);
            u8::try_from(*exit_code).unwrap_or(1)
        }
        JobState::Failed { reason } => {
            eprintln!("{} failed: {}", scheduler_id, reason);
            1
        }
        JobState::Killed => {
            eprintln!("{} killed", scheduler_id);
            130
        }
        state => {
            eprintln!("{} ended in unexpected state {:?}", scheduler_id, state);
            1
        }
    };
    Ok(ExitCode::from(code))
}

async fn status(torque: &TorqueConfig) -> Result<ExitCode> {
    let rows = qbatch_torque::query_listing(torque).await.into_diagnostic()?;
    let json = serde_json::to_string_pretty(&rows).into_diagnostic()?;
    println!("{}", json);
    Ok(ExitCode::SUCCESS)
}

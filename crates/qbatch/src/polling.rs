//! Background poller for Torque job status.
//!
//! The poller task owns the [`JobTable`]. Submissions, kills and result
//! retrieval reach it through a request channel, and status cycles run as
//! separate tasks so the table stays responsive while qstat is running.
//! Terminal results leave through a bounded channel.

use camino::Utf8PathBuf;
use qbatch_parsers::parse_walltime;
use qbatch_state::{JobId, JobRecord, JobState, JobTable, LookupError, MapperError, UpdatedJob};
use qbatch_torque::{
    query_exit_status, query_listing, remove_wrapper, ListingRow, SchedulerJobId, TorqueConfig,
    TorqueJobState,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Configuration for the polling service.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Interval between status cycles.
    pub poll_interval: Duration,
    /// Consecutive cycles a job may be missing from the listing without an
    /// exit code before it is reported as failed. Zero waits forever.
    pub give_up_after: u32,
    /// Capacity of the terminal result queue.
    pub queue_capacity: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            give_up_after: 30,
            queue_capacity: 256,
        }
    }
}

/// Requests handled by the poller task.
pub(crate) enum Request {
    Reserve {
        job_id: JobId,
        reply: oneshot::Sender<Result<(), MapperError>>,
    },
    Record {
        job_id: JobId,
        scheduler_id: SchedulerJobId,
        wrapper: Utf8PathBuf,
        reply: oneshot::Sender<Result<(), MapperError>>,
    },
    Release {
        job_id: JobId,
    },
    Resolve {
        job_id: JobId,
        reply: oneshot::Sender<Result<(SchedulerJobId, JobState), LookupError>>,
    },
    MarkKilled {
        job_id: JobId,
        reply: oneshot::Sender<bool>,
    },
    Forget {
        job_id: JobId,
    },
    Running {
        reply: oneshot::Sender<HashMap<JobId, Duration>>,
    },
    Issued {
        reply: oneshot::Sender<Vec<JobId>>,
    },
    Records {
        reply: oneshot::Sender<Vec<JobRecord>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// What one status cycle learned about the jobs it was given.
///
/// Entries carry the scheduler id that was queried so results for a job
/// that was forgotten (and its internal id reused) mid-cycle are dropped.
#[derive(Debug, Default)]
pub(crate) struct CycleReport {
    /// The listing query ran; absence from it means something.
    pub listing_ok: bool,
    /// Jobs present in the listing, in any state.
    pub listed: Vec<(JobId, SchedulerJobId)>,
    /// Jobs in state R, with their walltime.
    pub running: Vec<(JobId, SchedulerJobId, Duration)>,
    /// Jobs whose exit code was found.
    pub exit_codes: Vec<(JobId, SchedulerJobId, i32)>,
    /// Jobs neither listed nor reporting an exit code.
    pub unresolved: Vec<(JobId, SchedulerJobId)>,
}

/// Match listing rows against the polled jobs.
///
/// Returns the jobs present in the listing and, for those in state R, the
/// parsed walltime. Rows with an unparseable walltime count as listed but
/// are not reported running this cycle.
pub(crate) fn match_listing(
    rows: &[ListingRow],
    polled: &[(JobId, SchedulerJobId)],
) -> (
    Vec<(JobId, SchedulerJobId)>,
    Vec<(JobId, SchedulerJobId, Duration)>,
) {
    let mut listed = Vec::new();
    let mut running = Vec::new();

    for (job_id, scheduler_id) in polled {
        let Some(row) = rows.iter().find(|row| scheduler_id.matches(&row.job_id)) else {
            continue;
        };
        tracing::debug!(job_id = %job_id, state = ?row.state, "qstat listing row");
        listed.push((*job_id, scheduler_id.clone()));

        if row.state != TorqueJobState::Running {
            continue;
        }
        match parse_walltime(&row.walltime) {
            Ok(walltime) => running.push((*job_id, scheduler_id.clone(), walltime)),
            Err(e) => tracing::debug!(job_id = %job_id, "skipping running row: {}", e),
        }
    }

    (listed, running)
}

/// Run one status cycle: the listing query once, then the exit status
/// query for every polled job.
pub(crate) async fn run_cycle(
    torque: Arc<TorqueConfig>,
    polled: Vec<(JobId, SchedulerJobId)>,
) -> CycleReport {
    let mut report = CycleReport::default();

    match query_listing(&torque).await {
        Ok(rows) => {
            let (listed, running) = match_listing(&rows, &polled);
            report.listing_ok = true;
            report.listed = listed;
            report.running = running;
        }
        Err(e) => tracing::warn!("Error polling qstat: {}", e),
    }

    let listed: HashSet<JobId> = report.listed.iter().map(|(id, _)| *id).collect();

    for (job_id, scheduler_id) in polled {
        match query_exit_status(&torque, &scheduler_id).await {
            Ok(Some(code)) => report.exit_codes.push((job_id, scheduler_id, code)),
            Ok(None) if !listed.contains(&job_id) => report.unresolved.push((job_id, scheduler_id)),
            Ok(None) => {}
            Err(e) => tracing::warn!(job_id = %job_id, "Error querying exit status: {}", e),
        }
    }

    report
}

/// The poller task.
pub(crate) struct Poller {
    table: JobTable,
    config: PollingConfig,
    torque: Arc<TorqueConfig>,
    requests: mpsc::Receiver<Request>,
    updates: mpsc::Sender<UpdatedJob>,
    pending: VecDeque<UpdatedJob>,
}

impl Poller {
    pub(crate) fn new(
        config: PollingConfig,
        torque: Arc<TorqueConfig>,
        requests: mpsc::Receiver<Request>,
        updates: mpsc::Sender<UpdatedJob>,
    ) -> Self {
        Self {
            table: JobTable::new(),
            config,
            torque,
            requests,
            updates,
            pending: VecDeque::new(),
        }
    }

    /// Main polling loop. Ends on shutdown or when every handle is gone.
    pub(crate) async fn run(mut self) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip the first tick (fires immediately)
        ticker.tick().await;

        let mut cycle: Option<JoinHandle<CycleReport>> = None;
        let updates = self.updates.clone();

        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(Request::Shutdown { reply }) => {
                        let _ = reply.send(());
                        break;
                    }
                    Some(request) => self.handle(request),
                    None => break,
                },
                _ = ticker.tick(), if cycle.is_none() => {
                    let polled = self.table.polled();
                    if !polled.is_empty() {
                        tracing::debug!(jobs = polled.len(), "starting status cycle");
                        cycle = Some(tokio::spawn(run_cycle(self.torque.clone(), polled)));
                    }
                }
                report = async {
                    match cycle.as_mut() {
                        Some(handle) => handle.await,
                        None => std::future::pending().await,
                    }
                }, if cycle.is_some() => {
                    cycle = None;
                    match report {
                        Ok(report) => self.apply(report),
                        Err(e) => tracing::error!("Status cycle panicked: {}", e),
                    }
                }
                permit = updates.reserve(), if !self.pending.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(update) = self.pending.pop_front() {
                            permit.send(update);
                        }
                    }
                    Err(_) => {
                        tracing::debug!("result receiver dropped, discarding pending results");
                        self.pending.clear();
                    }
                },
            }
        }

        if let Some(handle) = cycle {
            handle.abort();
        }
        tracing::debug!(tracked = self.table.len(), "poller stopped");
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::Reserve { job_id, reply } => {
                let _ = reply.send(self.table.reserve(job_id));
            }
            Request::Record {
                job_id,
                scheduler_id,
                wrapper,
                reply,
            } => {
                let _ = reply.send(self.table.record(job_id, scheduler_id, wrapper));
            }
            Request::Release { job_id } => {
                self.table.release(job_id);
            }
            Request::Resolve { job_id, reply } => {
                let resolved = self
                    .table
                    .resolve_internal(job_id)
                    .cloned()
                    .and_then(|scheduler_id| Ok((scheduler_id, self.table.state(job_id)?.clone())));
                let _ = reply.send(resolved);
            }
            Request::MarkKilled { job_id, reply } => {
                let killed = match self.table.kill(job_id) {
                    Some(update) => {
                        tracing::info!(job_id = %job_id, "job killed");
                        self.pending.push_back(update);
                        true
                    }
                    None => false,
                };
                let _ = reply.send(killed);
            }
            Request::Forget { job_id } => {
                if let Some(record) = self.table.forget(job_id) {
                    tracing::debug!(job_id = %job_id, scheduler_id = %record.scheduler_id, "forgot job");
                    if !self.torque.keep_scripts {
                        if let Err(e) = remove_wrapper(&record.wrapper) {
                            tracing::warn!(path = %record.wrapper, "Failed to remove wrapper: {}", e);
                        }
                    }
                }
            }
            Request::Running { reply } => {
                let _ = reply.send(self.table.running());
            }
            Request::Issued { reply } => {
                let _ = reply.send(self.table.issued());
            }
            Request::Records { reply } => {
                let mut records: Vec<JobRecord> = self
                    .table
                    .issued()
                    .into_iter()
                    .filter_map(|id| self.table.get(id).cloned())
                    .collect();
                records.sort_by_key(|r| r.job_id);
                let _ = reply.send(records);
            }
            Request::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    /// Whether a report entry still refers to the job currently tracked
    /// under that internal id.
    fn current(&self, job_id: JobId, scheduler_id: &SchedulerJobId) -> bool {
        self.table.resolve_scheduler(scheduler_id) == Ok(job_id)
    }

    fn apply(&mut self, report: CycleReport) {
        if report.listing_ok {
            let running: HashSet<JobId> = report
                .running
                .iter()
                .filter(|(job_id, scheduler_id, _)| self.current(*job_id, scheduler_id))
                .map(|(job_id, _, _)| *job_id)
                .collect();
            self.table.retain_running(&running);
        }

        for (job_id, scheduler_id, walltime) in report.running {
            if self.current(job_id, &scheduler_id) && self.table.mark_running(job_id, walltime) {
                tracing::info!(job_id = %job_id, scheduler_id = %scheduler_id, "job running");
            }
        }

        for (job_id, scheduler_id) in report.listed {
            if self.current(job_id, &scheduler_id) {
                self.table.reset_unresolved(job_id);
            }
        }

        for (job_id, scheduler_id, exit_code) in report.exit_codes {
            if !self.current(job_id, &scheduler_id) {
                continue;
            }
            if let Some(update) = self.table.finish(job_id, exit_code) {
                tracing::info!(job_id = %job_id, scheduler_id = %scheduler_id, exit_code, "job finished");
                self.pending.push_back(update);
            }
        }

        if !report.listing_ok {
            return;
        }

        for (job_id, scheduler_id) in report.unresolved {
            if !self.current(job_id, &scheduler_id) {
                continue;
            }
            let misses = self.table.note_unresolved(job_id);
            if self.config.give_up_after == 0 || misses < self.config.give_up_after {
                continue;
            }
            let reason = format!(
                "{} left the qstat listing without an exit status ({} polls)",
                scheduler_id, misses
            );
            if let Some(update) = self.table.fail(job_id, reason) {
                tracing::warn!(job_id = %job_id, scheduler_id = %scheduler_id, "giving up on job");
                self.pending.push_back(update);
            }
        }
    }
}

//! Mapping between internal job identifiers and scheduler identifiers.
//!
//! `JobTable` is owned by a single writer (the poller task). A job enters
//! the table when its submission is reserved, becomes a `JobRecord` once
//! qsub has returned an identifier, and leaves when its terminal state has
//! been delivered to the caller.

use crate::types::{JobId, JobRecord, JobState, UpdatedJob};
use camino::Utf8PathBuf;
use qbatch_torque::SchedulerJobId;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MapperError {
    #[error("Job {0} is already tracked")]
    AlreadyTracked(JobId),
    #[error("Job {0} was not reserved before being recorded")]
    NotReserved(JobId),
    #[error("Scheduler id {0} is already mapped to job {1}")]
    DuplicateSchedulerId(SchedulerJobId, JobId),
}

/// A lookup for an identifier with no mapping.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("No scheduler job is mapped to internal job {0}")]
    Internal(JobId),
    #[error("No internal job is mapped to scheduler job {0}")]
    Scheduler(SchedulerJobId),
}

/// Live jobs, indexed both ways.
#[derive(Debug, Default)]
pub struct JobTable {
    reserved: HashSet<JobId>,
    records: HashMap<JobId, JobRecord>,
    by_scheduler: HashMap<SchedulerJobId, JobId>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an internal id ahead of submission.
    pub fn reserve(&mut self, job_id: JobId) -> Result<(), MapperError> {
        if self.records.contains_key(&job_id) || !self.reserved.insert(job_id) {
            return Err(MapperError::AlreadyTracked(job_id));
        }
        Ok(())
    }

    /// Drop a reservation whose submission failed.
    pub fn release(&mut self, job_id: JobId) -> bool {
        self.reserved.remove(&job_id)
    }

    /// Record the scheduler id returned for a reserved job.
    pub fn record(
        &mut self,
        job_id: JobId,
        scheduler_id: SchedulerJobId,
        wrapper: Utf8PathBuf,
    ) -> Result<(), MapperError> {
        if !self.reserved.contains(&job_id) {
            return Err(MapperError::NotReserved(job_id));
        }
        if let Some(&owner) = self.by_scheduler.get(&scheduler_id) {
            return Err(MapperError::DuplicateSchedulerId(scheduler_id, owner));
        }

        self.reserved.remove(&job_id);
        self.by_scheduler.insert(scheduler_id.clone(), job_id);
        self.records
            .insert(job_id, JobRecord::new(job_id, scheduler_id, wrapper));
        Ok(())
    }

    pub fn resolve_scheduler(&self, scheduler_id: &SchedulerJobId) -> Result<JobId, LookupError> {
        self.by_scheduler
            .get(scheduler_id)
            .copied()
            .ok_or_else(|| LookupError::Scheduler(scheduler_id.clone()))
    }

    pub fn resolve_internal(&self, job_id: JobId) -> Result<&SchedulerJobId, LookupError> {
        self.records
            .get(&job_id)
            .map(|r| &r.scheduler_id)
            .ok_or(LookupError::Internal(job_id))
    }

    pub fn state(&self, job_id: JobId) -> Result<&JobState, LookupError> {
        self.records
            .get(&job_id)
            .map(|r| &r.state)
            .ok_or(LookupError::Internal(job_id))
    }

    pub fn get(&self, job_id: JobId) -> Option<&JobRecord> {
        self.records.get(&job_id)
    }

    /// Remove a job after its terminal state was delivered.
    pub fn forget(&mut self, job_id: JobId) -> Option<JobRecord> {
        let record = self.records.remove(&job_id)?;
        self.by_scheduler.remove(&record.scheduler_id);
        Some(record)
    }

    /// Jobs the poller should query: mapped and not yet terminal.
    pub fn polled(&self) -> Vec<(JobId, SchedulerJobId)> {
        let mut jobs: Vec<_> = self
            .records
            .values()
            .filter(|r| !r.state.is_terminal())
            .map(|r| (r.job_id, r.scheduler_id.clone()))
            .collect();
        jobs.sort_by_key(|(id, _)| *id);
        jobs
    }

    /// Every job submitted and not yet forgotten.
    pub fn issued(&self) -> Vec<JobId> {
        let mut ids: Vec<_> = self.records.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Walltime of every job the latest listing showed in state R.
    pub fn running(&self) -> HashMap<JobId, Duration> {
        self.records
            .values()
            .filter(|r| r.listed_running && !r.state.is_terminal())
            .map(|r| (r.job_id, r.walltime.unwrap_or_default()))
            .collect()
    }

    /// Start applying a new listing: only jobs in `running` stay reported
    /// as running. Their walltimes are refreshed by [`Self::mark_running`].
    pub fn retain_running(&mut self, running: &HashSet<JobId>) {
        for record in self.records.values_mut() {
            if !running.contains(&record.job_id) {
                record.listed_running = false;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn live_mut(&mut self, job_id: JobId) -> Option<&mut JobRecord> {
        self.records
            .get_mut(&job_id)
            .filter(|r| !r.state.is_terminal())
    }

    /// Note that the job was seen running with the given walltime.
    ///
    /// Returns true on the `Queued -> Running` transition.
    pub fn mark_running(&mut self, job_id: JobId, walltime: Duration) -> bool {
        let Some(record) = self.live_mut(job_id) else {
            return false;
        };
        record.walltime = Some(walltime);
        record.listed_running = true;
        record.unresolved_polls = 0;
        if record.state == JobState::Queued {
            record.state = JobState::Running;
            true
        } else {
            false
        }
    }

    /// Count one more poll in which the job was missing from the listing
    /// and reported no exit code. Returns the consecutive count.
    pub fn note_unresolved(&mut self, job_id: JobId) -> u32 {
        match self.live_mut(job_id) {
            Some(record) => {
                record.unresolved_polls += 1;
                record.unresolved_polls
            }
            None => 0,
        }
    }

    /// The job showed up in the listing again.
    pub fn reset_unresolved(&mut self, job_id: JobId) {
        if let Some(record) = self.live_mut(job_id) {
            record.unresolved_polls = 0;
        }
    }

    pub fn finish(&mut self, job_id: JobId, exit_code: i32) -> Option<UpdatedJob> {
        let record = self.live_mut(job_id)?;
        record.state = JobState::Finished { exit_code };
        record.to_update()
    }

    pub fn fail(&mut self, job_id: JobId, reason: impl Into<String>) -> Option<UpdatedJob> {
        let record = self.live_mut(job_id)?;
        record.state = JobState::Failed {
            reason: reason.into(),
        };
        record.to_update()
    }

    /// Mark a job killed. `None` if it is unknown or already terminal.
    pub fn kill(&mut self, job_id: JobId) -> Option<UpdatedJob> {
        let record = self.live_mut(job_id)?;
        record.state = JobState::Killed;
        record.to_update()
    }
}

//! The batch system handle.

use crate::error::{BatchError, BatchResult};
use crate::polling::{Poller, PollingConfig, Request};
use qbatch_state::{JobId, JobRecord, ResourceRequest, UpdatedJob};
use qbatch_torque::{
    kill_job, prepare_submission, remove_wrapper, submit_job, SchedulerJobId, TorqueConfig,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span};

/// Capacity of the request channel into the poller.
const REQUEST_CAPACITY: usize = 64;

/// Submits, tracks and kills jobs on a PBS/Torque cluster.
///
/// All tracking state lives in a background poller task; this handle only
/// sends it requests. Must be created inside a tokio runtime.
pub struct TorqueBatchSystem {
    torque: Arc<TorqueConfig>,
    requests: mpsc::Sender<Request>,
    updates: Mutex<mpsc::Receiver<UpdatedJob>>,
    poller: JoinHandle<()>,
    span: Span,
}

impl TorqueBatchSystem {
    /// Start a batch system and its poller.
    pub fn new(torque: TorqueConfig, polling: PollingConfig) -> Self {
        Self::with_span(torque, polling, tracing::info_span!("torque_batch_system"))
    }

    /// Start a batch system whose events are recorded under `span`.
    pub fn with_span(torque: TorqueConfig, polling: PollingConfig, span: Span) -> Self {
        let torque = Arc::new(torque);
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_CAPACITY);
        let (updates_tx, updates_rx) = mpsc::channel(polling.queue_capacity.max(1));

        tracing::info!(
            parent: &span,
            "polling qstat every {} seconds",
            polling.poll_interval.as_secs_f64()
        );

        let poller = Poller::new(polling, torque.clone(), requests_rx, updates_tx);
        let poller = tokio::spawn(poller.run().instrument(span.clone()));

        Self {
            torque,
            requests: requests_tx,
            updates: Mutex::new(updates_rx),
            poller,
            span,
        }
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> BatchResult<T> {
        call(&self.requests, make).await
    }

    /// Submit a job.
    ///
    /// On any failure the job never enters the tracked set and its wrapper
    /// script is removed. The submission runs on its own task, so dropping
    /// this future does not strand a reserved id or a job qsub accepted:
    /// the job is still recorded and reported like any other.
    ///
    /// If qsub returns an identifier that is already mapped to another live
    /// job, the submission fails with [`BatchError::Mapper`] and the new job
    /// is left to the scheduler; deleting it would target the tracked job.
    #[tracing::instrument(parent = &self.span, skip_all, fields(job_id = %request.job_id))]
    pub async fn issue_job(&self, request: ResourceRequest) -> BatchResult<SchedulerJobId> {
        request.validate()?;

        let submission = issue(self.requests.clone(), self.torque.clone(), request);
        tokio::spawn(submission.in_current_span())
            .await
            .map_err(|_| BatchError::Closed)?
    }

    /// Kill a job with qdel.
    ///
    /// Killing a job that already reached a terminal state is a no-op. A
    /// qdel failure leaves the job's tracked state unchanged.
    #[tracing::instrument(parent = &self.span, skip_all, fields(job_id = %job_id))]
    pub async fn kill_job(&self, job_id: JobId) -> BatchResult<()> {
        let (scheduler_id, state) = self
            .call(|reply| Request::Resolve { job_id, reply })
            .await??;

        if state.is_terminal() {
            tracing::debug!(?state, "job already terminal, not killing");
            return Ok(());
        }

        kill_job(&self.torque, &scheduler_id).await?;
        self.call(|reply| Request::MarkKilled { job_id, reply })
            .await?;
        Ok(())
    }

    /// Wait up to `max_wait` for the next terminal result.
    ///
    /// Returns `Ok(None)` on timeout. Each job's result is returned exactly
    /// once, after which the job is no longer tracked. Dropping this future
    /// never loses a result: the request slot for forgetting the job is
    /// taken before a result is received, and nothing awaits in between.
    pub async fn get_updated_job(&self, max_wait: Duration) -> BatchResult<Option<UpdatedJob>> {
        let received = tokio::time::timeout(max_wait, async {
            let mut updates = self.updates.lock().await;
            let forget = self
                .requests
                .reserve()
                .await
                .map_err(|_| BatchError::Closed)?;
            let update = updates.recv().await.ok_or(BatchError::Closed)?;
            forget.send(Request::Forget {
                job_id: update.job_id,
            });
            Ok(update)
        })
        .await;

        match received {
            Err(_elapsed) => Ok(None),
            Ok(update) => update.map(Some),
        }
    }

    /// Walltime of every job last seen running.
    pub async fn get_running_jobs(&self) -> BatchResult<HashMap<JobId, Duration>> {
        self.call(|reply| Request::Running { reply }).await
    }

    /// Every job submitted whose result has not been retrieved yet.
    pub async fn get_issued_jobs(&self) -> BatchResult<Vec<JobId>> {
        self.call(|reply| Request::Issued { reply }).await
    }

    /// Snapshot of every tracked job.
    pub async fn records(&self) -> BatchResult<Vec<JobRecord>> {
        self.call(|reply| Request::Records { reply }).await
    }

    /// Scheduler id of a tracked job.
    pub async fn scheduler_id(&self, job_id: JobId) -> BatchResult<SchedulerJobId> {
        let (scheduler_id, _) = self
            .call(|reply| Request::Resolve { job_id, reply })
            .await??;
        Ok(scheduler_id)
    }

    /// Stop the poller and wait for it to exit.
    pub async fn shutdown(self) -> BatchResult<()> {
        // The poller may already be gone; joining below covers both cases.
        let _ = self.call(|reply| Request::Shutdown { reply }).await;
        self.poller.await.map_err(|_| BatchError::Closed)
    }
}

/// Send a request to the poller and wait for its reply.
async fn call<T>(
    requests: &mpsc::Sender<Request>,
    make: impl FnOnce(oneshot::Sender<T>) -> Request,
) -> BatchResult<T> {
    let (reply, response) = oneshot::channel();
    requests
        .send(make(reply))
        .await
        .map_err(|_| BatchError::Closed)?;
    response.await.map_err(|_| BatchError::Closed)
}

/// Reserve the id, submit, and record the result or release the id.
async fn issue(
    requests: mpsc::Sender<Request>,
    torque: Arc<TorqueConfig>,
    request: ResourceRequest,
) -> BatchResult<SchedulerJobId> {
    let job_id = request.job_id;
    call(&requests, |reply| Request::Reserve { job_id, reply }).await??;

    match submit(&requests, &torque, &request).await {
        Ok(scheduler_id) => {
            tracing::info!(scheduler_id = %scheduler_id, "submitted job");
            Ok(scheduler_id)
        }
        Err(e) => {
            requests
                .send(Request::Release { job_id })
                .await
                .map_err(|_| BatchError::Closed)?;
            Err(e)
        }
    }
}

async fn submit(
    requests: &mpsc::Sender<Request>,
    torque: &TorqueConfig,
    request: &ResourceRequest,
) -> BatchResult<SchedulerJobId> {
    let job_id = request.job_id;
    let job_name = torque.job_name(job_id);
    let submission = prepare_submission(&job_name, &request.command, &request.resources, torque)?;

    let recorded = match submit_job(torque, &submission.args, &submission.script).await {
        Ok(scheduler_id) => {
            let wrapper = submission.script.clone();
            let id = scheduler_id.clone();
            let recorded = call(requests, |reply| Request::Record {
                job_id,
                scheduler_id: id,
                wrapper,
                reply,
            })
            .await;
            match recorded {
                Ok(Ok(())) => Ok(scheduler_id),
                Ok(Err(e)) => {
                    tracing::error!(scheduler_id = %scheduler_id, "qsub returned an id already in use: {}", e);
                    Err(e.into())
                }
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e.into()),
    };

    if recorded.is_err() {
        if let Err(e) = remove_wrapper(&submission.script) {
            tracing::warn!(path = %submission.script, "Failed to remove wrapper: {}", e);
        }
    }
    recorded
}

//! Drive a PBS/Torque cluster through a submit / poll / kill contract.
//!
//! [`TorqueBatchSystem`] is the handle a scheduling engine talks to. It
//! submits jobs with qsub, kills them with qdel, and hands back terminal
//! results produced by a background poller that owns all tracking state.

pub mod batch;
pub mod error;
pub mod polling;

pub use batch::TorqueBatchSystem;
pub use error::{BatchError, BatchResult};
pub use polling::PollingConfig;
pub use qbatch_state::{JobId, JobState, ResourceRequest, UpdatedJob};
pub use qbatch_torque::{LogNaming, SchedulerJobId, TorqueConfig};

//! Errors surfaced by the batch system handle.

use qbatch_state::{LookupError, MapperError, RequestError};
use qbatch_torque::{QdelError, QsubError, WrapperError};
use thiserror::Error;

/// Errors returned by [`crate::TorqueBatchSystem`].
///
/// Unparseable or missing status output is never an error: the poller
/// treats it as "no information yet" and tries again next cycle.
#[derive(Error, Debug)]
pub enum BatchError {
    /// The request can never be satisfied.
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    /// The internal id is still tracked, or the scheduler reused an id.
    #[error(transparent)]
    Mapper(#[from] MapperError),

    /// An identifier with no mapping was looked up.
    #[error(transparent)]
    Lookup(#[from] LookupError),

    /// The wrapper script could not be written.
    #[error(transparent)]
    Script(#[from] WrapperError),

    /// qsub failed or printed no job identifier.
    #[error("Submission failed: {0}")]
    Submit(#[from] QsubError),

    /// qdel failed.
    #[error("Kill failed: {0}")]
    Kill(#[from] QdelError),

    /// The poller task is gone.
    #[error("Batch system poller has shut down")]
    Closed,
}

/// Result type for batch system operations.
pub type BatchResult<T> = Result<T, BatchError>;

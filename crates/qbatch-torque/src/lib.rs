//! PBS/Torque integration for qbatch.
//!
//! Submit jobs via qsub, query status via qstat, cancel via qdel.

pub mod config;
pub mod qdel;
pub mod qstat;
pub mod qsub;
pub mod types;
pub mod wrapper;

pub use config::{LogNaming, TorqueConfig};
pub use qdel::{kill_job, QdelError};
pub use qstat::{
    parse_exit_status, parse_listing, parse_listing_line, query_exit_status, query_listing,
    QstatError,
};
pub use qsub::{
    build_qsub_args, parse_qsub_output, prepare_submission, submit_job, QsubError, Submission,
};
pub use types::{JobResources, ListingRow, SchedulerJobId, TorqueJobState};
pub use wrapper::{remove_wrapper, render_wrapper, write_wrapper, WrapperDirectives, WrapperError};

//! Job tracking state for qbatch.
//!
//! Holds the data model shared by the batch system and its poller, and the
//! table mapping internal job identifiers to scheduler identifiers.

pub mod mapper;
pub mod types;

pub use mapper::{JobTable, LookupError, MapperError};
pub use types::{JobId, JobRecord, JobState, RequestError, ResourceRequest, UpdatedJob};

pub mod clock;
pub mod failure;
pub mod job;

pub use clock::{format_unix, now_rfc3339, now_unix, parse_rfc3339_unix};
pub use failure::{FailureClass, JobFailure, RetryPolicy};
pub use job::{priority, AnalysisJob, JobContext, JobKind, JobSpec, JobStatus};

/// Job ID format: `job_<ulid>`
pub type JobId = String;

/// Node ID format: `node_<ulid>`
pub type NodeId = String;

/// Mint a new job id.
pub fn new_job_id() -> JobId {
    format!("job_{}", ulid::Ulid::new())
}

/// Mint a new node id.
pub fn new_node_id() -> NodeId {
    format!("node_{}", ulid::Ulid::new())
}

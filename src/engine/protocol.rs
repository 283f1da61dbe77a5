//! Public Job API Protocol
//!
//! DTOs for the node's outward-facing HTTP surface: submitting root jobs and
//! polling their status.

use crate::records::types::{JobId, JobOutcome, JobSpec, RecordState};
use serde::{Deserialize, Serialize};

pub const ENDPOINT_SUBMIT_JOB: &str = "/job/submit";
pub const ENDPOINT_JOB_STATUS: &str = "/job/status";
pub const ENDPOINT_JOB_ABORT: &str = "/job/abort";
pub const ENDPOINT_STATS: &str = "/internal/stats";

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub spec: JobSpec,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: Option<JobId>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub state: RecordState,
    pub outcome: Option<JobOutcome>,
}

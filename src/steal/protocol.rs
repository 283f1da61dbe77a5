//! Steal Network Protocol
//!
//! DTOs for the steal round trip and the result return path. Both message
//! kinds are ephemeral: they exist on the wire and are never persisted.

use crate::membership::types::NodeId;
use crate::records::types::{JobId, JobOutcome, JobSpec};
use serde::{Deserialize, Serialize};

/// Endpoint a thief posts steal requests to.
pub const ENDPOINT_STEAL: &str = "/internal/steal";
/// Endpoint a thief posts finished results back to.
pub const ENDPOINT_JOB_RESULT: &str = "/internal/job_result";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StealRequest {
    /// Matches the reply to this attempt (and makes the pair traceable in
    /// logs on both sides).
    pub request_id: String,
    pub thief: NodeId,
    /// How much local work the thief still has; victims may use it as a
    /// policy input.
    pub load_hint: usize,
}

/// A job transferred by value. The victim keeps only an outline entry for
/// abort forwarding; ownership of execution moves with this message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StolenJob {
    pub job_id: JobId,
    pub spec: JobSpec,
    pub ancestors: Vec<JobId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StealReply {
    Denied,
    Granted { request_id: String, job: StolenJob },
}

/// Carries a stolen job's outcome home to the victim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResultMsg {
    pub job_id: JobId,
    pub outcome: JobOutcome,
}

use crate::records::types::JobId;
use serde::{Deserialize, Serialize};

pub const ENDPOINT_ABORT: &str = "/internal/abort";

/// Kills the subtree rooted at `job_id` on the receiving node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbortMsg {
    pub job_id: JobId,
}

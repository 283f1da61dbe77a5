//! Result Table Network Protocol
//!
//! DTOs and endpoints for replica pushes and remote lookups.

use crate::membership::types::NodeId;
use crate::records::types::{JobId, JobOutcome};
use serde::{Deserialize, Serialize};

/// Endpoint receiving a replica copy of a completed result.
pub const ENDPOINT_GRT_REPLICATE: &str = "/internal/grt/replicate";
/// Endpoint for remote lookups, keyed by the job id's string form.
pub const ENDPOINT_GRT_GET: &str = "/internal/grt/get";

/// One completed result, as stored and as shipped to replicas.
///
/// `owner` is the node that computed the result (the primary copy);
/// `replicas` lists the nodes holding read-only mirrors, in promotion
/// priority order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrtEntry {
    pub job_id: JobId,
    pub outcome: JobOutcome,
    pub epoch: u64,
    pub owner: NodeId,
    pub replicas: Vec<NodeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateEntryRequest {
    pub entry: GrtEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrtGetResponse {
    pub entry: Option<GrtEntry>,
}

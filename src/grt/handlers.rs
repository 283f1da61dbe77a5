use super::table::GlobalResultTable;
use super::types::{GrtGetResponse, ReplicateEntryRequest};

use axum::{Extension, Json, extract::Path, http::StatusCode};
use std::sync::Arc;

/// Receives a replica copy of a completed result from its owner.
pub async fn handle_grt_replicate(
    Extension(table): Extension<Arc<GlobalResultTable>>,
    Json(req): Json<ReplicateEntryRequest>,
) -> StatusCode {
    tracing::debug!("Storing replica of {}", req.entry.job_id);
    table.apply_replica(req.entry);
    StatusCode::OK
}

/// Answers a remote lookup against the local shard only; routing across the
/// placement nodes is the requester's job.
pub async fn handle_grt_get(
    Extension(table): Extension<Arc<GlobalResultTable>>,
    Path(key): Path<String>,
) -> (StatusCode, Json<GrtGetResponse>) {
    match table.get_by_key(&key) {
        Some(entry) => (
            StatusCode::OK,
            Json(GrtGetResponse { entry: Some(entry) }),
        ),
        None => (StatusCode::NOT_FOUND, Json(GrtGetResponse { entry: None })),
    }
}

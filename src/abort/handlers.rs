use super::protocol::AbortMsg;
use crate::engine::runtime::Engine;

use axum::{Extension, Json, http::StatusCode};
use std::sync::Arc;

/// Receives an abort (broadcast or forwarded). Sweeping an already-dead
/// subtree is a no-op, so duplicates are harmless.
pub async fn handle_abort(
    Extension(engine): Extension<Arc<Engine>>,
    Json(msg): Json<AbortMsg>,
) -> StatusCode {
    tracing::debug!("Received abort for {}", msg.job_id);
    engine.apply_abort(&msg.job_id).await;
    StatusCode::OK
}

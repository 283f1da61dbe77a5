use super::protocol::{JobResultMsg, StealReply, StealRequest};
use crate::engine::runtime::Engine;

use axum::{Extension, Json, http::StatusCode};
use std::sync::Arc;

/// The victim side of a steal: one job leaves, or the thief is denied.
pub async fn handle_steal(
    Extension(engine): Extension<Arc<Engine>>,
    Json(request): Json<StealRequest>,
) -> (StatusCode, Json<StealReply>) {
    tracing::debug!(
        "Steal request {} from {} (load {})",
        request.request_id,
        request.thief,
        request.load_hint
    );

    (StatusCode::OK, Json(engine.answer_steal(&request)))
}

/// A stolen job's outcome coming home. Always 200: late and duplicate
/// deliveries are valid no-ops.
pub async fn handle_job_result(
    Extension(engine): Extension<Arc<Engine>>,
    Json(msg): Json<JobResultMsg>,
) -> StatusCode {
    engine.deliver_result(&msg.job_id, msg.outcome);
    StatusCode::OK
}

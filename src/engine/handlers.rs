use super::protocol::{JobStatusResponse, SubmitJobRequest, SubmitJobResponse};
use super::runtime::Engine;
use crate::records::types::JobId;
use crate::stats::StatsSnapshot;

use axum::{Extension, Json, extract::Path, http::StatusCode};
use std::sync::Arc;

pub async fn handle_submit_job(
    Extension(engine): Extension<Arc<Engine>>,
    Json(req): Json<SubmitJobRequest>,
) -> (StatusCode, Json<SubmitJobResponse>) {
    match engine.spawn_root(req.spec) {
        Ok(job_id) => {
            tracing::info!("Job submitted: {}", job_id);
            (
                StatusCode::OK,
                Json(SubmitJobResponse {
                    job_id: Some(job_id),
                    error: None,
                }),
            )
        }
        Err(e) => {
            tracing::error!("Failed to submit job: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SubmitJobResponse {
                    job_id: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn handle_job_status(
    Extension(engine): Extension<Arc<Engine>>,
    Path(key): Path<String>,
) -> (StatusCode, Json<Option<JobStatusResponse>>) {
    let Ok(job_id) = key.parse::<JobId>() else {
        return (StatusCode::BAD_REQUEST, Json(None));
    };

    match engine.job_status(&job_id) {
        Some((state, outcome)) => (
            StatusCode::OK,
            Json(Some(JobStatusResponse {
                job_id,
                state,
                outcome,
            })),
        ),
        None => (StatusCode::NOT_FOUND, Json(None)),
    }
}

pub async fn handle_job_abort(
    Extension(engine): Extension<Arc<Engine>>,
    Path(key): Path<String>,
) -> StatusCode {
    let Ok(job_id) = key.parse::<JobId>() else {
        return StatusCode::BAD_REQUEST;
    };

    engine.abort(&job_id).await;
    StatusCode::OK
}

pub async fn handle_stats(Extension(engine): Extension<Arc<Engine>>) -> Json<StatsSnapshot> {
    Json(engine.stats_snapshot())
}

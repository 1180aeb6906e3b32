//! `GET /jobs/{jobId}` — the status endpoint.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::kernel::job::JobStatus;
use crate::server::app::AppState;

#[derive(Serialize)]
struct StatusResponse {
    job_id: String,
    status: JobStatus,
    requested_count: u64,
    processed_count: u64,
    progress: u8,
    started_at: DateTime<Utc>,
    message: String,
}

pub async fn status_handler(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match state.status_store.get(&job_id).await {
        Ok(Some(record)) => {
            let progress = if record.requested_count == 0 {
                100
            } else {
                let ratio = record.processed_count.min(record.requested_count) as f64
                    / record.requested_count as f64;
                (ratio * 100.0).round() as u8
            };
            Json(StatusResponse {
                job_id: record.job_id,
                status: record.status,
                requested_count: record.requested_count,
                processed_count: record.processed_count,
                progress,
                started_at: record.started_at,
                message: record.message,
            })
            .into_response()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::warn!(job_id, error = %e, "failed to read job status");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

//! `POST /users/import/async` — the submission endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AdmissionError;
use crate::kernel::keys::is_valid_identifier;
use crate::kernel::runner::{ProgressReporter, Workload};
use crate::kernel::store::RedisStoreClient;
use crate::server::app::AppState;

const USER_ID_HEADER: &str = "x-user-id";
const BATCH_SIZE: u64 = 1_000;

#[derive(Deserialize)]
pub struct SubmitQuery {
    count: i64,
}

#[derive(Serialize)]
pub struct SubmitResponse {
    job_id: String,
    status: &'static str,
    message: &'static str,
}

/// Stand-in for the actual bulk-import pipeline, which is opaque to this
/// service and implementation-defined. Simulates processing in batches so
/// the runner's progress-reporting and worker-pool machinery has something
/// real to exercise end to end.
pub struct ImportWorkload {
    requested_count: u64,
}

#[async_trait]
impl Workload<RedisStoreClient> for ImportWorkload {
    async fn run(
        &self,
        reporter: &ProgressReporter<RedisStoreClient>,
    ) -> anyhow::Result<u64> {
        let mut processed = 0u64;
        while processed < self.requested_count {
            let batch = BATCH_SIZE.min(self.requested_count - processed);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            processed += batch;
            reporter.report(processed).await;
        }
        Ok(processed)
    }
}

pub async fn submit_handler(
    State(state): State<AppState>,
    Query(query): Query<SubmitQuery>,
    headers: HeaderMap,
) -> Response {
    let user_id = match headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    {
        Some(id) if is_valid_identifier(&id) => id,
        Some(_) => {
            return AdmissionError::InvalidInput(format!(
                "{USER_ID_HEADER} must not be empty or contain ':'"
            ))
            .into_response()
        }
        None => {
            return AdmissionError::InvalidInput(format!("{USER_ID_HEADER} header is required"))
                .into_response()
        }
    };

    if query.count <= 0 {
        return AdmissionError::InvalidInput("count must be a positive integer".to_string())
            .into_response();
    }
    let requested_count = query.count as u64;

    let workload = Arc::new(ImportWorkload { requested_count });
    match state
        .runner
        .submit(&user_id, requested_count, workload)
        .await
    {
        Ok(job_id) => {
            info!(user_id, requested_count, job_id, "accepted import job");
            (
                StatusCode::ACCEPTED,
                Json(SubmitResponse {
                    job_id,
                    status: "PENDING",
                    message: "job accepted",
                }),
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

//! Health check endpoint: reports ok only if the shared store answers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::kernel::store::StoreClient;
use crate::server::app::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    store: StoreHealth,
}

#[derive(Serialize)]
struct StoreHealth {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub async fn health_handler(State(state): State<AppState>) -> Response {
    let store_health = match state.store.exists("__health_check__").await {
        Ok(_) => StoreHealth {
            status: "ok",
            error: None,
        },
        Err(e) => StoreHealth {
            status: "error",
            error: Some(e.to_string()),
        },
    };

    let is_healthy = store_health.status == "ok";
    let status_code = if is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if is_healthy { "healthy" } else { "unhealthy" },
            store: store_health,
        }),
    )
        .into_response()
}

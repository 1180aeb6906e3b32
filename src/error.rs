//! Tagged admission outcomes, translated to HTTP status codes at the
//! boundary — rejection and cooldown are routine outcomes, not
//! exceptions.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::kernel::store::StoreError;
use crate::kernel::tiers::Tier;

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("user {user_id} is in cooldown ({remaining_seconds}s remaining)")]
    CooldownActive {
        user_id: String,
        tier: Tier,
        total_seconds: u64,
        remaining_seconds: u64,
    },

    #[error("too many concurrent {tier} jobs for user {user_id} (limit {limit})")]
    TooManyRequests {
        user_id: String,
        tier: Tier,
        limit: u32,
    },

    #[error("shared store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Serialize)]
struct ErrorBody {
    timestamp: String,
    status: u16,
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining_seconds: Option<u64>,
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let timestamp = Utc::now().to_rfc3339();

        let (status, error, message, total_seconds, remaining_seconds) = match &self {
            AdmissionError::CooldownActive {
                tier,
                total_seconds,
                remaining_seconds,
                ..
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too Many Requests",
                format!("user is in cooldown for tier {tier}"),
                Some(*total_seconds),
                Some(*remaining_seconds),
            ),
            AdmissionError::TooManyRequests { tier, limit, .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too Many Requests",
                format!("tier {tier} concurrency limit ({limit}) reached"),
                None,
                None,
            ),
            AdmissionError::StoreUnavailable(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service Unavailable",
                format!("shared store unavailable: {e}"),
                None,
                None,
            ),
            AdmissionError::InvalidInput(msg) => {
                (StatusCode::BAD_REQUEST, "Bad Request", msg.clone(), None, None)
            }
        };

        let body = ErrorBody {
            timestamp,
            status: status.as_u16(),
            error,
            message,
            total_seconds,
            remaining_seconds,
        };

        (status, Json(body)).into_response()
    }
}

//! Application setup: shared state and router assembly.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::admission::AdmissionController;
use crate::kernel::job_status::JobStatusStore;
use crate::kernel::runner::JobRunner;
use crate::kernel::store::RedisStoreClient;
use crate::server::routes::{health_handler, status_handler, submit_handler};

#[derive(Clone)]
pub struct AppState {
    pub admission: Arc<AdmissionController<RedisStoreClient>>,
    pub runner: Arc<JobRunner<RedisStoreClient>>,
    pub status_store: Arc<JobStatusStore<RedisStoreClient>>,
    pub store: Arc<RedisStoreClient>,
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/users/import/async", post(submit_handler))
        .route("/jobs/:job_id", get(status_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

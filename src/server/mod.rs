//! HTTP surface: axum router, shared app state, routes.

pub mod app;
pub mod routes;

pub use app::{build_app, AppState};

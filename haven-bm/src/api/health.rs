//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use haven_common::time;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: i64,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "haven-bm".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: (time::now() - state.startup_time).num_seconds(),
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

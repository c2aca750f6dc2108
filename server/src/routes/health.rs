//! Health check endpoints

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::SharedState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub version: String,
}

#[derive(Serialize)]
pub struct PingResponse {
    pub status: &'static str,
}

/// GET /health - Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_seconds: state.uptime_seconds(),
        version: cropcare::VERSION.to_string(),
    })
}

/// GET /api/ping - Liveness probe for the front end
pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse { status: "ok" })
}

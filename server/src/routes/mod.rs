//! HTTP routes and the router that wires them to shared state

pub mod health;
pub mod model;
pub mod predict;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::state::{ServerSettings, SharedState};

/// Build the application router
pub fn router(state: SharedState) -> Router {
    let body_limit = state.settings.max_upload_bytes;
    let cors = cors_layer(&state.settings);

    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .route("/api/ping", get(health::ping))
        // Prediction
        .route("/api/predict", post(predict::predict))
        .route("/api/infer", post(predict::predict))
        // Model description
        .route("/api/model", get(model::model_info))
        // Add state
        .with_state(state)
        // Add middleware
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn cors_layer(settings: &ServerSettings) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if settings.cors_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = settings
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(origins))
}

use axum::{
    extract::{DefaultBodyLimit, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::api::rest::{handlers, logging_middleware::request_logging_middleware, state::AppState};

/// Uploaded question files, images and tables share this cap.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/version", get(version))
        .route("/aianalyst", post(handlers::analyst::analyze_multipart))
        .route("/aianalyst/", post(handlers::analyst::analyze_multipart))
        .route("/aianalyst/json", post(handlers::analyst::analyze_json))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health))
        .with_state(state)
        .nest("/api/v0", api_routes)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "api": "v0"
    }))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let uptime = Utc::now() - state.started_at;
    Json(json!({
        "status": "ok",
        "uptime_secs": uptime.num_seconds()
    }))
}

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;

use crate::app_state::{AppState, LIVE_PATH};

use super::handlers;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/stream", get(handlers::status))
        .route("/stream/start", post(handlers::start))
        .route("/stream/stop", post(handlers::stop))
        .route("/stream/source", put(handlers::update_source))
        .route(LIVE_PATH, get(handlers::live))
        .route("/capture", post(handlers::capture))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the broker websocket and the availability API under a
//! single Axum router. Everything else (layout CSV, floor plans, view and
//! amenity photos) is served as static files from the public directory.

pub mod availability;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// API + broker routes with static files as the fallback.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let static_files = ServeDir::new(&state.public_dir).append_index_html_on_directories(true);

    Router::new()
        .route("/mqtt", get(ws::handle_ws))
        .route("/api/health", get(availability::health))
        .route("/api/availability", get(availability::get_availability))
        .route(
            "/api/update-availability",
            availability::update_route(),
        )
        .route("/healthz", get(healthz))
        .fallback_service(static_files)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

//! carte-review library - quarantine review service
//!
//! Small HTTP surface for operators to inspect menus the quality gate held
//! back, and to promote or discard them. Shares the carte database with the
//! ingest pipeline.

use axum::Router;
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod db;
pub mod error;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
}

impl AppState {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{delete, get, post};

    Router::new()
        .route("/health", get(api::health_check))
        .route("/api/buildinfo", get(api::build_info))
        .route("/api/quarantine", get(api::list_quarantine))
        .route("/api/quarantine/:brand_id", get(api::quarantine_detail))
        .route(
            "/api/quarantine/:brand_id/:source/promote",
            post(api::promote_record),
        )
        .route("/api/quarantine/:brand_id/:source", delete(api::delete_record))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

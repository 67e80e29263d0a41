// logsight-server/src/routes.rs
//! The route table.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::sse;
use crate::state::AppState;
use crate::ws;

/// Build the full API router over `state`
pub fn router(state: AppState) -> Router {
    Router::new()
        // Files and uploads
        .route("/api/files/upload", post(handlers::files::upload))
        .route("/api/files/upload/chunk", post(handlers::files::upload_chunk))
        .route(
            "/api/files/upload/complete",
            post(handlers::files::upload_complete),
        )
        .route("/api/files/recent", get(handlers::files::recent))
        .route("/api/files/{id}", axum::routing::delete(handlers::files::delete_file))
        .route("/api/files/upload/jobs/{id}", get(handlers::files::job_status))
        .route(
            "/api/files/upload/jobs/{id}/progress",
            get(sse::job_progress),
        )
        // Sessions
        .route("/api/parse", post(handlers::parse::start))
        .route("/api/parse/{id}/status", get(handlers::parse::status))
        .route("/api/parse/{id}/progress", get(sse::parse_progress))
        .route("/api/parse/{id}/stream", get(sse::entry_stream))
        .route("/api/parse/{id}/keepalive", post(handlers::parse::keepalive))
        // Queries
        .route("/api/parse/{id}/entries", get(handlers::query::entries))
        .route("/api/parse/{id}/chunk", get(handlers::query::chunk))
        .route(
            "/api/parse/{id}/chunk/boundaries",
            post(handlers::query::boundaries),
        )
        .route("/api/parse/{id}/values", get(handlers::query::values_at))
        .route("/api/parse/{id}/index", get(handlers::query::index_by_time))
        .route("/api/parse/{id}/timetree", get(handlers::query::time_tree))
        .route("/api/parse/{id}/signals", get(handlers::query::signals))
        .route(
            "/api/parse/{id}/signals/types",
            get(handlers::query::signal_types),
        )
        .route("/api/parse/{id}/timerange", get(handlers::query::time_range))
        .route("/api/parse/{id}/devices", get(handlers::query::devices))
        .route("/api/parse/{id}/categories", get(handlers::query::categories))
        .route("/api/parse/{id}/carriers", get(handlers::query::carriers))
        // Upload websocket
        .route("/api/ws/uploads", get(ws::upgrade))
        .with_state(state)
}

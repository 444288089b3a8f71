//! HTTP route handlers and the router that ties them to their throttle
//! scopes.
//!
//! - `upload`: single and multi-file uploads
//! - `files`: inline view and download
//! - `delete`, `compress`: management of stored files
//! - `admin`: listing and statistics
//! - `health`: probes, version and metrics

pub mod admin;
pub mod compress;
pub mod delete;
pub mod files;
pub mod health;
pub mod upload;

use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{self, get, post},
    Router,
};

use crate::{
    error::AppError,
    middleware::{
        auth::require_master_key,
        rate_limit::{throttle, Throttle, SCOPE_API, SCOPE_FILES, SCOPE_UPLOAD},
    },
    state::AppState,
};

/// The complete application router, without transport layers (tracing, CORS).
pub fn router(state: AppState) -> Router {
    let health = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics))
        .route("/metrics/prometheus", get(health::metrics_prometheus))
        .route("/version", get(health::version));

    // route_layer: the last one added runs first, so throttling precedes auth.
    let files = Router::new()
        .route("/file/view/{path}", get(files::view_file))
        .route("/file/download/{path}", get(files::download_file))
        .route_layer(from_fn_with_state(Throttle::new(state.clone(), SCOPE_FILES), throttle));

    // Size is enforced while streaming to disk, not by the body limit.
    let uploads = Router::new()
        .route("/api/upload", post(upload::upload_file))
        .route("/api/upload/multiple", post(upload::upload_multiple))
        .route_layer(from_fn_with_state(state.clone(), require_master_key))
        .route_layer(from_fn_with_state(Throttle::new(state.clone(), SCOPE_UPLOAD), throttle))
        .layer(DefaultBodyLimit::disable());

    let api = Router::new()
        .route("/api/delete/{path}", routing::delete(delete::delete_file))
        .route("/api/compress/{path}", post(compress::compress_file))
        .route("/api/files", get(admin::list_files))
        .route("/api/stats", get(admin::stats))
        .route_layer(from_fn_with_state(state.clone(), require_master_key))
        .route_layer(from_fn_with_state(Throttle::new(state.clone(), SCOPE_API), throttle));

    Router::new()
        .merge(health)
        .merge(files)
        .merge(uploads)
        .merge(api)
        .fallback(not_found)
        .with_state(state)
}

async fn not_found() -> AppError {
    AppError::NotFound("No such endpoint".to_string())
}

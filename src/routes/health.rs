use std::time::Duration;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::state::AppState;

/// Upper bound for one readiness check, independent of the pool timeout.
const READY_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

// Liveness only; touches neither the database nor the disk.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Ready when a pooled connection answers `SELECT 1` and the storage
/// directory is reachable.
pub async fn readyz(State(state): State<AppState>) -> Response {
    let checks = async {
        check_database(&state).await?;
        check_storage(&state).await
    };
    match tokio::time::timeout(READY_CHECK_TIMEOUT, checks).await {
        Ok(Ok(())) => (StatusCode::OK, "ready").into_response(),
        Ok(Err(reason)) => {
            tracing::warn!("Readiness check failed: {}", reason);
            (StatusCode::SERVICE_UNAVAILABLE, format!("not ready: {}", reason)).into_response()
        }
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "not ready: timeout").into_response(),
    }
}

async fn check_database(state: &AppState) -> Result<(), String> {
    let mut conn = state
        .store
        .pool()
        .acquire(state.config.database.acquire_timeout())
        .await
        .map_err(|e| format!("database: {}", e))?;
    sqlx::query("SELECT 1").execute(&mut *conn).await.map_err(|e| format!("database: {}", e))?;
    Ok(())
}

async fn check_storage(state: &AppState) -> Result<(), String> {
    match tokio::fs::metadata(state.blobs.root()).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(format!("storage: {} is not a directory", state.blobs.root().display())),
        Err(e) => Err(format!("storage: {}", e)),
    }
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.get_snapshot(state.store.pool().status(), state.store.pool_timeouts()))
}

pub async fn metrics_prometheus(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.metrics.get_snapshot(state.store.pool().status(), state.store.pool_timeouts()).to_prometheus();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

/// Build info plus the limits clients need to know about.
pub async fn version(State(state): State<AppState>) -> impl IntoResponse {
    let cfg = &state.config;
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "build": {
            "profile": if cfg!(debug_assertions) { "debug" } else { "release" },
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        },
        "limits": {
            "max_upload_bytes": cfg.storage.max_upload_bytes,
            "rate_limits": {
                "api": cfg.rate_limits.api,
                "upload": cfg.rate_limits.upload,
                "files": cfg.rate_limits.files,
            },
        },
    }))
}

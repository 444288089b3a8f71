use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::{error::AppResult, state::AppState};

/// Deletes the record first so the file stops being served, then its bytes.
pub async fn delete_file(State(state): State<AppState>, Path(path): Path<String>) -> AppResult<Json<Value>> {
    state.store.delete(&path).await?;

    match state.blobs.remove(&path).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!("File {} had no stored bytes", path),
        Err(e) => tracing::error!("Error deleting stored bytes of {}: {}", path, e),
    }
    state.metrics.inc_deletions();

    Ok(Json(json!({ "success": true, "message": "File deleted successfully", "file_path": path })))
}

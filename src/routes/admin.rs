use axum::{
    extract::{Query, State},
    Json,
};
use serde_json::{json, Value};

use crate::{error::AppResult, state::AppState, types::ListQuery};

/// Newest uploads first, `limit` (1..=1000, default 100) and `offset` paginate.
pub async fn list_files(State(state): State<AppState>, Query(q): Query<ListQuery>) -> AppResult<Json<Value>> {
    let limit = q.limit.unwrap_or(100).clamp(1, 1000);
    let offset = q.offset.unwrap_or(0).max(0);
    let files = state.store.list(limit, offset).await?;
    Ok(Json(json!({ "files": files, "limit": limit, "offset": offset })))
}

pub async fn stats(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let by_content_type = state.store.count_by_content_type().await?;
    let total_files: i64 = by_content_type.iter().map(|c| c.count).sum();
    Ok(Json(json!({ "total_files": total_files, "by_content_type": by_content_type })))
}

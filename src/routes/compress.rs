use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::{
    compress::{self, CompressOptions, Compressed},
    error::{AppError, AppResult},
    state::AppState,
    store::StoreError,
    types::{CompressRequest, FileMetadataRecord},
};

/// Recompresses a stored image in place. The body is optional JSON.
///
/// Output that is not smaller than the stored file is dropped and the
/// original kept.
pub async fn compress_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let request: CompressRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CompressRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(format!("Invalid compression options: {}", e)))?
    };
    let opts = CompressOptions::from(&request);

    let record = state.store.get_by_path(&path).await?;
    // Checked before reading: stored files can be gigabytes.
    if !record.content_type.starts_with("image/") {
        return Err(AppError::BadRequest(format!("{} is not an image ({})", record.path, record.content_type)));
    }
    let input = state.blobs.read(&record.path).await?;
    let original_size = input.len();

    let compressed = compress::compress(input, opts).await?;
    let new_size = compressed.bytes.len();
    if new_size >= original_size {
        tracing::info!("Compressing {} would not shrink it ({} -> {} bytes), kept", record.path, original_size, new_size);
        return Ok(Json(json!({
            "success": true,
            "message": "File is already smaller than the compressed result; original kept",
            "file_path": record.path,
            "original_size": original_size,
            "file_size": original_size,
            "content_type": record.content_type,
            "width": compressed.source_width,
            "height": compressed.source_height,
        })));
    }

    store_compressed(&state, &record, &compressed).await?;
    state.metrics.inc_compressions();
    tracing::info!("Compressed {} ({} -> {} bytes, {})", record.path, original_size, new_size, compressed.content_type);

    Ok(Json(json!({
        "success": true,
        "message": "File compressed successfully",
        "file_path": record.path,
        "original_size": original_size,
        "file_size": new_size,
        "content_type": compressed.content_type,
        "width": compressed.width,
        "height": compressed.height,
    })))
}

/// Swaps in the new bytes and metadata together. The bytes are staged first
/// and only renamed into place once the record says what they are; if the
/// record disappears on the way, nothing is left on disk.
async fn store_compressed(state: &AppState, record: &FileMetadataRecord, compressed: &Compressed) -> AppResult<()> {
    let size = i64::try_from(compressed.bytes.len()).map_err(|e| AppError::Internal(e.into()))?;
    let staged = state.blobs.stage(&record.path, &compressed.bytes).await?;

    if let Err(e) = state.store.update_content(&record.path, size, compressed.content_type).await {
        staged.discard().await;
        return Err(e.into());
    }

    if let Err(e) = staged.commit().await {
        if let Err(re) = state.store.update_content(&record.path, record.size_bytes, &record.content_type).await {
            tracing::error!("Failed to restore metadata of {} after a failed rename: {}", record.path, re);
        }
        return Err(e.into());
    }

    // A delete landing between the update and the rename leaves the renamed
    // bytes without a record.
    if let Err(StoreError::NotFound(_)) = state.store.get_by_path(&record.path).await {
        if let Err(e) = state.blobs.remove(&record.path).await {
            tracing::warn!("Failed to remove orphaned bytes of {}: {}", record.path, e);
        }
        return Err(StoreError::NotFound(record.path.clone()).into());
    }
    Ok(())
}

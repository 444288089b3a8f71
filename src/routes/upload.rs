use axum::{
    extract::{multipart::Field, Multipart, State},
    Json,
};
use chrono::Duration;

use crate::{
    error::{AppError, AppResult},
    state::AppState,
    storage::{resolve_content_type, safe_name},
    types::{FileMetadataRecord, MultiUploadResponse, UploadFailure, UploadOutcome, UploadResponse},
};

/// Longest accepted `expiry_days`, about a century.
const MAX_EXPIRY_DAYS: i64 = 36_500;

/// A file whose bytes are on disk but has no metadata record yet.
struct StoredUpload {
    path: String,
    original_name: String,
    content_type: String,
    size: u64,
}

#[derive(Default)]
struct UploadForm {
    files: Vec<Result<StoredUpload, UploadFailure>>,
    ttl: Option<Duration>,
}

pub async fn upload_file(State(state): State<AppState>, mut multipart: Multipart) -> AppResult<Json<UploadResponse>> {
    let form = read_form(&state, &mut multipart, false).await?;
    let Some(Ok(stored)) = form.files.into_iter().next() else {
        return Err(AppError::BadRequest("No file provided".to_string()));
    };
    Ok(Json(finalize(&state, stored, form.ttl).await?))
}

pub async fn upload_multiple(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<MultiUploadResponse>> {
    let form = read_form(&state, &mut multipart, true).await?;
    if form.files.is_empty() {
        return Err(AppError::BadRequest("No files provided".to_string()));
    }

    let mut files = Vec::with_capacity(form.files.len());
    for entry in form.files {
        let outcome = match entry {
            Ok(stored) => {
                let file_name = stored.original_name.clone();
                match finalize(&state, stored, form.ttl).await {
                    Ok(resp) => UploadOutcome::Uploaded(resp),
                    Err(e) => UploadOutcome::Failed(UploadFailure { error: e.to_string(), file_name }),
                }
            }
            Err(failure) => UploadOutcome::Failed(failure),
        };
        files.push(outcome);
    }

    let uploaded_count = files.iter().filter(|f| matches!(f, UploadOutcome::Uploaded(_))).count();
    Ok(Json(MultiUploadResponse { success: true, uploaded_count, failed_count: files.len() - uploaded_count, files }))
}

/// Reads every multipart field, streaming file fields straight to disk.
/// On error, files already written by this request are removed.
async fn read_form(state: &AppState, multipart: &mut Multipart, multiple: bool) -> AppResult<UploadForm> {
    let mut form = UploadForm::default();
    if let Err(e) = read_fields(state, multipart, multiple, &mut form).await {
        for stored in form.files.iter().flatten() {
            remove_blob(state, &stored.path).await;
        }
        return Err(e);
    }
    Ok(form)
}

async fn read_fields(
    state: &AppState,
    multipart: &mut Multipart,
    multiple: bool,
    form: &mut UploadForm,
) -> AppResult<()> {
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_owned();
        match name.as_str() {
            "file" | "files" => {
                // Single uploads keep the first file; the rest is drained unread.
                if !multiple && !form.files.is_empty() {
                    continue;
                }
                let file_name = field.file_name().unwrap_or_default().to_owned();
                match store_field(state, field).await {
                    Ok(stored) => form.files.push(Ok(stored)),
                    Err(e) => {
                        state.metrics.inc_upload_failures();
                        if !multiple {
                            return Err(e);
                        }
                        tracing::warn!("Upload of {} failed: {}", file_name, e);
                        form.files.push(Err(UploadFailure { error: e.to_string(), file_name }));
                    }
                }
            }
            "expiry_days" => form.ttl = parse_expiry_days(&field.text().await?)?,
            _ => {}
        }
    }
    Ok(())
}

async fn store_field(state: &AppState, field: Field<'_>) -> AppResult<StoredUpload> {
    let client_name = field.file_name().map(str::trim).filter(|n| !n.is_empty()).map(str::to_owned);
    let declared_type = field.content_type().map(str::to_owned);

    let path = safe_name(client_name.as_deref().unwrap_or_default());
    let original_name = client_name.unwrap_or_else(|| path.clone());
    let size = state.blobs.write_stream(&path, field, state.config.storage.max_upload_bytes).await?;
    let content_type = resolve_content_type(declared_type.as_deref(), &original_name);

    Ok(StoredUpload { path, original_name, content_type, size })
}

/// Creates the metadata record and builds the response. Without a record the
/// bytes are unreachable, so they are removed if creation fails.
async fn finalize(state: &AppState, stored: StoredUpload, ttl: Option<Duration>) -> AppResult<UploadResponse> {
    let size = i64::try_from(stored.size).map_err(|_| AppError::PayloadTooLarge {
        limit_bytes: state.config.storage.max_upload_bytes,
    })?;
    let record = FileMetadataRecord::new(&stored.path, &stored.original_name, &stored.content_type, size, ttl);

    if let Err(e) = state.store.create(&record).await {
        state.metrics.inc_upload_failures();
        remove_blob(state, &stored.path).await;
        return Err(e.into());
    }
    state.metrics.record_upload(stored.size);

    let base = state.config.server.base_url.trim_end_matches('/');
    tracing::info!(
        "File uploaded: {}, size: {:.2}KB, path: {}",
        record.original_name,
        stored.size as f64 / 1024.0,
        record.path
    );

    Ok(UploadResponse {
        success: true,
        file_name: record.original_name,
        file_size: record.size_bytes,
        content_type: record.content_type,
        file_url: format!("{}/file/view/{}", base, record.path),
        download_url: format!("{}/file/download/{}", base, record.path),
        expires_at: record.expires_at,
    })
}

async fn remove_blob(state: &AppState, path: &str) {
    if let Err(e) = state.blobs.remove(path).await {
        tracing::warn!("Failed to remove orphaned upload {}: {}", path, e);
    }
}

/// Blank or zero means no expiry.
fn parse_expiry_days(raw: &str) -> AppResult<Option<Duration>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let days: i64 = raw.parse().map_err(|_| AppError::InvalidInput(format!("expiry_days must be an integer, got {raw:?}")))?;
    match days {
        0 => Ok(None),
        1..=MAX_EXPIRY_DAYS => Ok(Some(Duration::days(days))),
        _ => Err(AppError::InvalidInput(format!("expiry_days must be between 0 and {MAX_EXPIRY_DAYS}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_days_parsing() {
        assert_eq!(parse_expiry_days("").unwrap(), None);
        assert_eq!(parse_expiry_days("0").unwrap(), None);
        assert_eq!(parse_expiry_days(" 7 ").unwrap(), Some(Duration::days(7)));
        assert!(parse_expiry_days("-1").is_err());
        assert!(parse_expiry_days("soon").is_err());
        assert!(parse_expiry_days("99999999").is_err());
    }
}

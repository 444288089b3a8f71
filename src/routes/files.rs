use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use tokio_util::io::ReaderStream;

use crate::{
    error::{AppError, AppResult},
    state::AppState,
    storage::resolve_content_type,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Inline,
    Attachment,
}

/// Serves a file for display in the browser.
pub async fn view_file(State(state): State<AppState>, Path(path): Path<String>) -> AppResult<Response> {
    serve_file(&state, &path, Disposition::Inline).await
}

/// Serves a file as a download.
pub async fn download_file(State(state): State<AppState>, Path(path): Path<String>) -> AppResult<Response> {
    serve_file(&state, &path, Disposition::Attachment).await
}

async fn serve_file(state: &AppState, path: &str, disposition: Disposition) -> AppResult<Response> {
    let record = state.store.get_by_path(path).await?;
    let (file, len) = state.blobs.open_file(&record.path).await.map_err(|e| {
        tracing::warn!("File {} has a record but no readable bytes: {}", record.path, e);
        AppError::NotFound("File not found in storage".to_string())
    })?;

    // Access bookkeeping must not hold up the response.
    {
        let store = state.store.clone();
        let path = record.path.clone();
        tokio::spawn(async move {
            if let Err(e) = store.record_access(&path).await {
                tracing::warn!("Error updating file access for {}: {}", path, e);
            }
        });
    }
    state.metrics.inc_downloads();

    let content_type = resolve_content_type(Some(&record.content_type), &record.original_name);
    let content_type =
        HeaderValue::from_str(&content_type).unwrap_or(HeaderValue::from_static("application/octet-stream"));
    let kind = match disposition {
        Disposition::Inline => "inline",
        Disposition::Attachment => "attachment",
    };
    let content_disposition = format!("{}; filename=\"{}\"", kind, header_safe_filename(&record.original_name));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, len)
        .header(header::CONTENT_DISPOSITION, content_disposition)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| AppError::Internal(e.into()))
}

/// Quoted-string safe rendering of a client supplied file name.
fn header_safe_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' { c } else { '_' })
        .collect()
}

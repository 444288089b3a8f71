use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::{error::AppError, state::AppState};

/// Requires the master key as `Authorization: Bearer <key>` or the bare key.
/// A missing header is 401, a wrong key is 403.
pub async fn require_master_key(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, AppError> {
    check_master_key(req.headers(), &state.config.auth.master_key)?;
    Ok(next.run(req).await)
}

pub fn check_master_key(headers: &HeaderMap, master_key: &str) -> Result<(), AppError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Err(AppError::Unauthorized("Missing Authorization header".to_string()));
    };
    let value = value.to_str().map_err(|_| AppError::Forbidden("Invalid credentials".to_string()))?.trim();
    let token = value.strip_prefix("Bearer ").map(str::trim).unwrap_or(value);

    if constant_time_eq(token.as_bytes(), master_key.as_bytes()) {
        Ok(())
    } else {
        tracing::debug!("Rejected request with wrong master key");
        Err(AppError::Forbidden("Invalid credentials".to_string()))
    }
}

/// Compares without short-circuiting on the first differing byte.
fn constant_time_eq(provided: &[u8], expected: &[u8]) -> bool {
    let mut diff = provided.len() ^ expected.len();
    for (i, &b) in expected.iter().enumerate() {
        diff |= usize::from(b ^ provided.get(i).copied().unwrap_or(0));
    }
    diff == 0
}

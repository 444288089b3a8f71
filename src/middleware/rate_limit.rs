use std::net::SocketAddr;

use axum::{
    extract::{connect_info::ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::ip::client_key;
use crate::{error::AppError, rate_limit::Decision, state::AppState};

pub const SCOPE_API: &str = "api";
pub const SCOPE_UPLOAD: &str = "upload";
pub const SCOPE_FILES: &str = "files";

/// State for one throttled route group: the app plus the scope it counts against.
#[derive(Clone)]
pub struct Throttle {
    pub state: AppState,
    pub scope: &'static str,
}

impl Throttle {
    pub fn new(state: AppState, scope: &'static str) -> Self {
        Self { state, scope }
    }
}

/// Admits the request against its scope's fixed window or answers 429.
pub async fn throttle(State(throttle): State<Throttle>, req: Request, next: Next) -> Response {
    let peer = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|info| info.0.ip());
    let key = client_key(req.headers(), peer, throttle.state.config.proxy.trust_forwarded_headers);

    match throttle.state.rate_limiter.check(throttle.scope, &key) {
        Decision::Allowed => next.run(req).await,
        Decision::Rejected { retry_after_secs } => {
            throttle.state.metrics.inc_throttled();
            tracing::debug!(
                scope = throttle.scope,
                client = %key,
                retry_after_secs,
                "Rate limit exceeded for {} {}",
                req.method(),
                req.uri().path()
            );
            AppError::RateLimited { retry_after_seconds: retry_after_secs }.into_response()
        }
    }
}

use std::sync::Arc;

use crate::config::AppConfig;
use crate::metrics::Metrics;
use crate::middleware::rate_limit::{SCOPE_API, SCOPE_FILES, SCOPE_UPLOAD};
use crate::rate_limit::EndpointRateLimiter;
use crate::storage::BlobStore;
use crate::store::MetadataStore;

/// Shared application state handed to every handler and background task.
#[derive(Clone)]
pub struct AppState {
    /// File metadata over the bounded SQLite pool.
    pub store: MetadataStore,
    /// Raw uploaded bytes.
    pub blobs: BlobStore,
    pub config: Arc<AppConfig>,
    pub metrics: Metrics,
    /// One fixed-window table per throttle scope (`api`, `upload`, `files`).
    pub rate_limiter: EndpointRateLimiter,
}

impl AppState {
    pub fn new(store: MetadataStore, blobs: BlobStore, config: AppConfig) -> Self {
        let limits = &config.rate_limits;
        let rate_limiter = EndpointRateLimiter::new().with_limits([
            (SCOPE_API, limits.api),
            (SCOPE_UPLOAD, limits.upload),
            (SCOPE_FILES, limits.files),
        ]);

        Self { store, blobs, config: Arc::new(config), metrics: Metrics::new(), rate_limiter }
    }

    /// Replaces the limiter, e.g. with one driven by a manual clock.
    pub fn with_rate_limiter(mut self, rate_limiter: EndpointRateLimiter) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }
}

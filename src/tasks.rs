//! Background jobs spawned at startup.

use std::time::Duration;

use tokio::{sync::mpsc, time};

use crate::{rate_limit::EndpointRateLimiter, state::AppState, storage::BlobStore};

/// Deletes the bytes of every path whose record was removed for expiring.
/// Ends when all senders are gone.
pub async fn reap_expired_blobs(blobs: BlobStore, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(path) = rx.recv().await {
        match blobs.remove(&path).await {
            Ok(true) => tracing::info!("Expired file deleted: {}", path),
            Ok(false) => tracing::debug!("Expired file {} had no stored bytes", path),
            Err(e) => tracing::error!("Error deleting expired file {}: {}", path, e),
        }
    }
}

/// Removes one batch of expired records. Their bytes go to the reaper.
pub async fn sweep_expired_once(state: &AppState) -> usize {
    match state.store.purge_expired().await {
        Ok(paths) => {
            state.metrics.add_expired_purged(paths.len() as u64);
            paths.len()
        }
        Err(e) => {
            tracing::warn!("Expiry sweep failed: {}", e);
            0
        }
    }
}

/// Sweeps expired records immediately and then every `every`.
pub async fn sweep_expired(state: AppState, every: Duration) {
    let mut ticker = time::interval(every);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        sweep_expired_once(&state).await;
    }
}

/// Drops rate-limit keys that have been idle for `idle_multiple` windows.
pub async fn evict_idle_clients(limiter: EndpointRateLimiter, every: Duration, idle_multiple: u32) {
    let mut ticker = time::interval(every);
    // The first tick completes immediately and there is nothing to evict yet.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let evicted = limiter.evict_idle_all(idle_multiple);
        if evicted > 0 {
            tracing::debug!("Evicted {} idle rate-limit entries, {} tracked", evicted, limiter.tracked_keys());
        }
    }
}

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::pool::PoolStatus;

/// Operational counters shared by handlers and background tasks.
#[derive(Clone)]
pub struct Metrics {
    pub uploads: Arc<AtomicU64>,
    pub upload_failures: Arc<AtomicU64>,
    pub bytes_uploaded: Arc<AtomicU64>,
    pub downloads: Arc<AtomicU64>,
    pub deletions: Arc<AtomicU64>,
    pub compressions: Arc<AtomicU64>,
    pub throttled: Arc<AtomicU64>,
    pub expired_purged: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            uploads: Arc::new(AtomicU64::new(0)),
            upload_failures: Arc::new(AtomicU64::new(0)),
            bytes_uploaded: Arc::new(AtomicU64::new(0)),
            downloads: Arc::new(AtomicU64::new(0)),
            deletions: Arc::new(AtomicU64::new(0)),
            compressions: Arc::new(AtomicU64::new(0)),
            throttled: Arc::new(AtomicU64::new(0)),
            expired_purged: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn record_upload(&self, bytes: u64) {
        self.uploads.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_upload_failures(&self) {
        self.upload_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_downloads(&self) {
        self.downloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_deletions(&self) {
        self.deletions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_compressions(&self) {
        self.compressions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_throttled(&self) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_expired_purged(&self, count: u64) {
        self.expired_purged.fetch_add(count, Ordering::Relaxed);
    }

    /// Pool figures come from the metadata store, which owns the pool.
    pub fn get_snapshot(&self, pool: PoolStatus, pool_timeouts: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            uploads: self.uploads.load(Ordering::Relaxed),
            upload_failures: self.upload_failures.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            deletions: self.deletions.load(Ordering::Relaxed),
            compressions: self.compressions.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            pool_timeouts,
            expired_purged: self.expired_purged.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            pool,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub uploads: u64,
    pub upload_failures: u64,
    pub bytes_uploaded: u64,
    pub downloads: u64,
    pub deletions: u64,
    pub compressions: u64,
    pub throttled: u64,
    pub pool_timeouts: u64,
    pub expired_purged: u64,
    pub uptime_seconds: u64,
    pub pool: PoolStatus,
}

impl MetricsSnapshot {
    /// Prometheus text exposition format.
    pub fn to_prometheus(&self) -> String {
        let counters = [
            ("uploads_total", "Files uploaded", self.uploads),
            ("upload_failures_total", "Uploads rejected or failed", self.upload_failures),
            ("uploaded_bytes_total", "Bytes written by uploads", self.bytes_uploaded),
            ("downloads_total", "Files served", self.downloads),
            ("deletions_total", "Files deleted via the API", self.deletions),
            ("compressions_total", "Images recompressed", self.compressions),
            ("throttled_total", "Requests rejected by the rate limiter", self.throttled),
            ("pool_timeouts_total", "Database connection acquisitions that timed out", self.pool_timeouts),
            ("expired_purged_total", "Expired records removed", self.expired_purged),
        ];
        let gauges = [
            ("uptime_seconds", "Uptime seconds", self.uptime_seconds),
            ("pool_max_connections", "Connection pool capacity", self.pool.max_size as u64),
            ("pool_open_connections", "Open database connections", self.pool.open as u64),
            ("pool_idle_connections", "Idle database connections", self.pool.idle as u64),
            ("pool_in_use_connections", "Leased database connections", self.pool.in_use as u64),
        ];

        let mut body = String::new();
        for (kind, entries) in [("counter", &counters[..]), ("gauge", &gauges[..])] {
            for (name, help, value) in entries {
                body.push_str(&format!(
                    "# HELP ablage_{name} {help}\n# TYPE ablage_{name} {kind}\nablage_{name} {value}\n"
                ));
            }
        }
        body
    }
}

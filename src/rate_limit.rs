//! Per-client fixed-window request throttling.
//!
//! A [`RateLimiter`] keeps one counter per client key. The first request of a
//! key opens a window; every request inside the window bumps the counter and
//! is rejected once the counter passes the limit. The next request after the
//! window has run out opens a fresh one.
//!
//! Fixed windows allow a burst of up to twice the limit across a window edge
//! (the tail of one window plus the head of the next). This is accepted.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};

/// Outcome of a single [`RateLimiter::admit`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Rejected {
        /// Whole seconds until the current window closes, at least 1.
        retry_after_secs: u64,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Requests allowed per window for one throttle scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatePolicy {
    pub limit: u32,
    pub window_seconds: u64,
}

impl RatePolicy {
    pub const fn new(limit: u32, window_seconds: u64) -> Self {
        Self { limit, window_seconds }
    }
}

#[derive(Debug, Clone, Copy)]
struct RateLimitEntry {
    window_start: Instant,
    window: Duration,
    count: u32,
    last_seen: Instant,
}

impl RateLimitEntry {
    fn fresh(now: Instant, window: Duration) -> Self {
        Self { window_start: now, window, count: 0, last_seen: now }
    }
}

/// A thread-safe fixed-window rate limiter keyed by an opaque client key.
///
/// The whole table sits behind one mutex. `admit` holds it only for a hash
/// lookup and a few arithmetic operations, never across an await point, so
/// the read-increment-compare sequence for a key is atomic and eviction can
/// never observe a half-updated entry.
#[derive(Clone)]
pub struct RateLimiter {
    entries: Arc<Mutex<HashMap<String, RateLimitEntry>>>,
    clock: Arc<dyn Clock>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Creates a limiter driven by the process clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { entries: Arc::new(Mutex::new(HashMap::new())), clock }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, RateLimitEntry>> {
        // Entries are plain data; a panic elsewhere cannot leave one torn.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Counts one request for `client_key` and decides whether it may pass.
    ///
    /// # Arguments
    ///
    /// * `client_key` - Identity of the caller, usually its IP address.
    /// * `limit` - Requests allowed per window.
    /// * `window_seconds` - Length of the counting window.
    pub fn admit(&self, client_key: &str, limit: u32, window_seconds: u64) -> Decision {
        let window = Duration::from_secs(window_seconds);
        let mut entries = self.table();
        // Read the clock under the lock so timestamps in the table never go backwards.
        let now = self.clock.now();

        let entry = entries
            .entry(client_key.to_owned())
            .or_insert_with(|| RateLimitEntry::fresh(now, window));

        let elapsed = now.saturating_duration_since(entry.window_start);
        if entry.window != window || elapsed >= window {
            *entry = RateLimitEntry::fresh(now, window);
        }
        entry.count = entry.count.saturating_add(1);
        entry.last_seen = now;

        if entry.count > limit {
            let remaining = window.saturating_sub(now.saturating_duration_since(entry.window_start));
            Decision::Rejected { retry_after_secs: ceil_secs(remaining).max(1) }
        } else {
            Decision::Allowed
        }
    }

    /// Drops keys that have been idle for `idle_multiple` windows or longer.
    ///
    /// Returns the number of evicted keys.
    pub fn evict_idle(&self, idle_multiple: u32) -> usize {
        let mut entries = self.table();
        let now = self.clock.now();
        let before = entries.len();
        entries.retain(|_, e| {
            let horizon = e.window.saturating_mul(idle_multiple.max(1));
            now.saturating_duration_since(e.last_seen) < horizon
        });
        before - entries.len()
    }

    /// Number of tracked client keys.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

/// A set of named throttle scopes, each with its own table and policy.
///
/// Scopes are fixed when the limiter is built; a scope that was never
/// configured lets every request through.
#[derive(Clone, Default)]
pub struct EndpointRateLimiter {
    scopes: Arc<HashMap<String, (RateLimiter, RatePolicy)>>,
}

impl EndpointRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces scopes, each backed by a limiter on the process clock.
    pub fn with_limits<'a>(self, limits: impl IntoIterator<Item = (&'a str, RatePolicy)>) -> Self {
        self.with_limits_and_clock(limits, Arc::new(SystemClock))
    }

    pub fn with_limits_and_clock<'a>(
        mut self,
        limits: impl IntoIterator<Item = (&'a str, RatePolicy)>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let scopes = Arc::make_mut(&mut self.scopes);
        for (scope, policy) in limits {
            scopes.insert(scope.to_string(), (RateLimiter::with_clock(clock.clone()), policy));
        }
        self
    }

    /// Admits or rejects one request for `client_key` within `scope`.
    pub fn check(&self, scope: &str, client_key: &str) -> Decision {
        match self.scopes.get(scope) {
            Some((limiter, policy)) => limiter.admit(client_key, policy.limit, policy.window_seconds),
            None => Decision::Allowed,
        }
    }

    pub fn policy(&self, scope: &str) -> Option<RatePolicy> {
        self.scopes.get(scope).map(|(_, p)| *p)
    }

    /// Evicts idle keys from every scope, returning the total evicted.
    pub fn evict_idle_all(&self, idle_multiple: u32) -> usize {
        self.scopes.values().map(|(limiter, _)| limiter.evict_idle(idle_multiple)).sum()
    }

    /// Total number of tracked keys across all scopes.
    pub fn tracked_keys(&self) -> usize {
        self.scopes.values().map(|(limiter, _)| limiter.len()).sum()
    }
}

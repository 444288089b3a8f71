//! A bounded pool of reusable database connections.
//!
//! The pool hands out at most `max_size` connections at a time. Admission is
//! gated by a [`tokio::sync::Semaphore`] holding one permit per slot: a caller
//! first waits for a permit, then takes an idle connection or opens a new one
//! through its [`ConnectionManager`]. The permit travels with the
//! [`PooledConnection`] guard and is returned when the guard drops, which
//! wakes exactly one waiting caller. Waiters are served in arrival order.
//!
//! Connections are opened lazily. A connection the caller marks as broken is
//! closed instead of going back to the idle list; its slot is freed, so the
//! next caller opens a replacement and the pool never holds more than
//! `max_size` live connections.

use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Opens physical connections for a [`ConnectionPool`].
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    type Connection: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn connect(&self) -> Result<Self::Connection, Self::Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// No connection became free within the caller's timeout.
    #[error("connection pool exhausted after waiting {waited:?}")]
    Exhausted { waited: Duration },
    /// A fresh connection could not be opened.
    #[error("failed to open database connection: {0}")]
    Connect(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("connection pool is closed")]
    Closed,
}

/// Point-in-time occupancy of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub max_size: usize,
    pub open: usize,
    pub idle: usize,
    pub in_use: usize,
}

struct PoolInner<M: ConnectionManager> {
    manager: M,
    max_size: usize,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<M::Connection>>,
    open: AtomicUsize,
}

impl<M: ConnectionManager> PoolInner<M> {
    fn idle(&self) -> MutexGuard<'_, Vec<M::Connection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A cloneable handle to a shared connection pool.
pub struct ConnectionPool<M: ConnectionManager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ConnectionManager> Clone for ConnectionPool<M> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<M: ConnectionManager> fmt::Debug for ConnectionPool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool").field("status", &self.status()).finish()
    }
}

impl<M: ConnectionManager> ConnectionPool<M> {
    /// Creates a pool that opens up to `max_size` connections on demand.
    pub fn new(manager: M, max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                manager,
                max_size,
                permits: Arc::new(Semaphore::new(max_size)),
                idle: Mutex::new(Vec::with_capacity(max_size)),
                open: AtomicUsize::new(0),
            }),
        }
    }

    /// Opens `count` connections up front (capped at the pool size).
    pub async fn warm_up(&self, count: usize) -> Result<(), PoolError> {
        let mut leased = Vec::with_capacity(count.min(self.inner.max_size));
        for _ in 0..count.min(self.inner.max_size) {
            leased.push(self.acquire(Duration::ZERO).await?);
        }
        drop(leased);
        Ok(())
    }

    /// Leases a connection, waiting at most `timeout` for a free slot.
    ///
    /// A zero timeout never waits. Dropping the returned future while it
    /// waits gives up the place in the queue without consuming a slot.
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledConnection<M>, PoolError> {
        let permit = if timeout.is_zero() {
            match self.inner.permits.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(TryAcquireError::NoPermits) => return Err(PoolError::Exhausted { waited: timeout }),
                Err(TryAcquireError::Closed) => return Err(PoolError::Closed),
            }
        } else {
            match tokio::time::timeout(timeout, self.inner.permits.clone().acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(PoolError::Closed),
                Err(_) => return Err(PoolError::Exhausted { waited: timeout }),
            }
        };

        let reused = self.inner.idle().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                // The permit is dropped on error, freeing the slot again.
                let conn = self
                    .inner
                    .manager
                    .connect()
                    .await
                    .map_err(|e| PoolError::Connect(Box::new(e)))?;
                let open = self.inner.open.fetch_add(1, Ordering::AcqRel) + 1;
                tracing::debug!("opened pooled connection ({}/{})", open, self.inner.max_size);
                conn
            }
        };

        Ok(PooledConnection { conn: Some(conn), permit: Some(permit), pool: self.inner.clone(), broken: false })
    }

    /// Returns a leased connection to the pool. Equivalent to dropping it.
    pub fn release(&self, conn: PooledConnection<M>) {
        drop(conn);
    }

    /// Stops handing out connections and closes the idle ones.
    ///
    /// Waiting and future callers get [`PoolError::Closed`]. Connections that
    /// are still leased are closed when their guards drop.
    pub fn close(&self) {
        self.inner.permits.close();
        let drained: Vec<_> = self.inner.idle().drain(..).collect();
        self.inner.open.fetch_sub(drained.len(), Ordering::AcqRel);
        drop(drained);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.permits.is_closed()
    }

    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }

    pub fn status(&self) -> PoolStatus {
        let max_size = self.inner.max_size;
        let in_use = max_size.saturating_sub(self.inner.permits.available_permits());
        PoolStatus {
            max_size,
            open: self.inner.open.load(Ordering::Acquire),
            idle: self.inner.idle().len(),
            in_use: if self.is_closed() { 0 } else { in_use },
        }
    }
}

/// A leased connection.
///
/// The guard is the only way to reach a pooled connection. Dropping it, on
/// any exit path, hands the connection back and frees its slot.
pub struct PooledConnection<M: ConnectionManager> {
    conn: Option<M::Connection>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner<M>>,
    broken: bool,
}

impl<M: ConnectionManager> PooledConnection<M> {
    /// Closes the connection instead of returning it to the idle list.
    ///
    /// Use this after an I/O failure left the connection unusable. The slot
    /// is freed immediately; the next caller opens a replacement.
    pub fn discard(mut self) {
        self.broken = true;
    }
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        // Only taken in Drop.
        self.conn.as_ref().unwrap_or_else(|| unreachable!("pooled connection used after release"))
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().unwrap_or_else(|| unreachable!("pooled connection used after release"))
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.broken || self.pool.permits.is_closed() {
                self.pool.open.fetch_sub(1, Ordering::AcqRel);
                if self.broken {
                    tracing::warn!("discarding broken pooled connection");
                }
                drop(conn);
            } else {
                self.pool.idle().push(conn);
            }
        }
        // The connection is back before the slot is, so the woken waiter finds it.
        drop(self.permit.take());
    }
}

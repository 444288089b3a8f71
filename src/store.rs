//! File metadata persisted in SQLite.
//!
//! Every operation leases exactly one pooled connection for the length of its
//! own statements and gives it back before returning, whatever the outcome.
//! A statement that fails because the connection broke is retried once on a
//! freshly opened connection; a second failure surfaces as
//! [`StoreError::StorageUnavailable`].

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use tokio::sync::mpsc;

use crate::{
    db::{self, SqlitePool},
    pool::PoolError,
    types::{now_millis, ContentTypeCount, FileMetadataRecord},
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("file already exists: {0}")]
    Conflict(String),
    #[error("invalid record: {0}")]
    Invalid(String),
    #[error("no database connection available after {0:?}")]
    PoolExhausted(Duration),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<PoolError> for StoreError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted { waited } => StoreError::PoolExhausted(waited),
            PoolError::Connect(e) => StoreError::StorageUnavailable(e.to_string()),
            PoolError::Closed => StoreError::StorageUnavailable("connection pool is closed".to_string()),
        }
    }
}

const RECORD_COLUMNS: &str =
    "path, original_name, content_type, size_bytes, created_at, expires_at, access_count, last_accessed";

enum Lookup {
    Found(FileMetadataRecord),
    Expired,
    Missing,
}

/// Metadata CRUD on top of a [`SqlitePool`].
#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
    acquire_timeout: Duration,
    expired_tx: Option<mpsc::UnboundedSender<String>>,
    pool_timeouts: Arc<AtomicU64>,
}

impl MetadataStore {
    pub fn new(pool: SqlitePool, acquire_timeout: Duration) -> Self {
        Self { pool, acquire_timeout, expired_tx: None, pool_timeouts: Arc::new(AtomicU64::new(0)) }
    }

    /// Sends the path of every record removed because it expired.
    pub fn with_expiry_notifier(mut self, tx: mpsc::UnboundedSender<String>) -> Self {
        self.expired_tx = Some(tx);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Operations that gave up waiting for a connection.
    pub fn pool_timeouts(&self) -> u64 {
        self.pool_timeouts.load(Ordering::Relaxed)
    }

    pub async fn init_schema(&self) -> anyhow::Result<()> {
        let mut conn = self.pool.acquire(self.acquire_timeout).await?;
        db::init_db(&mut conn).await
    }

    /// Runs `f` on a leased connection, replacing the connection once if it breaks.
    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send,
        F: for<'c> Fn(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, sqlx::Error>> + Send + Sync,
    {
        let mut replaced = false;
        loop {
            let mut conn = match self.pool.acquire(self.acquire_timeout).await {
                Ok(conn) => conn,
                Err(e) => {
                    if matches!(e, PoolError::Exhausted { .. }) {
                        self.pool_timeouts.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("{}: no database connection within {:?}", op, self.acquire_timeout);
                    }
                    return Err(e.into());
                }
            };
            let result = f(&mut *conn).await;
            match result {
                Ok(value) => return Ok(value),
                Err(e) if db::is_connection_failure(&e) => {
                    conn.discard();
                    if replaced {
                        tracing::error!("{}: replacement connection failed too: {}", op, e);
                        return Err(StoreError::StorageUnavailable(e.to_string()));
                    }
                    tracing::warn!("{}: connection failed ({}), retrying on a fresh one", op, e);
                    replaced = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn notify_expired(&self, path: &str) {
        if let Some(tx) = &self.expired_tx {
            // The reaper only goes away at shutdown.
            let _ = tx.send(path.to_owned());
        }
    }

    /// Whether `record` has passed its expiry time.
    pub fn is_expired(&self, record: &FileMetadataRecord) -> bool {
        record.is_expired_at(Utc::now())
    }

    /// Inserts a new record. Fails with `Conflict` if the path is taken.
    pub async fn create(&self, record: &FileMetadataRecord) -> Result<(), StoreError> {
        if record.path.trim().is_empty() {
            return Err(StoreError::Invalid("path must not be empty".into()));
        }
        if record.expires_at.is_some_and(|exp| exp < record.created_at) {
            return Err(StoreError::Invalid("expires_at must not precede created_at".into()));
        }

        let res = self.run("create", move |conn| Box::pin(insert_record(conn, record.clone()))).await;
        match res {
            Ok(()) => {
                tracing::info!("File {} added to metadata store", record.path);
                Ok(())
            }
            Err(StoreError::Database(e)) if db::is_unique_violation(&e) => {
                Err(StoreError::Conflict(record.path.clone()))
            }
            Err(e) => Err(e),
        }
    }

    /// Fetches a live record. Expired records read as `NotFound` and are
    /// deleted on the way out.
    pub async fn get_by_path(&self, path: &str) -> Result<FileMetadataRecord, StoreError> {
        let lookup = self.run("get_by_path", move |conn| Box::pin(lookup_record(conn, path.to_owned()))).await?;

        match lookup {
            Lookup::Found(record) => Ok(record),
            Lookup::Expired => {
                tracing::info!("File {} has expired", path);
                self.notify_expired(path);
                Err(StoreError::NotFound(path.to_owned()))
            }
            Lookup::Missing => Err(StoreError::NotFound(path.to_owned())),
        }
    }

    /// Removes a record. An expired record is removed too but answers
    /// `NotFound`, as it does for `get_by_path`; its bytes go to the reaper.
    pub async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let removed = self.run("delete", move |conn| Box::pin(delete_record(conn, path.to_owned()))).await?;
        match removed {
            None => Err(StoreError::NotFound(path.to_owned())),
            Some(expires_at) if expires_at.is_some_and(|exp| exp <= Utc::now()) => {
                tracing::info!("File {} had already expired", path);
                self.notify_expired(path);
                Err(StoreError::NotFound(path.to_owned()))
            }
            Some(_) => {
                tracing::info!("File {} deleted from metadata store", path);
                Ok(())
            }
        }
    }

    /// Bumps the access counter and last-access time.
    pub async fn record_access(&self, path: &str) -> Result<(), StoreError> {
        let affected = self.run("record_access", move |conn| Box::pin(touch_record(conn, path.to_owned()))).await?;
        if affected == 0 {
            return Err(StoreError::NotFound(path.to_owned()));
        }
        Ok(())
    }

    /// Replaces size and content type after the stored bytes changed.
    pub async fn update_content(&self, path: &str, size_bytes: i64, content_type: &str) -> Result<(), StoreError> {
        let affected = self
            .run("update_content", move |conn| {
                Box::pin(update_record(conn, path.to_owned(), size_bytes, content_type.to_owned()))
            })
            .await?;
        if affected == 0 {
            return Err(StoreError::NotFound(path.to_owned()));
        }
        Ok(())
    }

    /// Newest records first.
    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<FileMetadataRecord>, StoreError> {
        let limit = limit.clamp(1, 1000);
        let offset = offset.max(0);
        self.run("list", move |conn| Box::pin(list_records(conn, limit, offset))).await
    }

    pub async fn count_by_content_type(&self) -> Result<Vec<ContentTypeCount>, StoreError> {
        self.run("count_by_content_type", |conn| Box::pin(count_content_types(conn))).await
    }

    /// Deletes every expired record and returns their paths.
    pub async fn purge_expired(&self) -> Result<Vec<String>, StoreError> {
        let paths = self.run("purge_expired", |conn| Box::pin(delete_expired(conn))).await?;
        if !paths.is_empty() {
            tracing::info!("Deleted {} expired files", paths.len());
        }
        for path in &paths {
            self.notify_expired(path);
        }
        Ok(paths)
    }
}

async fn insert_record(conn: &mut SqliteConnection, rec: FileMetadataRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO files (path, original_name, content_type, size_bytes, created_at, expires_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
    )
    .bind(rec.path)
    .bind(rec.original_name)
    .bind(rec.content_type)
    .bind(rec.size_bytes)
    .bind(rec.created_at.timestamp_millis())
    .bind(rec.expires_at.map(|e| e.timestamp_millis()))
    .execute(conn)
    .await?;
    Ok(())
}

async fn lookup_record(conn: &mut SqliteConnection, path: String) -> Result<Lookup, sqlx::Error> {
    let query = format!("SELECT {RECORD_COLUMNS} FROM files WHERE path = ?1");
    let row = sqlx::query(&query).bind(&path).fetch_optional(&mut *conn).await?;
    let Some(row) = row else {
        return Ok(Lookup::Missing);
    };
    let record = record_from_row(&row)?;
    let now = Utc::now();
    if !record.is_expired_at(now) {
        return Ok(Lookup::Found(record));
    }

    // Best effort: the read already answered NotFound.
    let deleted = sqlx::query("DELETE FROM files WHERE path = ?1 AND expires_at <= ?2")
        .bind(&path)
        .bind(now.timestamp_millis())
        .execute(&mut *conn)
        .await;
    if let Err(e) = deleted {
        tracing::warn!("Failed to delete expired record {}: {}", path, e);
    }
    Ok(Lookup::Expired)
}

/// `None` if there was no record, else the removed record's expiry.
async fn delete_record(
    conn: &mut SqliteConnection,
    path: String,
) -> Result<Option<Option<DateTime<Utc>>>, sqlx::Error> {
    let expires_at = sqlx::query_scalar::<_, Option<i64>>("DELETE FROM files WHERE path = ?1 RETURNING expires_at")
        .bind(path)
        .fetch_optional(conn)
        .await?;
    expires_at.map(|exp| exp.map(from_millis).transpose()).transpose()
}

async fn touch_record(conn: &mut SqliteConnection, path: String) -> Result<u64, sqlx::Error> {
    let res = sqlx::query("UPDATE files SET access_count = access_count + 1, last_accessed = ?2 WHERE path = ?1")
        .bind(path)
        .bind(now_millis().timestamp_millis())
        .execute(conn)
        .await?;
    Ok(res.rows_affected())
}

async fn update_record(
    conn: &mut SqliteConnection,
    path: String,
    size_bytes: i64,
    content_type: String,
) -> Result<u64, sqlx::Error> {
    let res = sqlx::query("UPDATE files SET size_bytes = ?2, content_type = ?3 WHERE path = ?1")
        .bind(path)
        .bind(size_bytes)
        .bind(content_type)
        .execute(conn)
        .await?;
    Ok(res.rows_affected())
}

async fn list_records(
    conn: &mut SqliteConnection,
    limit: i64,
    offset: i64,
) -> Result<Vec<FileMetadataRecord>, sqlx::Error> {
    let query = format!("SELECT {RECORD_COLUMNS} FROM files ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2");
    let rows = sqlx::query(&query).bind(limit).bind(offset).fetch_all(conn).await?;
    rows.iter().map(record_from_row).collect()
}

async fn count_content_types(conn: &mut SqliteConnection) -> Result<Vec<ContentTypeCount>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT content_type, COUNT(*) AS count FROM files GROUP BY content_type ORDER BY count DESC, content_type",
    )
    .fetch_all(conn)
    .await?;
    rows.iter()
        .map(|row| {
            Ok::<_, sqlx::Error>(ContentTypeCount {
                content_type: row.try_get("content_type")?,
                count: row.try_get("count")?,
            })
        })
        .collect()
}

async fn delete_expired(conn: &mut SqliteConnection) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>("DELETE FROM files WHERE expires_at IS NOT NULL AND expires_at <= ?1 RETURNING path")
        .bind(Utc::now().timestamp_millis())
        .fetch_all(conn)
        .await
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| sqlx::Error::Decode(format!("timestamp out of range: {ms}").into()))
}

fn record_from_row(row: &SqliteRow) -> Result<FileMetadataRecord, sqlx::Error> {
    Ok(FileMetadataRecord {
        path: row.try_get("path")?,
        original_name: row.try_get("original_name")?,
        size_bytes: row.try_get("size_bytes")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        expires_at: row.try_get::<Option<i64>, _>("expires_at")?.map(from_millis).transpose()?,
        content_type: row.try_get("content_type")?,
        access_count: row.try_get("access_count")?,
        last_accessed: row.try_get::<Option<i64>, _>("last_accessed")?.map(from_millis).transpose()?,
    })
}

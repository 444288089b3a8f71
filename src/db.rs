use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous},
    ConnectOptions, SqliteConnection,
};

use crate::pool::{ConnectionManager, ConnectionPool};

pub type SqlitePool = ConnectionPool<SqliteManager>;

/// Opens connections to the metadata database file.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    options: SqliteConnectOptions,
}

impl SqliteManager {
    pub fn from_url(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            // SQLite has one writer; concurrent writers wait here instead of failing with SQLITE_BUSY.
            .busy_timeout(Duration::from_secs(10))
            .pragma("cache_size", "-65536") // ~64MB page cache
            .pragma("temp_store", "MEMORY");
        Ok(Self { options })
    }
}

#[async_trait]
impl ConnectionManager for SqliteManager {
    type Connection = SqliteConnection;
    type Error = sqlx::Error;

    async fn connect(&self) -> Result<SqliteConnection, sqlx::Error> {
        self.options.connect().await
    }
}

/// Whether `err` means the connection itself is unusable, as opposed to a
/// statement failing on a healthy connection.
pub fn is_connection_failure(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::Protocol(_) | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            // Primary result codes: IOERR, CORRUPT, CANTOPEN, NOTADB
            .map(|code| matches!(code & 0xff, 10 | 11 | 14 | 26))
            .unwrap_or(false),
        _ => false,
    }
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

pub async fn init_db(conn: &mut SqliteConnection) -> anyhow::Result<()> {
    // Timestamps are unix milliseconds (UTC).
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            original_name TEXT NOT NULL,
            content_type TEXT NOT NULL,
            size_bytes INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NULL,
            access_count INTEGER NOT NULL DEFAULT 0,
            last_accessed INTEGER NULL,
            CHECK (expires_at IS NULL OR expires_at >= created_at)
        )"#,
    )
    .execute(&mut *conn)
    .await?;

    let indexes = [
        (
            "idx_files_expires",
            "CREATE INDEX IF NOT EXISTS idx_files_expires ON files(expires_at) WHERE expires_at IS NOT NULL",
        ),
        ("idx_files_created", "CREATE INDEX IF NOT EXISTS idx_files_created ON files(created_at DESC)"),
        ("idx_files_content_type", "CREATE INDEX IF NOT EXISTS idx_files_content_type ON files(content_type)"),
    ];

    for (name, query) in indexes {
        if let Err(e) = sqlx::query(query).execute(&mut *conn).await {
            tracing::warn!("Failed to create index {}: {}", name, e);
        }
    }

    Ok(())
}

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection, Executor};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::RecordSink;
use crate::connection::ConnectionState;
use crate::error::StorageError;
use crate::record::LogRecord;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS serial_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
    data TEXT,
    data_type TEXT,
    raw_bytes TEXT,
    byte_count INTEGER
)";

const INSERT: &str =
    "INSERT INTO serial_logs (data, data_type, raw_bytes, byte_count) VALUES (?, ?, ?, ?)";

/// Single-file store behind one connection. A failed insert is reported to the caller
/// and not retried here.
pub struct SqliteSink {
    path: PathBuf,
    conn: Mutex<Option<SqliteConnection>>,
    state: ConnectionState,
}

impl SqliteSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StorageError::Connect(sqlx::Error::Io(err)))?;
        }
        let conn = connect(&path).await?;
        tracing::info!(db = %path.display(), "sqlite database ready");
        Ok(Self {
            path,
            conn: Mutex::new(Some(conn)),
            state: ConnectionState::opened(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn connect(path: &Path) -> Result<SqliteConnection, StorageError> {
    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .connect()
        .await
        .map_err(StorageError::Connect)?;
    conn.execute(SCHEMA).await.map_err(StorageError::Schema)?;
    Ok(conn)
}

#[async_trait]
impl RecordSink for SqliteSink {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn is_connected(&self) -> bool {
        self.state.is_open()
    }

    async fn append(&self, record: &LogRecord) -> Result<(), StorageError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StorageError::Closed)?;
        let result = sqlx::query(INSERT)
            .bind(&record.data)
            .bind(record.data_type.as_str())
            .bind(&record.raw_bytes)
            .bind(record.byte_count as i64)
            .execute(&mut *conn)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                self.state.record_error(&err);
                Err(StorageError::Insert(err))
            }
        }
    }

    async fn reconnect(&self) -> bool {
        let mut guard = self.conn.lock().await;
        if let Some(old) = guard.take() {
            if let Err(err) = old.close().await {
                tracing::debug!(db = %self.path.display(), error = %err, "closing stale connection failed");
            }
        }
        match connect(&self.path).await {
            Ok(conn) => {
                *guard = Some(conn);
                self.state.mark_open();
                tracing::info!(db = %self.path.display(), "sqlite reconnected");
                true
            }
            Err(err) => {
                tracing::warn!(db = %self.path.display(), error = %err, "sqlite reconnect failed");
                self.state.mark_failed(&err);
                false
            }
        }
    }

    async fn close(&self) -> bool {
        let mut guard = self.conn.lock().await;
        let Some(conn) = guard.take() else {
            return false;
        };
        self.state.mark_closed();
        if let Err(err) = conn.close().await {
            tracing::warn!(db = %self.path.display(), error = %err, "sqlite close failed");
        }
        true
    }
}

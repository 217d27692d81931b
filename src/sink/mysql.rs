use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::{ConnectOptions, Connection, Executor};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use super::RecordSink;
use crate::config::MySqlConfig;
use crate::connection::ConnectionState;
use crate::error::StorageError;
use crate::record::LogRecord;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS serial_logs (
    id INT AUTO_INCREMENT PRIMARY KEY,
    timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
    data TEXT,
    data_type VARCHAR(50),
    raw_bytes LONGTEXT,
    byte_count INT,
    antenna INT NULL,
    INDEX idx_timestamp (timestamp),
    INDEX idx_data_type (data_type),
    INDEX idx_antenna (antenna)
)";

const INSERT: &str = "INSERT INTO serial_logs (data, data_type, raw_bytes, byte_count, antenna) \
                      VALUES (?, ?, ?, ?, ?)";

/// Networked store behind a small connection pool. A failed insert triggers one
/// reconnect and, if that works, one more insert attempt.
pub struct MySqlSink {
    config: MySqlConfig,
    pool: RwLock<Option<MySqlPool>>,
    state: ConnectionState,
    closed: AtomicBool,
}

impl MySqlSink {
    /// Creates the database if needed, opens the pool and ensures the table exists.
    pub async fn connect(config: MySqlConfig) -> Result<Self, StorageError> {
        let connect_timeout = Duration::from_secs(config.connect_timeout_seconds);
        let mut server = tokio::time::timeout(connect_timeout, server_options(&config).connect())
            .await
            .map_err(|_| StorageError::Connect(sqlx::Error::PoolTimedOut))?
            .map_err(StorageError::Connect)?;
        server
            .execute(create_database_sql(&config.database).as_str())
            .await
            .map_err(StorageError::Schema)?;
        if let Err(err) = server.close().await {
            tracing::debug!(error = %err, "closing bootstrap connection failed");
        }

        let pool = open_pool(&config).await?;
        pool.execute(SCHEMA).await.map_err(StorageError::Schema)?;
        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "mysql database ready"
        );

        Ok(Self {
            config,
            pool: RwLock::new(Some(pool)),
            state: ConnectionState::opened(),
            closed: AtomicBool::new(false),
        })
    }

    async fn insert(&self, record: &LogRecord) -> Result<(), StorageError> {
        let pool = self.pool.read().await.clone().ok_or(StorageError::Closed)?;
        sqlx::query(INSERT)
            .bind(&record.data)
            .bind(record.data_type.as_str())
            .bind(&record.raw_bytes)
            .bind(record.byte_count as i64)
            .bind(record.antenna.map(|antenna| i32::from(antenna.number())))
            .execute(&pool)
            .await
            .map_err(StorageError::Insert)?;
        Ok(())
    }
}

/// Runs `insert`; after a failure calls `reconnect` once and, only if that worked,
/// inserts one more time. A failed reconnect returns the original error.
async fn insert_with_one_reconnect<I, IFut, R, RFut>(
    mut insert: I,
    reconnect: R,
) -> Result<(), StorageError>
where
    I: FnMut() -> IFut,
    IFut: Future<Output = Result<(), StorageError>>,
    R: FnOnce(&StorageError) -> RFut,
    RFut: Future<Output = bool>,
{
    let err = match insert().await {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };
    if reconnect(&err).await {
        insert().await
    } else {
        Err(err)
    }
}

fn server_options(config: &MySqlConfig) -> MySqlConnectOptions {
    let options = MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .charset(&config.charset);
    if config.password.is_empty() {
        options
    } else {
        options.password(&config.password)
    }
}

fn create_database_sql(database: &str) -> String {
    format!(
        "CREATE DATABASE IF NOT EXISTS `{}`",
        database.replace('`', "``")
    )
}

async fn open_pool(config: &MySqlConfig) -> Result<MySqlPool, StorageError> {
    MySqlPoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .connect_with(server_options(config).database(&config.database))
        .await
        .map_err(StorageError::Connect)
}

#[async_trait]
impl RecordSink for MySqlSink {
    fn describe(&self) -> String {
        format!(
            "{}:{}/{}",
            self.config.host, self.config.port, self.config.database
        )
    }

    fn is_connected(&self) -> bool {
        self.state.is_open()
    }

    async fn append(&self, record: &LogRecord) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        insert_with_one_reconnect(
            || self.insert(record),
            |err| {
                tracing::warn!(sink = %self.describe(), error = %err, "mysql insert failed, reconnecting");
                self.state.record_error(err);
                self.reconnect()
            },
        )
        .await
    }

    async fn reconnect(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let mut guard = self.pool.write().await;
        if let Some(old) = guard.take() {
            old.close().await;
        }
        match open_pool(&self.config).await {
            Ok(pool) => {
                *guard = Some(pool);
                self.state.mark_open();
                tracing::info!(sink = %self.describe(), "mysql reconnection successful");
                true
            }
            Err(err) => {
                tracing::error!(sink = %self.describe(), error = %err, "mysql reconnection failed");
                self.state.mark_failed(&err);
                false
            }
        }
    }

    async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
        self.state.mark_closed();
        true
    }
}

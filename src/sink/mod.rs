//! Database sinks for log records.
//!
//! Both backends write the same `serial_logs` table (the MySQL one adds an `antenna`
//! column and read-path indexes). The column set is the contract with whatever runs
//! queries against the table, so changes here must stay additive.

mod mysql;
mod sqlite;

pub use mysql::MySqlSink;
pub use sqlite::SqliteSink;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::LogRecord;

/// Append-only destination for [`LogRecord`]s.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Short human-readable location, e.g. a file path or `host:port/db`.
    fn describe(&self) -> String;

    fn is_connected(&self) -> bool;

    async fn append(&self, record: &LogRecord) -> Result<(), StorageError>;

    /// Re-establishes the connection. Never fails loudly; the outcome is the return value.
    async fn reconnect(&self) -> bool;

    /// Releases the connection. Returns true only for the call that actually closed it.
    async fn close(&self) -> bool;
}

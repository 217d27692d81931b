use std::io;
use thiserror::Error;

/// Failures of the serial link: opening, reading or writing the device.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: tokio_serial::Error,
    },

    #[error("failed to open capture {port}: {source}")]
    OpenCapture {
        port: String,
        #[source]
        source: io::Error,
    },

    #[error("serial port {0} is closed")]
    Closed(String),

    #[error("serial port disconnected")]
    Disconnected,

    #[error("serial i/o failed: {0}")]
    Io(#[from] io::Error),
}

impl PortError {
    /// Errors that only mean "no data this time" and leave the link usable.
    pub fn is_transient(&self) -> bool {
        match self {
            PortError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

/// Failures talking to the database behind a record sink.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database connection failed: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("schema setup failed: {0}")]
    Schema(#[source] sqlx::Error),

    #[error("insert failed: {0}")]
    Insert(#[source] sqlx::Error),

    #[error("database connection is closed")]
    Closed,
}

/// Operator input the console could not interpret. Always recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleInputError {
    #[error("unrecognized command '{0}'")]
    Unrecognized(String),

    #[error("antenna must be 1 or 2, got '{0}'")]
    InvalidAntenna(String),
}

pub mod cli;
pub mod config;
pub mod connection;
pub mod console;
pub mod error;
pub mod logger;
pub mod logging;
pub mod monitor;
pub mod record;
pub mod serial;
pub mod sink;
pub mod stats;

pub use config::AppConfig;
pub use error::{ConsoleInputError, PortError, StorageError};
pub use logger::{SerialLogger, Variant};
pub use record::{Antenna, DataType, LogRecord};
pub use serial::PortSession;

use std::fmt::{self, Write as _};
use std::str::FromStr;

use crate::error::ConsoleInputError;

/// How a persisted row came to exist. Stored as the snake_case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    AutoReceived,
    BinaryReceived,
    CommandSent,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::AutoReceived => "auto_received",
            DataType::BinaryReceived => "binary_received",
            DataType::CommandSent => "command_sent",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiving antenna selected by the operator in the antenna logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Antenna {
    #[default]
    One,
    Two,
}

impl Antenna {
    pub fn number(self) -> u8 {
        match self {
            Antenna::One => 1,
            Antenna::Two => 2,
        }
    }
}

impl TryFrom<u8> for Antenna {
    type Error = ConsoleInputError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Antenna::One),
            2 => Ok(Antenna::Two),
            other => Err(ConsoleInputError::InvalidAntenna(other.to_string())),
        }
    }
}

impl FromStr for Antenna {
    type Err = ConsoleInputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(Antenna::One),
            "2" => Ok(Antenna::Two),
            other => Err(ConsoleInputError::InvalidAntenna(other.to_string())),
        }
    }
}

impl fmt::Display for Antenna {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// One row of the `serial_logs` table. The timestamp column is filled in by the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub data: String,
    pub data_type: DataType,
    pub raw_bytes: String,
    pub byte_count: usize,
    pub antenna: Option<Antenna>,
}

impl LogRecord {
    /// Builds the record for a chunk read from the port. Printable UTF-8 is kept as
    /// trimmed text; anything else is stored as its hex encoding.
    pub fn classify(bytes: &[u8], antenna: Option<Antenna>) -> Self {
        let raw_bytes = to_hex(bytes);
        let (data, data_type) = match decode_text(bytes) {
            Some(text) => (text.trim().to_string(), DataType::AutoReceived),
            None => (raw_bytes.clone(), DataType::BinaryReceived),
        };
        Self {
            data,
            data_type,
            raw_bytes,
            byte_count: bytes.len(),
            antenna,
        }
    }

    /// Builds the record for a command written to the device. `wire` is what went out,
    /// terminator included.
    pub fn command_sent(command: &str, wire: &[u8]) -> Self {
        Self {
            data: command.to_string(),
            data_type: DataType::CommandSent,
            raw_bytes: to_hex(wire),
            byte_count: wire.len(),
            antenna: None,
        }
    }
}

/// UTF-8 whose only control characters are tab, CR and LF.
fn decode_text(bytes: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(bytes).ok()?;
    text.chars()
        .all(|c| !c.is_control() || matches!(c, '\t' | '\r' | '\n'))
        .then_some(text)
}

/// Lowercase hex, two digits per byte.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

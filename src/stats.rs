use chrono::{DateTime, Local};
use std::fmt;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};
use std::time::{Duration, Instant};

use crate::record::Antenna;

/// Reception counters. Only the monitor task writes them (`record_*`); every other
/// holder of the `Arc` reads through [`Statistics::snapshot`]. Counts are taken when a
/// chunk is received, whether or not it was persisted.
pub struct Statistics {
    messages_received: AtomicU64,
    bytes_received: AtomicU64,
    persistence_errors: AtomicU64,
    started: Instant,
    last_data: Mutex<Option<DateTime<Local>>>,
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            persistence_errors: AtomicU64::new(0),
            started: Instant::now(),
            last_data: Mutex::new(None),
        }
    }

    pub fn record_received(&self, byte_count: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(byte_count as u64, Ordering::Relaxed);
        if let Ok(mut guard) = self.last_data.lock() {
            *guard = Some(Local::now());
        }
    }

    pub fn record_persistence_error(&self) {
        self.persistence_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            elapsed: self.started.elapsed(),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            persistence_errors: self.persistence_errors.load(Ordering::Relaxed),
            last_data: self.last_data.lock().ok().and_then(|guard| *guard),
            antenna: None,
        }
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub elapsed: Duration,
    pub messages_received: u64,
    pub bytes_received: u64,
    pub persistence_errors: u64,
    pub last_data: Option<DateTime<Local>>,
    /// Set by the antenna logger so the report shows the current tag.
    pub antenna: Option<Antenna>,
}

impl StatsSnapshot {
    pub fn with_antenna(mut self, antenna: Antenna) -> Self {
        self.antenna = Some(antenna);
        self
    }

    pub fn messages_per_second(&self) -> f64 {
        per_second(self.messages_received, self.elapsed)
    }

    pub fn bytes_per_second(&self) -> f64 {
        per_second(self.bytes_received, self.elapsed)
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "STATS: {} messages, {} bytes total",
            self.messages_received, self.bytes_received
        )?;
        write!(
            f,
            "   Elapsed: {:.1}s, rate: {:.2} msg/s, {:.1} bytes/s",
            self.elapsed.as_secs_f64(),
            self.messages_per_second(),
            self.bytes_per_second()
        )?;
        if self.persistence_errors > 0 {
            write!(f, "\n   Not persisted: {}", self.persistence_errors)?;
        }
        match self.last_data {
            Some(at) => write!(f, "\n   Last data: {}", at.format("%H:%M:%S"))?,
            None => write!(f, "\n   No data received yet")?,
        }
        if let Some(antenna) = self.antenna {
            write!(f, "\n   Current antenna: {antenna}")?;
        }
        Ok(())
    }
}

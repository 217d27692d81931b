use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{sleep, timeout},
};

use crate::error::PortError;
use crate::record::{Antenna, DataType, LogRecord};
use crate::serial::PortReader;
use crate::sink::RecordSink;
use crate::stats::Statistics;

/// Pause between polls when the port had nothing to offer.
pub const IDLE_SLEEP: Duration = Duration::from_millis(10);
/// Largest chunk taken from the port when no line terminator arrived.
pub const MAX_RAW_CHUNK: usize = 4096;
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Running,
    Stopped,
}

/// How received chunks are echoed to the operator's terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    Quiet,
    Verbose,
    Antenna,
}

impl Echo {
    pub fn describe(self, record: &LogRecord, at: DateTime<Local>) -> Option<String> {
        let stamp = at.format("%H:%M:%S%.3f");
        let count = record.byte_count;
        let antenna = record.antenna.unwrap_or_default();
        let line = match (self, record.data_type) {
            (Echo::Quiet, _) => return None,
            (Echo::Verbose, DataType::BinaryReceived) => {
                format!("[{stamp}] BINARY: {} (bytes: {count})", record.raw_bytes)
            }
            (Echo::Verbose, _) => format!("[{stamp}] RECEIVED: '{}' (bytes: {count})", record.data),
            (Echo::Antenna, DataType::BinaryReceived) => format!(
                "[{stamp}] ANTENNA {antenna} BINARY: {} (bytes: {count})",
                record.raw_bytes
            ),
            (Echo::Antenna, _) => {
                format!("[{stamp}] ANTENNA {antenna}: '{}' (bytes: {count})", record.data)
            }
        };
        Some(line)
    }
}

/// Background reception loop: port → classification → statistics → sink.
pub struct Monitor {
    reader: PortReader,
    sink: Arc<dyn RecordSink>,
    stats: Arc<Statistics>,
    antenna: Option<watch::Receiver<Antenna>>,
    echo: Echo,
    stats_report: Option<Duration>,
}

impl Monitor {
    pub fn new(reader: PortReader, sink: Arc<dyn RecordSink>, stats: Arc<Statistics>) -> Self {
        Self {
            reader,
            sink,
            stats,
            antenna: None,
            echo: Echo::Quiet,
            stats_report: None,
        }
    }

    /// Tags every record with the antenna currently published on `antenna`.
    pub fn with_antenna(mut self, antenna: watch::Receiver<Antenna>) -> Self {
        self.antenna = Some(antenna);
        self
    }

    pub fn with_echo(mut self, echo: Echo) -> Self {
        self.echo = echo;
        self
    }

    /// Prints a statistics report at this interval while running.
    pub fn with_stats_report(mut self, every: Option<Duration>) -> Self {
        self.stats_report = every.filter(|d| !d.is_zero());
        self
    }

    pub fn spawn(self) -> MonitorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let (state_tx, state_rx) = watch::channel(MonitorState::Running);
        let task = tokio::spawn(self.run(shutdown_rx, state_tx));
        MonitorHandle {
            shutdown: shutdown_tx,
            state: state_rx,
            task: Some(task),
        }
    }

    async fn run(
        mut self,
        mut shutdown: watch::Receiver<()>,
        state: watch::Sender<MonitorState>,
    ) -> Result<(), PortError> {
        tracing::info!(port = %self.reader.name(), sink = %self.sink.describe(), "monitor started");
        let mut last_report = Instant::now();

        let result = loop {
            if shutdown.has_changed().unwrap_or(true) {
                break Ok(());
            }
            let polled = tokio::select! {
                _ = shutdown.changed() => break Ok(()),
                polled = poll_chunk(&mut self.reader) => polled,
            };
            match polled {
                Ok(Some(chunk)) => self.handle_chunk(&chunk).await,
                Ok(None) => sleep(IDLE_SLEEP).await,
                Err(err) if err.is_transient() => {
                    tracing::debug!(port = %self.reader.name(), error = %err, "transient read error");
                    sleep(IDLE_SLEEP).await;
                }
                Err(err) => {
                    tracing::error!(port = %self.reader.name(), error = %err, "serial read failed, monitor stopping");
                    self.reader.state().mark_failed(&err);
                    break Err(err);
                }
            }
            if let Some(every) = self.stats_report {
                if last_report.elapsed() >= every {
                    println!("{}", self.stats.snapshot());
                    last_report = Instant::now();
                }
            }
        };

        state.send_replace(MonitorState::Stopped);
        tracing::info!(port = %self.reader.name(), "monitor stopped");
        result
    }

    async fn handle_chunk(&mut self, chunk: &[u8]) {
        let antenna = self.antenna.as_ref().map(|rx| *rx.borrow());
        let record = LogRecord::classify(chunk, antenna);
        self.stats.record_received(record.byte_count);
        if let Some(line) = self.echo.describe(&record, Local::now()) {
            println!("{line}");
        }
        tracing::debug!(
            data_type = %record.data_type,
            bytes = record.byte_count,
            antenna = ?record.antenna.map(Antenna::number),
            "chunk received"
        );
        if let Err(err) = self.sink.append(&record).await {
            self.stats.record_persistence_error();
            tracing::error!(
                sink = %self.sink.describe(),
                error = %err,
                data_type = %record.data_type,
                bytes = record.byte_count,
                "record dropped"
            );
        }
    }
}

/// A line if one completes within the read timeout, otherwise whatever raw bytes are
/// immediately available.
async fn poll_chunk(reader: &mut PortReader) -> Result<Option<Vec<u8>>, PortError> {
    if let Some(line) = reader.read_line().await? {
        return Ok(Some(line));
    }
    let raw = reader.read_bytes(MAX_RAW_CHUNK).await?;
    Ok((!raw.is_empty()).then_some(raw))
}

/// Owner's side of a spawned [`Monitor`].
pub struct MonitorHandle {
    shutdown: watch::Sender<()>,
    state: watch::Receiver<MonitorState>,
    task: Option<JoinHandle<Result<(), PortError>>>,
}

impl MonitorHandle {
    pub fn state(&self) -> MonitorState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == MonitorState::Running
    }

    pub fn watch_state(&self) -> watch::Receiver<MonitorState> {
        self.state.clone()
    }

    /// Signals the loop, waits for it to finish and returns the port error that ended it,
    /// if any. Later calls are no-ops.
    pub async fn stop(&mut self) -> Option<PortError> {
        let mut task = self.task.take()?;
        self.shutdown.send(()).ok();
        match timeout(JOIN_TIMEOUT, &mut task).await {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(err))) => Some(err),
            Ok(Err(join_err)) => {
                tracing::error!(error = %join_err, "monitor task failed");
                None
            }
            Err(_elapsed) => {
                tracing::warn!("monitor did not stop within {:?}, aborting", JOIN_TIMEOUT);
                task.abort();
                None
            }
        }
    }
}

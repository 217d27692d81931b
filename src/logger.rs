use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::connection::ConnectionState;
use crate::error::PortError;
use crate::monitor::{Echo, Monitor, MonitorHandle, MonitorState};
use crate::record::{Antenna, LogRecord};
use crate::serial::{PortReader, PortSession, PortWriter};
use crate::sink::RecordSink;
use crate::stats::{Statistics, StatsSnapshot};

/// Which of the two tools is running. Decides the console vocabulary and whether
/// records are tagged with an antenna.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// SQLite, verbose, raw command passthrough.
    Debug,
    /// MySQL, antenna tagging, no passthrough.
    Antenna,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// The reader was consumed by a monitor that has since died on a port error.
    PortUnavailable,
}

#[derive(Debug, Clone)]
pub struct PortReport {
    pub name: String,
    pub open: bool,
    pub monitor: MonitorState,
    pub last_error: Option<String>,
}

#[derive(Debug)]
pub struct ShutdownReport {
    pub port_closed: bool,
    pub sink_closed: bool,
    pub monitor_error: Option<PortError>,
    pub stats: StatsSnapshot,
}

/// Everything one logging session owns: both halves of the port, the sink, the
/// reception statistics and the monitor task. The console drives it.
pub struct SerialLogger {
    variant: Variant,
    reader: Option<PortReader>,
    writer: PortWriter,
    port_state: Arc<ConnectionState>,
    sink: Arc<dyn RecordSink>,
    stats: Arc<Statistics>,
    // Written only from the console side; the monitor holds a receiver.
    antenna: watch::Sender<Antenna>,
    monitor: Option<MonitorHandle>,
    echo: Echo,
    stats_report: Option<Duration>,
    shut_down: bool,
}

impl SerialLogger {
    pub fn new(session: PortSession, sink: Arc<dyn RecordSink>, variant: Variant) -> Self {
        let port_state = session.state();
        let (reader, writer) = session.into_split();
        let (antenna, _) = watch::channel(Antenna::default());
        let echo = match variant {
            Variant::Debug => Echo::Verbose,
            Variant::Antenna => Echo::Antenna,
        };
        Self {
            variant,
            reader: Some(reader),
            writer,
            port_state,
            sink,
            stats: Arc::new(Statistics::new()),
            antenna,
            monitor: None,
            echo,
            stats_report: None,
            shut_down: false,
        }
    }

    pub fn with_echo(mut self, echo: Echo) -> Self {
        self.echo = echo;
        self
    }

    pub fn with_stats_report(mut self, every: Option<Duration>) -> Self {
        self.stats_report = every;
        self
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn port_name(&self) -> &str {
        self.writer.name()
    }

    pub fn monitor_state(&self) -> MonitorState {
        self.monitor
            .as_ref()
            .map(MonitorHandle::state)
            .unwrap_or(MonitorState::Stopped)
    }

    /// Lets callers wait for the monitor to change state. `None` before the first start.
    pub fn watch_monitor(&self) -> Option<watch::Receiver<MonitorState>> {
        self.monitor.as_ref().map(MonitorHandle::watch_state)
    }

    pub fn start_monitoring(&mut self) -> StartOutcome {
        if self.monitor_state() == MonitorState::Running {
            return StartOutcome::AlreadyRunning;
        }
        let Some(reader) = self.reader.take() else {
            return StartOutcome::PortUnavailable;
        };
        let mut monitor = Monitor::new(reader, self.sink.clone(), self.stats.clone())
            .with_echo(self.echo)
            .with_stats_report(self.stats_report);
        if self.variant == Variant::Antenna {
            monitor = monitor.with_antenna(self.antenna.subscribe());
        }
        self.monitor = Some(monitor.spawn());
        StartOutcome::Started
    }

    pub fn antenna(&self) -> Antenna {
        *self.antenna.borrow()
    }

    /// Changes the tag for records received from now on. Does not disturb the monitor.
    pub fn set_antenna(&self, antenna: Antenna) {
        self.antenna.send_replace(antenna);
    }

    /// Writes `command` plus a newline to the device and logs it as `command_sent`.
    /// A failure to log is reported but does not fail the send.
    pub async fn send_command(&mut self, command: &str) -> Result<usize, PortError> {
        let wire = format!("{command}\n");
        let written = self.writer.write(wire.as_bytes()).await?;
        let record = LogRecord::command_sent(command, wire.as_bytes());
        if let Err(err) = self.sink.append(&record).await {
            tracing::error!(sink = %self.sink.describe(), error = %err, "sent command not logged");
        }
        Ok(written)
    }

    pub fn port_report(&self) -> PortReport {
        PortReport {
            name: self.port_name().to_string(),
            open: self.port_state.is_open(),
            monitor: self.monitor_state(),
            last_error: self.port_state.last_error(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        let snapshot = self.stats.snapshot();
        match self.variant {
            Variant::Antenna => snapshot.with_antenna(self.antenna()),
            Variant::Debug => snapshot,
        }
    }

    /// Stops the monitor, then closes the port and the sink. Only the first call does
    /// anything; later calls return `None`.
    pub async fn shutdown(&mut self) -> Option<ShutdownReport> {
        if self.shut_down {
            return None;
        }
        self.shut_down = true;

        let monitor_error = match self.monitor.as_mut() {
            Some(handle) => handle.stop().await,
            None => None,
        };
        // Drop an unused receive half too, or the device stays open.
        self.reader.take();
        let port_closed = self.writer.close().await;
        let sink_closed = self.sink.close().await;
        tracing::info!(port = %self.port_name(), sink = %self.sink.describe(), "logger shut down");

        Some(ShutdownReport {
            port_closed,
            sink_closed,
            monitor_error,
            stats: self.stats(),
        })
    }
}

use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{
    join, sink, split, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt,
    BufReader, ReadHalf, WriteHalf,
};
#[cfg(unix)]
use tokio::net::unix::pipe;
use tokio::time::timeout;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};

#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;

use crate::connection::ConnectionState;
use crate::error::PortError;

/// Upper bound on how long a single read waits for data.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Anything the session can read from and write to: a serial stream, a FIFO, or an
/// in-memory pipe in tests.
pub trait PortStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> PortStream for T {}

type BoxedStream = Box<dyn PortStream>;

/// An open serial connection, 8-N-1 with a fixed read timeout.
pub struct PortSession {
    reader: PortReader,
    writer: PortWriter,
}

impl PortSession {
    pub async fn open(port: &str, baud_rate: u32) -> Result<Self, PortError> {
        if let Some(kind) = capture_kind(port) {
            let stream = open_capture(port, kind)
                .await
                .map_err(|source| PortError::OpenCapture {
                    port: port.to_string(),
                    source,
                })?;
            return Ok(Self::from_boxed(port, stream));
        }

        let stream = tokio_serial::new(port, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open_native_async()
            .map_err(|source| PortError::Open {
                port: port.to_string(),
                source,
            })?;
        Ok(Self::from_stream(port, stream))
    }

    pub fn from_stream(name: &str, stream: impl PortStream + 'static) -> Self {
        Self::from_boxed(name, Box::new(stream))
    }

    fn from_boxed(name: &str, stream: BoxedStream) -> Self {
        let (read_half, write_half) = split(stream);
        let state = Arc::new(ConnectionState::opened());
        Self {
            reader: PortReader {
                name: name.to_string(),
                inner: BufReader::new(read_half),
                pending: Vec::with_capacity(256),
                state: state.clone(),
            },
            writer: PortWriter {
                name: name.to_string(),
                inner: Some(write_half),
                state,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.reader.name
    }

    pub fn is_open(&self) -> bool {
        self.reader.state.is_open()
    }

    pub fn state(&self) -> Arc<ConnectionState> {
        self.reader.state.clone()
    }

    pub async fn read_line(&mut self) -> Result<Option<Vec<u8>>, PortError> {
        self.reader.read_line().await
    }

    pub async fn read_bytes(&mut self, max_n: usize) -> Result<Vec<u8>, PortError> {
        self.reader.read_bytes(max_n).await
    }

    pub async fn write(&mut self, bytes: &[u8]) -> Result<usize, PortError> {
        self.writer.write(bytes).await
    }

    pub async fn close(&mut self) -> bool {
        self.writer.close().await
    }

    /// Separates the receive side (for the monitor task) from the transmit side.
    pub fn into_split(self) -> (PortReader, PortWriter) {
        (self.reader, self.writer)
    }
}

enum Capture {
    File,
    #[cfg(unix)]
    Fifo,
}

fn capture_kind(port: &str) -> Option<Capture> {
    let metadata = std::fs::metadata(port).ok()?;
    #[cfg(unix)]
    {
        if metadata.file_type().is_fifo() {
            return Some(Capture::Fifo);
        }
    }
    metadata.is_file().then_some(Capture::File)
}

/// Opens a capture for reading only. Commands written to it are discarded so the
/// replay is never disturbed.
async fn open_capture(port: &str, kind: Capture) -> io::Result<BoxedStream> {
    match kind {
        Capture::File => {
            let file = File::open(port).await?;
            Ok(Box::new(join(file, sink())))
        }
        #[cfg(unix)]
        Capture::Fifo => {
            // Non-blocking, so a silent FIFO never pins a blocking thread. Holding the
            // write side as well keeps the pipe alive between external writers.
            let mut options = pipe::OpenOptions::new();
            #[cfg(target_os = "linux")]
            options.read_write(true);
            let receiver = options.open_receiver(port)?;
            Ok(Box::new(join(receiver, sink())))
        }
    }
}

/// Receive half. Bytes of a line that has not been terminated yet are kept in
/// `pending` across timed-out reads.
pub struct PortReader {
    name: String,
    inner: BufReader<ReadHalf<BoxedStream>>,
    pending: Vec<u8>,
    state: Arc<ConnectionState>,
}

impl PortReader {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> Arc<ConnectionState> {
        self.state.clone()
    }

    /// Returns a complete line (terminator included), or `None` when nothing finished
    /// arriving within [`READ_TIMEOUT`].
    pub async fn read_line(&mut self) -> Result<Option<Vec<u8>>, PortError> {
        self.ensure_open()?;
        match timeout(READ_TIMEOUT, self.inner.read_until(b'\n', &mut self.pending)).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok(0)) if self.pending.is_empty() => Err(PortError::Disconnected),
            // EOF after a partial line: hand the remainder to read_bytes.
            Ok(Ok(_)) if self.pending.last() != Some(&b'\n') => Ok(None),
            Ok(Ok(_)) => Ok(Some(std::mem::take(&mut self.pending))),
            Ok(Err(err)) => Err(PortError::Io(err)),
        }
    }

    /// Best-effort read that never waits: drains up to `max_n` unterminated bytes, or
    /// takes whatever one immediate read yields.
    pub async fn read_bytes(&mut self, max_n: usize) -> Result<Vec<u8>, PortError> {
        self.ensure_open()?;
        if !self.pending.is_empty() {
            let take = max_n.min(self.pending.len());
            return Ok(self.pending.drain(..take).collect());
        }
        let mut buf = vec![0u8; max_n];
        match timeout(Duration::ZERO, self.inner.read(&mut buf)).await {
            Err(_elapsed) => Ok(Vec::new()),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(err)) => Err(PortError::Io(err)),
        }
    }

    fn ensure_open(&self) -> Result<(), PortError> {
        if self.state.is_open() {
            Ok(())
        } else {
            Err(PortError::Closed(self.name.clone()))
        }
    }
}

/// Transmit half.
pub struct PortWriter {
    name: String,
    inner: Option<WriteHalf<BoxedStream>>,
    state: Arc<ConnectionState>,
}

impl PortWriter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some() && self.state.is_open()
    }

    pub fn state(&self) -> Arc<ConnectionState> {
        self.state.clone()
    }

    pub async fn write(&mut self, bytes: &[u8]) -> Result<usize, PortError> {
        let closed = || PortError::Closed(self.name.clone());
        if !self.state.is_open() {
            return Err(closed());
        }
        let Some(inner) = self.inner.as_mut() else {
            return Err(closed());
        };
        let result = async {
            inner.write_all(bytes).await?;
            inner.flush().await
        }
        .await;
        match result {
            Ok(()) => Ok(bytes.len()),
            Err(err) => {
                self.state.mark_failed(&err);
                Err(PortError::Io(err))
            }
        }
    }

    /// Closes the port. Safe to call repeatedly; only the first call returns true.
    pub async fn close(&mut self) -> bool {
        let was_open = self.state.mark_closed();
        if let Some(mut inner) = self.inner.take() {
            if let Err(err) = inner.shutdown().await {
                tracing::debug!(port = %self.name, error = %err, "shutdown of write half failed");
            }
            return true;
        }
        was_open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn read_line_returns_terminated_line() {
        let (port_side, mut device) = duplex(64);
        let mut session = PortSession::from_stream("test", port_side);
        device.write_all(b"PING\r\n").await.unwrap();
        let line = session.read_line().await.expect("read");
        assert_eq!(line.as_deref(), Some(&b"PING\r\n"[..]));
    }

    #[tokio::test]
    async fn read_line_times_out_without_data() {
        let (port_side, _device) = duplex(64);
        let mut session = PortSession::from_stream("test", port_side);
        let started = std::time::Instant::now();
        assert!(session.read_line().await.expect("read").is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn unterminated_bytes_come_out_of_read_bytes() {
        let (port_side, mut device) = duplex(64);
        let mut session = PortSession::from_stream("test", port_side);
        device.write_all(&[0x01, 0x02, 0x03]).await.unwrap();
        assert!(session.read_line().await.expect("read").is_none());
        let raw = session.read_bytes(2).await.expect("raw");
        assert_eq!(raw, vec![0x01, 0x02]);
        let raw = session.read_bytes(16).await.expect("raw");
        assert_eq!(raw, vec![0x03]);
        assert!(session.read_bytes(16).await.expect("raw").is_empty());
    }

    #[tokio::test]
    async fn dropped_device_is_a_disconnect() {
        let (port_side, device) = duplex(64);
        let mut session = PortSession::from_stream("test", port_side);
        drop(device);
        let err = session.read_line().await.expect_err("eof");
        assert!(matches!(err, PortError::Disconnected));
    }

    #[tokio::test]
    async fn write_reaches_device_and_close_is_idempotent() {
        let (port_side, mut device) = duplex(64);
        let mut session = PortSession::from_stream("test", port_side);
        assert_eq!(session.write(b"AT\n").await.expect("write"), 3);
        let mut buf = [0u8; 3];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"AT\n");

        assert!(session.close().await);
        assert!(!session.close().await);
        assert!(!session.is_open());
        let err = session.write(b"AT\n").await.expect_err("closed");
        assert!(matches!(err, PortError::Closed(_)));
    }

    #[tokio::test]
    async fn capture_replays_fully_and_is_never_written() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let capture = tmp.path().join("capture.log");
        let content: String = (0..200).map(|i| format!("line {i}\r\n")).collect();
        std::fs::write(&capture, &content).expect("write capture");

        let mut session = PortSession::open(capture.to_str().unwrap(), 9600)
            .await
            .expect("open capture");
        assert!(session.read_line().await.expect("read").is_some());
        // Passthrough commands are swallowed instead of moving the read offset.
        assert_eq!(session.write(b"AT\n").await.expect("write"), 3);

        let mut lines = 1;
        loop {
            match session.read_line().await {
                Ok(Some(_)) => lines += 1,
                Ok(None) => {}
                Err(PortError::Disconnected) => break,
                Err(err) => panic!("unexpected error: {err}"),
            }
        }
        assert_eq!(lines, 200);
        assert_eq!(std::fs::read_to_string(&capture).unwrap(), content);
        assert!(session.close().await);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn fifo_reads_external_writer_and_closes_promptly() {
        use std::io::Write;
        use std::os::unix::ffi::OsStrExt;

        let tmp = tempfile::tempdir().expect("temp dir");
        let fifo = tmp.path().join("port.fifo");
        let c_path = std::ffi::CString::new(fifo.as_os_str().as_bytes()).unwrap();
        assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) }, 0, "mkfifo");

        // Opening must not wait for a writer.
        let mut session = timeout(Duration::from_secs(2), PortSession::open(fifo.to_str().unwrap(), 9600))
            .await
            .expect("open does not block")
            .expect("open fifo");

        let mut writer = std::fs::OpenOptions::new().write(true).open(&fifo).unwrap();
        writer.write_all(b"PING\r\n").unwrap();
        drop(writer);

        let mut line = None;
        for _ in 0..20 {
            line = session.read_line().await.expect("read");
            if line.is_some() {
                break;
            }
        }
        assert_eq!(line.as_deref(), Some(&b"PING\r\n"[..]));
        // The writer left; the port just goes quiet.
        assert!(session.read_line().await.expect("read").is_none());

        assert_eq!(session.write(b"AT\n").await.expect("write"), 3);
        let closed = timeout(Duration::from_secs(2), session.close()).await;
        assert_eq!(closed.ok(), Some(true));
    }

    #[tokio::test]
    async fn missing_device_fails_to_open() {
        let err = PortSession::open("/dev/does-not-exist-serial-logger", 9600)
            .await
            .err()
            .expect("open should fail");
        assert!(matches!(err, PortError::Open { .. }));
        assert!(err.to_string().contains("/dev/does-not-exist-serial-logger"));
    }
}

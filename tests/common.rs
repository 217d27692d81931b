#![allow(dead_code)]

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::ConnectOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};

pub type Row = (String, String, String, i64);

/// Reads every row of `serial_logs` in insertion order, or `None` while the database
/// or its table does not exist yet.
pub async fn try_sqlite_rows(path: &Path) -> Option<Vec<Row>> {
    if !path.exists() {
        return None;
    }
    let mut conn = SqliteConnectOptions::new().filename(path).connect().await.ok()?;
    sqlx::query_as("SELECT data, data_type, raw_bytes, byte_count FROM serial_logs ORDER BY id")
        .fetch_all(&mut conn)
        .await
        .ok()
}

pub async fn sqlite_rows(path: &Path) -> Vec<Row> {
    try_sqlite_rows(path)
        .await
        .unwrap_or_else(|| panic!("no serial_logs table in {}", path.display()))
}

/// Polls the database until at least `n` rows are present.
pub async fn wait_for_rows(path: &Path, n: usize) -> Vec<Row> {
    let mut rows = Vec::new();
    for _ in 0..500 {
        rows = try_sqlite_rows(path).await.unwrap_or_default();
        if rows.len() >= n {
            return rows;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {n} rows in {}, found {:?}", path.display(), rows);
}

/// Writes a minimal configuration pointing at `port` and a SQLite file under `dir`.
pub fn write_config(dir: &Path, port: &Path) -> PathBuf {
    let cfg_path = dir.join("serial-logger.toml");
    let cfg = format!(
        "service_name = \"e2e-test\"\nserial_port = \"{}\"\nlog_level = \"warn\"\nstats_report_seconds = 0\n\n[sqlite]\npath = \"{}\"\n",
        port.display(),
        dir.join("serial_debug.db").display()
    );
    std::fs::write(&cfg_path, cfg).expect("write config");
    cfg_path
}

/// Starts the debug logger with piped stdio so a test can type commands later.
pub fn spawn_debug_logger(cfg_path: &Path) -> Child {
    Command::new(assert_cmd::cargo::cargo_bin!("serial-debug-logger"))
        .arg("--config")
        .arg(cfg_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn serial-debug-logger")
}

/// Types `input` into the logger, closes stdin and waits up to 15 s for it to exit.
pub fn finish(mut child: Child, input: &str) -> Output {
    let mut stdin = child.stdin.take().expect("piped stdin");
    stdin.write_all(input.as_bytes()).expect("write stdin");
    drop(stdin);

    let deadline = Instant::now() + Duration::from_secs(15);
    while child.try_wait().expect("poll logger").is_none() {
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("logger still running 15 s after {input:?}");
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    child.wait_with_output().expect("collect output")
}

#[cfg(unix)]
pub fn mkfifo(path: &Path) {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).expect("fifo path");
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    assert_eq!(rc, 0, "mkfifo {}", path.display());
}

/// Opens the write end of a FIFO once a reader holds it.
#[cfg(unix)]
pub fn open_fifo_writer(path: &Path) -> std::fs::File {
    use std::os::unix::fs::OpenOptionsExt;

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match std::fs::OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
        {
            Ok(file) => return file,
            Err(err) if err.raw_os_error() == Some(libc::ENXIO) && Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(err) => panic!("open {} for writing: {err}", path.display()),
        }
    }
}

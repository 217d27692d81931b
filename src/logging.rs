use anyhow::{Error, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::AppConfig;

/// Installs the global subscriber. Diagnostics go to stderr so they do not mix with the
/// operator console on stdout; when `log_file` is set a daily-rolling copy is written too.
/// The returned guard must be held until exit to flush the file writer.
pub fn init(config: &AppConfig) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_level))?;
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    match &config.log_file {
        Some(log_file) => {
            let path = Path::new(log_file);
            let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let prefix = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{}.log", config.service_name));
            let appender = tracing_appender::rolling::daily(directory, prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .try_init()
                .map_err(Error::msg)?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .try_init()
                .map_err(Error::msg)?;
            Ok(None)
        }
    }
}

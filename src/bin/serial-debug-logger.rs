use anyhow::{Context, Result};
use serial_logger::{
    cli::Cli,
    console, logging,
    sink::{RecordSink, SqliteSink},
    PortSession, SerialLogger, Variant,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse("serial-debug-logger")?;
    let config = cli
        .load_config()
        .context("unable to load configuration")?;
    let _log_guard = logging::init(&config)?;

    let rule = "=".repeat(50);
    println!("SERIAL DEBUG LOGGER");
    println!("{rule}");
    println!("Port: {}", config.serial_port);
    println!("Baudrate: {}", config.baud_rate);
    println!("{rule}");

    let sink = SqliteSink::open(&config.sqlite.path)
        .await
        .with_context(|| format!("unable to open database {}", config.sqlite.path))?;
    println!("Database ready: {}", sink.path().display());

    println!(
        "Attempting to connect to {} at {} baud...",
        config.serial_port, config.baud_rate
    );
    let session = match PortSession::open(&config.serial_port, config.baud_rate).await {
        Ok(session) => session,
        Err(err) => {
            println!("Connection failed: {err}");
            println!("   Make sure {} exists and is not in use", config.serial_port);
            sink.close().await;
            return Err(err).context("serial port unavailable");
        }
    };
    println!("Connection successful!");
    println!("   Port: {}", session.name());
    println!("   Baudrate: {}", config.baud_rate);
    println!("   Timeout: {:?}", serial_logger::serial::READ_TIMEOUT);
    println!("   Is open: {}", session.is_open());

    let report_every = Duration::from_secs(config.stats_report_seconds);
    let mut logger = SerialLogger::new(session, Arc::new(sink), Variant::Debug)
        .with_stats_report(Some(report_every));
    logger.start_monitoring();
    tracing::info!(service = %config.service_name, port = %config.serial_port, "debug logger running");

    println!("MONITORING STARTED");
    println!("Listening for ANY data on serial port...");
    if config.stats_report_seconds > 0 {
        println!("Will show activity every {} seconds", config.stats_report_seconds);
    }
    println!("{}", "-".repeat(50));

    let mut stdout = std::io::stdout();
    console::run(&mut logger, console::stdin_lines(), &mut stdout, async {
        signal::ctrl_c().await.ok();
    })
    .await
}

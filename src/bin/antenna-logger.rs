use anyhow::{Context, Result};
use serial_logger::{
    cli::Cli,
    console, logging,
    sink::{MySqlSink, RecordSink},
    PortSession, SerialLogger, Variant,
};
use std::sync::Arc;
use tokio::signal;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse("antenna-logger")?;
    let config = cli
        .load_config()
        .context("unable to load configuration")?;
    let _log_guard = logging::init(&config)?;
    let mysql = &config.mysql;

    let rule = "=".repeat(50);
    println!("ANTENNA SERIAL LOGGER");
    println!("{rule}");
    println!("Port: {}", config.serial_port);
    println!("Baudrate: {}", config.baud_rate);
    println!("MySQL Host: {}:{}", mysql.host, mysql.port);
    println!("Database: {}", mysql.database);
    println!("{rule}");

    let sink = match MySqlSink::connect(mysql.clone()).await {
        Ok(sink) => sink,
        Err(err) => {
            println!("MySQL connection error: {err}");
            println!("Please check your MySQL configuration:");
            println!("  Host: {}", mysql.host);
            println!("  Port: {}", mysql.port);
            println!("  Database: {}", mysql.database);
            println!("  User: {}", mysql.user);
            return Err(err).context("database unavailable");
        }
    };
    println!("MySQL database ready: {}", sink.describe());

    let session = match PortSession::open(&config.serial_port, config.baud_rate).await {
        Ok(session) => session,
        Err(err) => {
            println!("Connection failed: {err}");
            sink.close().await;
            return Err(err).context("serial port unavailable");
        }
    };
    println!("Connected to {} at {} baud", session.name(), config.baud_rate);

    let mut logger = SerialLogger::new(session, Arc::new(sink), Variant::Antenna);
    tracing::info!(service = %config.service_name, port = %config.serial_port, "antenna logger ready");

    let mut stdout = std::io::stdout();
    console::run(&mut logger, console::stdin_lines(), &mut stdout, async {
        signal::ctrl_c().await.ok();
    })
    .await
}

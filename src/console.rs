use anyhow::Result;
use chrono::Local;
use std::future::Future;
use std::io::{BufRead, Write};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::ConsoleInputError;
use crate::logger::{SerialLogger, StartOutcome, Variant};
use crate::monitor::MonitorState;
use crate::record::Antenna;

/// Time given to the device to answer a passthrough command before re-prompting.
const RESPONSE_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Test,
    Stats,
    Quit,
    Start,
    Antenna(Antenna),
    /// Raw text for the device (debug variant only).
    Send(String),
}

impl Command {
    /// Interprets one line of operator input. Blank input yields `Ok(None)`.
    pub fn parse(input: &str, variant: Variant) -> Result<Option<Self>, ConsoleInputError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let lowered = trimmed.to_lowercase();
        let command = match (lowered.as_str(), variant) {
            ("quit", _) => Command::Quit,
            ("test", _) => Command::Test,
            ("stats", _) => Command::Stats,
            (_, Variant::Debug) => Command::Send(trimmed.to_string()),
            ("start", Variant::Antenna) => Command::Start,
            (other, Variant::Antenna) => {
                let mut tokens = other.split_whitespace();
                if tokens.next() != Some("antenna") {
                    return Err(ConsoleInputError::Unrecognized(trimmed.to_string()));
                }
                let rest: Vec<&str> = tokens.collect();
                match rest.as_slice() {
                    [number] => Command::Antenna(number.parse()?),
                    _ => return Err(ConsoleInputError::InvalidAntenna(rest.join(" "))),
                }
            }
        };
        Ok(Some(command))
    }
}

pub fn help(variant: Variant) -> &'static str {
    match variant {
        Variant::Debug => {
            "COMMANDS:\n  \
             - Just wait to see if data arrives automatically\n  \
             - Type any command to send it\n  \
             - 'test' : Test connection\n  \
             - 'stats' : Show statistics\n  \
             - 'quit' : Exit"
        }
        Variant::Antenna => {
            "COMMANDS:\n  \
             - 'antenna 1' : Set antenna to 1\n  \
             - 'antenna 2' : Set antenna to 2\n  \
             - 'start' : Start monitoring\n  \
             - 'test' : Show port status\n  \
             - 'stats' : Show statistics\n  \
             - 'quit' : Exit"
        }
    }
}

/// Reads stdin on a dedicated thread and forwards each line. The channel closes at
/// end of input.
pub fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Runs the operator loop until `quit`, end of input, or `interrupt` resolves, then
/// shuts the logger down.
pub async fn run<W, F>(
    logger: &mut SerialLogger,
    mut input: mpsc::Receiver<String>,
    out: &mut W,
    interrupt: F,
) -> Result<()>
where
    W: Write,
    F: Future<Output = ()>,
{
    let variant = logger.variant();
    writeln!(out, "\n{}", help(variant))?;
    tokio::pin!(interrupt);

    loop {
        write!(out, "\n> ")?;
        out.flush()?;
        let line = tokio::select! {
            line = input.recv() => line,
            _ = &mut interrupt => {
                writeln!(out, "\nKeyboard interrupt")?;
                break;
            }
        };
        let Some(line) = line else {
            writeln!(out, "\nInput closed")?;
            break;
        };

        match Command::parse(&line, variant) {
            Ok(None) => {}
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => execute(logger, command, out).await?,
            Err(err) => report_input_error(&err, variant, out)?,
        }
    }

    writeln!(out, "\nStopping monitor...")?;
    if let Some(report) = logger.shutdown().await {
        if let Some(err) = report.monitor_error {
            writeln!(out, "Monitor had stopped on error: {err}")?;
        }
        writeln!(out, "Monitor stopped")?;
        writeln!(out, "{}", report.stats)?;
    }
    out.flush()?;
    Ok(())
}

async fn execute<W: Write>(logger: &mut SerialLogger, command: Command, out: &mut W) -> Result<()> {
    match command {
        Command::Test => {
            let report = logger.port_report();
            match logger.variant() {
                Variant::Debug => {
                    writeln!(out, "Testing connection...")?;
                    writeln!(out, "   Port: {}", report.name)?;
                    writeln!(out, "   Port open: {}", report.open)?;
                    writeln!(out, "   Monitoring: {}", report.monitor == MonitorState::Running)?;
                    if let Some(err) = &report.last_error {
                        writeln!(out, "   Last error: {err}")?;
                    }
                }
                Variant::Antenna => {
                    let status = if report.open { "open" } else { "closed" };
                    writeln!(out, "Port {}: {status}", report.name)?;
                }
            }
        }
        Command::Stats => writeln!(out, "{}", logger.stats())?,
        Command::Antenna(antenna) => {
            logger.set_antenna(antenna);
            writeln!(out, "Antenna set to: {antenna}")?;
        }
        Command::Start => match logger.start_monitoring() {
            StartOutcome::Started => writeln!(
                out,
                "Monitoring started with antenna {}. Type 'quit' to stop.",
                logger.antenna()
            )?,
            StartOutcome::AlreadyRunning => writeln!(out, "Monitoring already active")?,
            StartOutcome::PortUnavailable => {
                let reason = logger.port_report().last_error.unwrap_or_default();
                writeln!(out, "Serial port unavailable: {reason}")?
            }
        },
        Command::Send(text) => {
            match logger.send_command(&text).await {
                Ok(written) => writeln!(
                    out,
                    "[{}] SENT: '{text}' ({written} bytes)",
                    Local::now().format("%H:%M:%S%.3f")
                )?,
                Err(err) => {
                    tracing::warn!(port = %logger.port_name(), error = %err, "send failed");
                    writeln!(out, "Send error: {err}")?;
                }
            }
            tokio::time::sleep(RESPONSE_GRACE).await;
        }
        Command::Quit => {}
    }
    Ok(())
}

fn report_input_error<W: Write>(err: &ConsoleInputError, variant: Variant, out: &mut W) -> Result<()> {
    tracing::debug!(error = %err, "console input rejected");
    match (err, variant) {
        (ConsoleInputError::InvalidAntenna(_), _) => writeln!(out, "Error: Antenna must be 1 or 2")?,
        (ConsoleInputError::Unrecognized(_), Variant::Antenna) => writeln!(
            out,
            "Invalid command. Use 'antenna 1', 'antenna 2', 'start', 'test', 'stats', or 'quit'"
        )?,
        (ConsoleInputError::Unrecognized(_), Variant::Debug) => writeln!(out, "{err}")?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_commands_are_case_insensitive() {
        for variant in [Variant::Debug, Variant::Antenna] {
            assert_eq!(Command::parse("  QUIT ", variant), Ok(Some(Command::Quit)));
            assert_eq!(Command::parse("Stats", variant), Ok(Some(Command::Stats)));
            assert_eq!(Command::parse("test", variant), Ok(Some(Command::Test)));
            assert_eq!(Command::parse("   ", variant), Ok(None));
        }
    }

    #[test]
    fn debug_variant_forwards_everything_else_verbatim() {
        assert_eq!(
            Command::parse(" AT+Mode=2 ", Variant::Debug),
            Ok(Some(Command::Send("AT+Mode=2".into())))
        );
        assert_eq!(
            Command::parse("antenna 2", Variant::Debug),
            Ok(Some(Command::Send("antenna 2".into())))
        );
        assert_eq!(
            Command::parse("START", Variant::Debug),
            Ok(Some(Command::Send("START".into())))
        );
    }

    #[test]
    fn antenna_variant_vocabulary() {
        assert_eq!(
            Command::parse("Antenna 2", Variant::Antenna),
            Ok(Some(Command::Antenna(Antenna::Two)))
        );
        assert_eq!(
            Command::parse("antenna   1", Variant::Antenna),
            Ok(Some(Command::Antenna(Antenna::One)))
        );
        assert_eq!(Command::parse("START", Variant::Antenna), Ok(Some(Command::Start)));
        assert_eq!(
            Command::parse("antenna 3", Variant::Antenna),
            Err(ConsoleInputError::InvalidAntenna("3".into()))
        );
        assert_eq!(
            Command::parse("antenna", Variant::Antenna),
            Err(ConsoleInputError::InvalidAntenna(String::new()))
        );
        assert_eq!(
            Command::parse("AT+RST", Variant::Antenna),
            Err(ConsoleInputError::Unrecognized("AT+RST".into()))
        );
        assert_eq!(
            Command::parse("antennas 1", Variant::Antenna),
            Err(ConsoleInputError::Unrecognized("antennas 1".into()))
        );
    }

    #[test]
    fn help_lists_variant_commands() {
        assert!(help(Variant::Debug).contains("Type any command to send it"));
        assert!(help(Variant::Antenna).contains("'antenna 2'"));
        assert!(!help(Variant::Antenna).contains("send it"));
    }
}

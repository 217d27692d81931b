use anyhow::{anyhow, bail, Context, Result};

use crate::config::AppConfig;

/// Command-line flags shared by both loggers. Anything given here wins over the
/// configuration file.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Cli {
    pub config_path: Option<String>,
    pub port: Option<String>,
    pub baud_rate: Option<u32>,
}

impl Cli {
    pub fn parse(binary: &str) -> Result<Self> {
        Self::parse_from(binary, std::env::args().skip(1))
    }

    pub fn parse_from(binary: &str, args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut cli = Cli::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--config requires a path"))?;
                    cli.config_path = Some(value);
                }
                "--port" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--port requires a device path"))?;
                    cli.port = Some(value);
                }
                "--baud" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--baud requires a rate"))?;
                    let rate = value
                        .parse()
                        .with_context(|| format!("invalid baud rate '{value}'"))?;
                    cli.baud_rate = Some(rate);
                }
                "--help" | "-h" => {
                    println!(
                        "Usage: {binary} [--config <path>] [--port <device>] [--baud <rate>]\n\
                         --config <path>    Path to TOML configuration (default: {})\n\
                         --port <device>    Serial device, FIFO or capture file to read\n\
                         --baud <rate>      Baud rate (8 data bits, no parity, 1 stop bit)",
                        AppConfig::default_path()
                    );
                    std::process::exit(0);
                }
                other => {
                    if cli.config_path.is_none() {
                        cli.config_path = Some(other.to_string());
                    } else {
                        bail!("unknown argument '{other}'");
                    }
                }
            }
        }

        Ok(cli)
    }

    pub fn load_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::load_or_default(self.config_path.as_deref())?;
        if let Some(port) = &self.port {
            config.serial_port = port.clone();
        }
        if let Some(baud_rate) = self.baud_rate {
            config.baud_rate = baud_rate;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flags_override_configuration() {
        let mut file = NamedTempFile::new().expect("create temp config");
        writeln!(file, "serial_port = \"/dev/ttyUSB3\"\nbaud_rate = 19200").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let cli = Cli::parse_from("test", args(&["--config", path.as_str(), "--baud", "115200"]))
            .expect("parse");
        let config = cli.load_config().expect("load");
        assert_eq!(config.serial_port, "/dev/ttyUSB3");
        assert_eq!(config.baud_rate, 115200);

        let cli = Cli::parse_from("test", args(&[path.as_str(), "--port", "/dev/ttyACM0"])).expect("parse");
        assert_eq!(cli.config_path.as_deref(), Some(path.as_str()));
        assert_eq!(cli.load_config().expect("load").serial_port, "/dev/ttyACM0");
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(Cli::parse_from("test", args(&["--baud", "fast"])).is_err());
        assert!(Cli::parse_from("test", args(&["--port"])).is_err());
        assert!(Cli::parse_from("test", args(&["a.toml", "b.toml"])).is_err());
    }
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Optional path of a daily-rolling diagnostics file, in addition to stderr.
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default = "default_serial_port")]
    pub serial_port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Interval of the periodic statistics report while monitoring; 0 disables it.
    #[serde(default = "default_stats_report_secs")]
    pub stats_report_seconds: u64,
    #[serde(default)]
    pub sqlite: SqliteConfig,
    #[serde(default)]
    pub mysql: MySqlConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SqliteConfig {
    #[serde(default = "default_sqlite_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MySqlConfig {
    #[serde(default = "default_mysql_host")]
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    #[serde(default = "default_mysql_database")]
    pub database: String,
    #[serde(default = "default_mysql_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_charset")]
    pub charset: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_seconds: u64,
}

fn default_service_name() -> String {
    "serial-logger".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_serial_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_stats_report_secs() -> u64 {
    5
}

fn default_sqlite_path() -> String {
    "serial_debug.db".to_string()
}

fn default_mysql_host() -> String {
    "localhost".to_string()
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_mysql_database() -> String {
    "data_logs".to_string()
}

fn default_mysql_user() -> String {
    "root".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_charset() -> String {
    "utf8mb4".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_sqlite_path(),
        }
    }
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            host: default_mysql_host(),
            port: default_mysql_port(),
            database: default_mysql_database(),
            user: default_mysql_user(),
            password: String::new(),
            max_connections: default_max_connections(),
            charset: default_charset(),
            connect_timeout_seconds: default_connect_timeout_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_level: default_log_level(),
            log_file: None,
            serial_port: default_serial_port(),
            baud_rate: default_baud_rate(),
            stats_report_seconds: default_stats_report_secs(),
            sqlite: SqliteConfig::default(),
            mysql: MySqlConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn default_path() -> &'static str {
        "config/serial-logger.toml"
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let raw = fs::read_to_string(path_ref)
            .with_context(|| format!("failed to read configuration from {}", path_ref.display()))?;
        let mut config: Self = toml::from_str(&raw).with_context(|| {
            format!("failed to parse configuration from {}", path_ref.display())
        })?;
        if config.service_name.trim().is_empty() {
            config.service_name = default_service_name();
        }
        Ok(config)
    }

    /// Loads `path` when given; otherwise the default path if it exists, else built-in defaults.
    pub fn load_or_default(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(Self::default_path()).exists() => Self::load(Self::default_path()),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_parses_config() {
        let mut file = NamedTempFile::new().expect("create temp config");
        writeln!(
            file,
            "service_name = \"bench-logger\"
serial_port = \"/dev/ttyACM1\"

[mysql]
host = \"db.local\"
user = \"mateo\"
password = \"secret\""
        )
        .unwrap();
        let config = AppConfig::load(file.path()).expect("load config");
        assert_eq!(config.service_name, "bench-logger");
        assert_eq!(config.serial_port, "/dev/ttyACM1");
        assert_eq!(config.log_level, "info");
        assert!(config.log_file.is_none());
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.stats_report_seconds, 5);
        assert_eq!(config.sqlite.path, "serial_debug.db");
        assert_eq!(config.mysql.host, "db.local");
        assert_eq!(config.mysql.port, 3306);
        assert_eq!(config.mysql.database, "data_logs");
        assert_eq!(config.mysql.user, "mateo");
        assert_eq!(config.mysql.password, "secret");
        assert_eq!(config.mysql.max_connections, 5);
        assert_eq!(config.mysql.charset, "utf8mb4");
    }

    #[test]
    fn blank_service_name_falls_back() {
        let mut file = NamedTempFile::new().expect("create temp config");
        writeln!(file, "service_name = \"  \"\nbaud_rate = 115200").unwrap();
        let config = AppConfig::load(file.path()).expect("load config");
        assert_eq!(config.service_name, "serial-logger");
        assert_eq!(config.baud_rate, 115200);
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let config = AppConfig::load(AppConfig::default_path()).expect("load shipped config");
        let defaults = AppConfig::default();
        assert_eq!(config.serial_port, defaults.serial_port);
        assert_eq!(config.baud_rate, defaults.baud_rate);
        assert_eq!(config.sqlite.path, defaults.sqlite.path);
        assert_eq!(config.mysql.database, defaults.mysql.database);
        assert_eq!(config.mysql.connect_timeout_seconds, 5);
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let err = AppConfig::load_or_default(Some("/nonexistent/serial-logger.toml"))
            .expect_err("missing file");
        assert!(err.to_string().contains("failed to read configuration"));
    }
}

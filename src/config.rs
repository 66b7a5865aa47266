//! Station configuration using Figment
//!
//! Configuration is layered from:
//! 1. Built-in defaults
//! 2. An optional TOML file (`gauge.toml` unless another path is given)
//! 3. Environment variables prefixed with `GAUGE_`, using `__` between sections
//!
//! # Environment Variable Overrides
//!
//! ```text
//! GAUGE_APPLICATION__LOG_LEVEL=debug
//! GAUGE_DATABASE__PATH=/var/lib/gauge/halla.db
//! GAUGE_HISTORY__BUCKET_WIDTH_SECS=2
//! ```
//!
//! The loaded [`Settings`] are passed explicitly to the store, the device
//! channel and the history builder. Nothing else in the crate reads the
//! process environment.

use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "gauge.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "GAUGE_";

/// Top-level station configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Measurement database settings
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Serial gauge settings
    #[serde(default)]
    pub device: DeviceConfig,
    /// History aggregation settings
    #[serde(default)]
    pub history: HistoryConfig,
    /// Report template storage
    #[serde(default)]
    pub templates: TemplateConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Station name shown in logs and exports
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Gauge Station".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Connection settings for the measurement store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file
    pub path: PathBuf,
    /// How long a connection waits on a locked database, in milliseconds
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("halla.db"),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

impl DatabaseConfig {
    /// Store configuration pointing at `path` with default timeouts.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Busy timeout as a [`Duration`].
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Serial gauge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Default port, if the station always uses the same one
    #[serde(default)]
    pub port: Option<String>,
    /// Communication speed
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Upper bound for blocking open/write calls, in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// Interval between non-blocking polls, in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// How long to wait for the reply to `INFO`, in milliseconds
    #[serde(default = "default_info_wait")]
    pub info_wait_ms: u64,
    /// Terminator appended to control commands
    #[serde(default = "default_line_terminator")]
    pub line_terminator: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout(),
            poll_interval_ms: default_poll_interval(),
            info_wait_ms: default_info_wait(),
            line_terminator: default_line_terminator(),
        }
    }
}

impl DeviceConfig {
    /// Read/write timeout as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Info reply wait as a [`Duration`].
    pub fn info_wait(&self) -> Duration {
        Duration::from_millis(self.info_wait_ms)
    }
}

/// History aggregation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Width of the time bucket that groups measurements into one product
    #[serde(default = "default_bucket_width")]
    pub bucket_width_secs: u32,
    /// Rows returned by `history` when no limit is given
    #[serde(default = "default_history_limit")]
    pub default_limit: usize,
    /// Rows returned by `latest` when no count is given
    #[serde(default = "default_latest_limit")]
    pub latest_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            bucket_width_secs: default_bucket_width(),
            default_limit: default_history_limit(),
            latest_limit: default_latest_limit(),
        }
    }
}

/// Report template storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Directory template files are copied into
    pub dir: PathBuf,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("templates/checksheet_templates"),
        }
    }
}

fn default_busy_timeout() -> u64 {
    10_000
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_read_timeout() -> u64 {
    1_000
}

fn default_poll_interval() -> u64 {
    1_000
}

fn default_info_wait() -> u64 {
    500
}

fn default_line_terminator() -> String {
    "\n".to_string()
}

fn default_bucket_width() -> u32 {
    1
}

fn default_history_limit() -> usize {
    50
}

fn default_latest_limit() -> usize {
    10
}

impl Settings {
    /// Load settings from defaults, an optional TOML file and `GAUGE_` env vars.
    ///
    /// When `path` is `None`, [`DEFAULT_CONFIG_FILE`] is used if it exists.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        if path.is_some() && !file.exists() {
            return Err(DaqError::Configuration(format!(
                "config file {} does not exist",
                file.display()
            )));
        }

        let settings: Settings = Self::figment(file).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// The layered figment, exposed for callers that merge extra providers.
    pub fn figment(file: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> AppResult<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(DaqError::Configuration(
                "database.path must not be empty".to_string(),
            ));
        }
        if self.device.baud_rate == 0 {
            return Err(DaqError::Configuration(
                "device.baud_rate must be greater than zero".to_string(),
            ));
        }
        if self.device.poll_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "device.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.history.bucket_width_secs == 0 {
            return Err(DaqError::Configuration(
                "history.bucket_width_secs must be greater than zero".to_string(),
            ));
        }
        if self.history.default_limit == 0 {
            return Err(DaqError::Configuration(
                "history.default_limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Render the effective settings as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| DaqError::Configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults_match_station_hardware() {
        let settings = Settings::default();
        assert_eq!(settings.device.baud_rate, 9600);
        assert_eq!(settings.device.poll_interval(), Duration::from_secs(1));
        assert_eq!(settings.history.bucket_width_secs, 1);
        assert_eq!(settings.database.busy_timeout(), Duration::from_secs(10));
        assert!(settings.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[database]
path = "/tmp/line3.db"

[history]
bucket_width_secs = 2
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.database.path, PathBuf::from("/tmp/line3.db"));
        assert_eq!(settings.history.bucket_width_secs, 2);
        assert_eq!(settings.history.default_limit, 50);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::env::set_var("GAUGE_DEVICE__BAUD_RATE", "19200");
        let settings = Settings::load(Some(file.path()));
        std::env::remove_var("GAUGE_DEVICE__BAUD_RATE");

        assert_eq!(settings.unwrap().device.baud_rate, 19200);
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_is_an_error() {
        let result = Settings::load(Some(Path::new("/nonexistent/gauge.toml")));
        assert!(matches!(result, Err(DaqError::Configuration(_))));
    }

    #[test]
    fn test_validation_rejects_zero_bucket() {
        let mut settings = Settings::default();
        settings.history.bucket_width_secs = 0;
        assert!(matches!(
            settings.validate(),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn test_to_toml_roundtrips_sections() {
        let rendered = Settings::default().to_toml().unwrap();
        assert!(rendered.contains("[database]"));
        assert!(rendered.contains("bucket_width_secs = 1"));
    }
}

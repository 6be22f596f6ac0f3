//! Application configuration loading and validation.
//!
//! The top-level `Config` aggregates the logging and MQTT sections. It is
//! read once from a TOML file at startup and stays immutable afterwards.
//!
//! ```toml
//! [logger]
//! level = "INFO"
//!
//! [mqtt]
//! host = "broker.local"
//! port = 1883
//! username = "logger"
//! password = "secret"
//! topics = ["sensors/#"]
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use validator::Validate;

use self::logger::LoggerConfig;

pub mod logger;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "MQTT_LOGGER_CONFIG";

/// Searched in order when `MQTT_LOGGER_CONFIG` is unset; the first that exists wins.
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["config.toml", "/etc/mqtt-logger/config.toml"];

/// Timestamped console output for use before the tracing subscriber exists.
#[doc(hidden)]
pub fn print_early(level: console::StyledObject<&str>, args: std::fmt::Arguments<'_>) {
    let now = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default();
    println!("{}  {} {}", console::style(now).dim(), level, args);
}

#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        $crate::config::print_early(console::style("INFO").green(), format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        $crate::config::print_early(console::style("WARN").yellow(), format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        $crate::config::print_early(console::style("ERROR").red(), format_args!($($arg)*))
    };
}

/// Errors that can occur while locating, reading, parsing or validating the
/// configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "No configuration file found (set {} or create one of: {})",
        CONFIG_ENV,
        DEFAULT_CONFIG_PATHS.join(", ")
    )]
    NotFound,

    #[error("Configuration file does not exist: {0}")]
    Missing(PathBuf),

    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error while reading configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

/// Top-level application configuration.
#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// Logging subsystem configuration.
    #[validate(nested)]
    pub logger: LoggerConfig,

    /// Broker connection and subscription settings.
    #[validate(nested)]
    pub mqtt: mqtt_logger_mqtt::Config,
}

impl Config {
    /// Locates the configuration file and loads it.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if no file is found or the file cannot be
    /// read, parsed or validated.
    pub fn new() -> Result<Self, ConfigError> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let config_path = Self::get_config_path(env_path, DEFAULT_CONFIG_PATHS)?;
        Self::load(&config_path)
    }

    /// Picks the configuration file: the explicit path if given, otherwise
    /// the first existing candidate.
    fn get_config_path(
        explicit: Option<PathBuf>,
        candidates: &[&str],
    ) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit {
            print_info!("Using config from {}: {}", CONFIG_ENV, path.display());
            return Ok(path);
        }

        candidates
            .iter()
            .map(Path::new)
            .find(|path| path.is_file())
            .map(|path| {
                print_info!("Using config path: {}", path.display());
                path.to_path_buf()
            })
            .ok_or(ConfigError::NotFound)
    }

    /// Loads and validates configuration from the specified path.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }

        let config_str = fs::read_to_string(path)?;
        let config = Self::parse(&config_str)?;

        print_info!("Successfully loaded config from: {}", path.display());
        Ok(config)
    }

    /// Parses and validates configuration text.
    pub fn parse(text: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }
}

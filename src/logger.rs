// ============================================================================
// logger.rs
// ============================================================================
//! Logging initialization and log-level resolution.
//!
//! `LoggerManager` turns a [`LoggerConfig`] into the global `tracing`
//! subscriber: a console layer (compact, pretty or JSON) and, on Unix, an
//! optional journald layer. The configured level name is resolved here. An
//! unrecognized name never fails startup; it is reported as a warning once
//! the subscriber is live, and the default level stays in effect.
//!
//! `RUST_LOG`, when set, replaces the computed filter entirely.

use std::io;

use thiserror::Error;
use tracing::{debug, warn};
use tracing_subscriber::{
    filter::LevelFilter, fmt, fmt::format::FmtSpan, prelude::*, EnvFilter, Layer, Registry,
};
use validator::{Validate, ValidationErrors};

use crate::{
    config::logger::{ConsoleConfig, LogFormat, LoggerConfig},
    print_info, print_warn,
};

/// Level used when none is configured or the configured name is unknown.
pub const DEFAULT_LEVEL: LevelFilter = LevelFilter::INFO;

/// Directives appended to the computed filter. The MQTT library only gets to
/// report errors, so its chatter stays out of the message log.
const QUIET_TARGETS: &[&str] = &["rumqttc=error"];

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Errors that can occur during logger configuration or initialization.
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Logger initialization error: {0}")]
    InitializationError(String),

    #[error("Logger configuration validation error: {0}")]
    ValidationError(#[from] ValidationErrors),

    /// IO error, typically during journald socket operations.
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("No logging layers were configured or successfully initialized")]
    NoLayersConfigured,
}

/// Maps a configured level name to a filter.
///
/// Names are case-insensitive. `WARNING` is accepted next to `WARN`, and
/// `CRITICAL`/`FATAL` map to `ERROR`, the most severe level available.
/// Returns `None` for anything else, `NOTSET` included.
pub fn resolve_level(name: &str) -> Option<LevelFilter> {
    match name.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Some(LevelFilter::TRACE),
        "DEBUG" => Some(LevelFilter::DEBUG),
        "INFO" => Some(LevelFilter::INFO),
        "WARN" | "WARNING" => Some(LevelFilter::WARN),
        "ERROR" | "CRITICAL" | "FATAL" => Some(LevelFilter::ERROR),
        _ => None,
    }
}

/// Manages logging configuration and global subscriber initialization.
pub struct LoggerManager {
    config: LoggerConfig,
    level: LevelFilter,
    /// Configured level name that did not resolve, kept for the startup warning.
    unknown_level: Option<String>,
}

impl LoggerManager {
    /// Validates the configuration and resolves the log level.
    ///
    /// An unknown level name is not an error: the manager keeps
    /// [`DEFAULT_LEVEL`] and remembers the name for [`Self::report_level`].
    ///
    /// # Errors
    ///
    /// Returns `LoggerError::ValidationError` if configuration validation fails.
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        config.validate()?;

        let (level, unknown_level) = match config.level.as_deref() {
            None => (DEFAULT_LEVEL, None),
            Some(name) => match resolve_level(name) {
                Some(level) => (level, None),
                None => (DEFAULT_LEVEL, Some(name.to_string())),
            },
        };

        Ok(LoggerManager {
            config,
            level,
            unknown_level,
        })
    }

    /// Effective level of the computed filter.
    pub fn level(&self) -> LevelFilter {
        self.level
    }

    pub fn unknown_level(&self) -> Option<&str> {
        self.unknown_level.as_deref()
    }

    /// Filter directives used when `RUST_LOG` is unset.
    pub fn directives(&self) -> String {
        std::iter::once(self.level.to_string())
            .chain(QUIET_TARGETS.iter().map(|d| d.to_string()))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directives()))
    }

    /// Installs the global `tracing` subscriber with the configured layers.
    ///
    /// Must be called once at startup. Emits the unknown-level warning, if
    /// any, through the freshly installed subscriber.
    ///
    /// # Errors
    ///
    /// Returns an error if no layer could be built or a global subscriber is
    /// already installed.
    pub fn init(&mut self) -> Result<(), LoggerError> {
        let mut layers: Vec<BoxedLayer> = Vec::new();

        let console = self.config.console.clone().unwrap_or_default();
        if console.enabled {
            layers.push(self.init_console_logger(&console, self.filter()));
        }

        if let Some(journald) = self.config.journald.as_ref().filter(|j| j.enabled) {
            match self.init_journald_logger(self.filter()) {
                Ok(layer) => {
                    layers.push(layer);
                    print_info!(
                        "Systemd journald logger initialized with identifier: {}",
                        journald.identifier
                    );
                }
                Err(e) => {
                    print_warn!("Failed to initialize systemd journald logger: {}", e);
                }
            }
        }

        if layers.is_empty() {
            print_warn!("No logging layers were initialized. Please check your configuration.");
            return Err(LoggerError::NoLayersConfigured);
        }

        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .map_err(|e| LoggerError::InitializationError(e.to_string()))?;

        self.report_level();
        Ok(())
    }

    /// Logs the outcome of level resolution.
    pub fn report_level(&self) {
        match &self.unknown_level {
            Some(name) => warn!("unknown logging level: {}.", name),
            None => debug!("Log level: {}", self.level),
        }
    }

    fn init_console_logger(&self, config: &ConsoleConfig, filter: EnvFilter) -> BoxedLayer {
        let span_events = if config.show_spans {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let layer = fmt::layer()
            .with_target(config.show_target)
            .with_thread_ids(config.show_thread_ids)
            .with_span_events(span_events)
            .with_ansi(config.ansi_colors)
            .with_writer(io::stdout);

        match config.format {
            LogFormat::Json => layer.json().with_filter(filter).boxed(),
            LogFormat::Pretty => layer.pretty().with_filter(filter).boxed(),
            LogFormat::Compact => layer.compact().with_filter(filter).boxed(),
        }
    }

    #[cfg(unix)]
    fn init_journald_logger(&self, filter: EnvFilter) -> Result<BoxedLayer, LoggerError> {
        let identifier = self
            .config
            .journald
            .as_ref()
            .map(|j| j.identifier.clone())
            .unwrap_or_default();
        let journald_layer = tracing_journald::layer()?.with_syslog_identifier(identifier);
        Ok(journald_layer.with_filter(filter).boxed())
    }

    #[cfg(not(unix))]
    fn init_journald_logger(&self, _filter: EnvFilter) -> Result<BoxedLayer, LoggerError> {
        Err(LoggerError::InitializationError(
            "journald is only available on Unix".to_string(),
        ))
    }
}

// ============================================================================
// logger.rs
// ============================================================================
//! Logging initialization.
//!
//! `LoggerManager` validates a [`LoggerConfig`] and installs the global
//! `tracing` subscriber: a console layer in one of three formats plus an
//! optional systemd journald layer. `RUST_LOG` overrides the configured
//! level when present.

use std::{fmt as std_fmt, io};

use thiserror::Error;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, time::FormatTime, time::SystemTime, time::UtcTime},
    prelude::*,
    EnvFilter, Layer, Registry,
};
use validator::{Validate, ValidationErrors};

use crate::{
    config::logger::{ConsoleConfig, LogFormat, LoggerConfig, TimestampFormat},
    print_info, print_warn,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Logger initialization error: {0}")]
    InitializationError(String),

    #[error("Logger configuration validation error: {0}")]
    ValidationError(#[from] ValidationErrors),

    /// IO error, typically while opening the journald socket.
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("No logging layers were configured or successfully initialized")]
    NoLayersConfigured,

    /// Journald was the only requested output and it could not be opened.
    #[error("Failed to initialize journald logger and console output is disabled")]
    JournaldUnavailable,
}

/// Manages logging configuration and global subscriber initialization.
pub struct LoggerManager {
    config: LoggerConfig,
}

impl LoggerManager {
    /// Creates a new `LoggerManager` and validates the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns `LoggerError::ValidationError` if configuration validation fails.
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        config.validate()?;
        Ok(LoggerManager { config })
    }

    /// Builds the configured layers without installing them.
    pub fn build_layers(&self) -> Result<Vec<BoxedLayer>, LoggerError> {
        let mut layers = Vec::new();

        if let Some(console) = self.config.console.as_ref().filter(|c| c.enabled) {
            layers.push(self.console_layer(console)?);
        }

        if let Some(journald) = self.config.journald.as_ref().filter(|j| j.enabled) {
            match tracing_journald::layer() {
                Ok(layer) => {
                    let layer = layer.with_syslog_identifier(journald.identifier.clone());
                    layers.push(layer.with_filter(self.filter()).boxed());
                    print_info!(
                        "Systemd journald logger initialized with identifier: {}",
                        journald.identifier
                    );
                }
                Err(e) => {
                    print_warn!("Failed to initialize systemd journald logger: {}", e);
                    if layers.is_empty() {
                        return Err(LoggerError::JournaldUnavailable);
                    }
                }
            }
        }

        if layers.is_empty() {
            print_warn!("No logging layers were initialized. Please check your configuration.");
            return Err(LoggerError::NoLayersConfigured);
        }
        Ok(layers)
    }

    /// Installs the global subscriber. Must be called once, before any
    /// tracing macro is expected to produce output.
    pub fn init(&self) -> Result<(), LoggerError> {
        let layers = self.build_layers()?;
        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .map_err(|e| LoggerError::InitializationError(e.to_string()))
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.config.level))
    }

    fn console_layer(&self, config: &ConsoleConfig) -> Result<BoxedLayer, LoggerError> {
        let filter = self.filter();
        let layer = match &self.config.timestamp_format {
            TimestampFormat::Rfc3339 => format_layer(config, SystemTime, filter),
            TimestampFormat::Unix => format_layer(config, UnixSeconds, filter),
            TimestampFormat::Custom(description) => {
                let items = time::format_description::parse_owned::<2>(description)
                    .map_err(|e| LoggerError::InitializationError(e.to_string()))?;
                format_layer(config, UtcTime::new(items), filter)
            }
        };
        Ok(layer)
    }
}

fn format_layer<T>(config: &ConsoleConfig, timer: T, filter: EnvFilter) -> BoxedLayer
where
    T: FormatTime + Send + Sync + 'static,
{
    let span_events = if config.show_spans {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let base = fmt::layer()
        .with_timer(timer)
        .with_target(config.show_target)
        .with_thread_ids(config.show_thread_ids)
        .with_span_events(span_events)
        .with_ansi(config.ansi_colors)
        .with_writer(io::stdout);

    match config.format {
        LogFormat::Json => base.json().with_filter(filter).boxed(),
        LogFormat::Pretty => base.pretty().with_filter(filter).boxed(),
        LogFormat::Compact => base.compact().with_filter(filter).boxed(),
    }
}

/// Seconds since the Unix epoch, with millisecond precision.
struct UnixSeconds;

impl FormatTime for UnixSeconds {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std_fmt::Result {
        let now = time::OffsetDateTime::now_utc();
        write!(w, "{}.{:03}", now.unix_timestamp(), now.millisecond())
    }
}

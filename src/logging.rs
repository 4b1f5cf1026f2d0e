//! Tracing setup and lifecycle.
//!
//! The process installs one subscriber at startup with [`init`] and keeps the
//! returned [`LoggingGuard`] alive until exit; dropping the guard flushes the
//! output streams. Library components never touch global logger state: each one
//! is handed a `tracing::Span` at construction and emits its events inside it.
//!
//! Logs go to stderr so the CLI can print results on stdout. `RUST_LOG` takes
//! precedence over the configured level.
//!
//! # Example
//! ```no_run
//! use snom_scan::logging::{self, OutputFormat, TracingConfig};
//! use tracing::Level;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let guard = logging::init(TracingConfig::new(Level::DEBUG).with_format(OutputFormat::Compact))?;
//! tracing::info!("application started");
//! guard.flush();
//! # Ok(())
//! # }
//! ```

use crate::config::InstrumentConfig;
use std::io::Write;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, colored (interactive use)
    Pretty,
    /// One line per event, no colors
    Compact,
    /// JSON lines for log aggregation
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(OutputFormat::Pretty),
            "compact" => Ok(OutputFormat::Compact),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!(
                "Invalid log format '{}'. Must be one of: pretty, compact, json",
                other
            )),
        }
    }
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub level: Level,
    pub format: OutputFormat,
    /// Log span open/close
    pub with_span_events: bool,
    pub with_file_and_line: bool,
    /// Thread names tell the UI thread and `instrument-worker` apart
    pub with_thread_names: bool,
    /// ANSI colors (Pretty only)
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_span_events: false,
            with_file_and_line: false,
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Level taken from the configuration file.
    pub fn from_config(config: &InstrumentConfig) -> Result<Self, String> {
        Ok(Self::new(parse_log_level(&config.log_level)?))
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Flushes stdout and stderr when dropped.
#[derive(Debug)]
#[must_use = "dropping the guard immediately flushes and ends the logging lifecycle"]
pub struct LoggingGuard {
    _private: (),
}

impl LoggingGuard {
    /// Flush buffered output now.
    pub fn flush(&self) {
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
    }
}

impl Drop for LoggingGuard {
    fn drop(&mut self) {
        tracing::debug!("logging shut down");
        self.flush();
    }
}

/// Install the global subscriber.
///
/// Idempotent: if a subscriber is already installed (tests, embedding
/// applications) this returns a guard without replacing it.
pub fn init(config: TracingConfig) -> Result<LoggingGuard, String> {
    if tracing::dispatcher::has_been_set() {
        return Ok(LoggingGuard { _private: () });
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_span_events(span_events)
        .with_file(config.with_file_and_line)
        .with_line_number(config.with_file_and_line)
        .with_thread_names(config.with_thread_names);

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        OutputFormat::Pretty => base.pretty().with_ansi(config.with_ansi).boxed(),
        OutputFormat::Compact => base.compact().with_ansi(false).boxed(),
        OutputFormat::Json => base.json().boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
        .or_else(|e| {
            // Lost a race with another initializer
            if tracing::dispatcher::has_been_set() {
                Ok(())
            } else {
                Err(format!("Failed to initialize tracing: {}", e))
            }
        })?;

    Ok(LoggingGuard { _private: () })
}

/// Parse log level string into tracing Level
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )),
    }
}

//! Tracing setup for the MEX driver and its CLI.
//!
//! Uses `tracing-subscriber` with:
//! - Multiple output formats (pretty, compact, JSON)
//! - Environment-based filtering (`RUST_LOG` wins over the configured level)
//! - Idempotent initialization; a subscriber installed by a host is left alone
//!
//! # Example
//! ```no_run
//! use optogama_mex::{config::MexConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MexConfig::load()?;
//! logging::init_from_config(&config)?;
//! tracing::info!(port = %config.port, "starting");
//! # Ok(())
//! # }
//! ```

use crate::config::MexConfig;
use std::io::IsTerminal;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// How log lines are rendered on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, human oriented
    Pretty,
    /// One line per event (default)
    Compact,
    /// One JSON object per event, for log collectors
    Json,
}

/// Subscriber settings derived from [`MexConfig`].
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Fallback level when `RUST_LOG` is unset
    pub level: Level,
    /// Line format
    pub format: OutputFormat,
    /// Colored output (ignored for JSON)
    pub with_ansi: bool,
}

impl TracingConfig {
    /// Level and format from the configuration; colors only when stderr is a terminal.
    pub fn from_config(config: &MexConfig) -> Result<Self, String> {
        Ok(Self::new(parse_log_level(&config.log_level)?)
            .with_format(parse_log_format(&config.log_format)?)
            .with_ansi(std::io::stderr().is_terminal()))
    }

    /// Compact, colored output at `level`.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            format: OutputFormat::Compact,
            with_ansi: true,
        }
    }

    /// Set the line format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable ANSI colors.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize tracing from the driver configuration
pub fn init_from_config(config: &MexConfig) -> Result<(), String> {
    init(TracingConfig::from_config(config)?)
}

/// Initialize tracing. Returns `Ok(())` if a subscriber is already installed.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    // stderr keeps command output on stdout scriptable
    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_ansi(config.with_ansi)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_ansi(config.with_ansi)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(env_filter))
        .try_init()
        .or_else(|e| {
            // already initialized by a host or an earlier call
            if tracing::dispatcher::has_been_set() {
                Ok(())
            } else {
                Err(format!("Failed to initialize tracing: {}", e))
            }
        })
}

/// Parse a log format name (`compact`, `pretty`, `json`), case-insensitive.
pub fn parse_log_format(format: &str) -> Result<OutputFormat, String> {
    match format.to_lowercase().as_str() {
        "compact" => Ok(OutputFormat::Compact),
        "pretty" => Ok(OutputFormat::Pretty),
        "json" => Ok(OutputFormat::Json),
        _ => Err(format!(
            "Invalid log format '{}'. Must be one of: compact, pretty, json",
            format
        )),
    }
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

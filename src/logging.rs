//! Tracing Infrastructure
//!
//! Structured logging for applications built on `sonia_common`, using the
//! `tracing` and `tracing-subscriber` crates:
//! - Structured events with fields (`port`, `capture`, `writer`, ...)
//! - Multiple output formats (pretty, compact, JSON)
//! - Environment-based filtering (`RUST_LOG` overrides the configured level)
//!
//! The library itself only emits events. Installing a subscriber is an explicit
//! call made once by the application entry point.
//!
//! # Example
//! ```no_run
//! use sonia_common::{config::SoniaConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SoniaConfig::load()?;
//! logging::init_from_config(&config)?;
//!
//! info!("Application started");
//! # Ok(())
//! # }
//! ```

use std::io::IsTerminal;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::SoniaConfig;
use crate::error::{Result, SoniaError};

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, colored when stdout is a terminal
    #[default]
    Pretty,
    /// One line per event, no colors; what the vehicle consoles expect
    Compact,
    /// One JSON object per event, for recorded mission logs
    Json,
}

/// Subscriber settings. Capture and writer threads are named after their
/// component, so thread names are on unless switched off.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub level: Level,
    pub format: OutputFormat,
    /// Prefix events with the source file and line
    pub with_file_and_line: bool,
    pub with_thread_names: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_file_and_line: true,
            with_thread_names: true,
        }
    }
}

impl TracingConfig {
    /// Level and format from the `[application]` section
    pub fn from_config(config: &SoniaConfig) -> Result<Self> {
        let level = parse_log_level(&config.application.log_level)?;

        Ok(Self {
            level,
            format: config.application.log_format,
            ..Default::default()
        })
    }

    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Drop the file/line prefix, e.g. for field consoles
    pub fn without_location(mut self) -> Self {
        self.with_file_and_line = false;
        self
    }
}

/// Initialize tracing from the application configuration
pub fn init_from_config(config: &SoniaConfig) -> Result<()> {
    init(TracingConfig::from_config(config)?)
}

/// Initialize tracing with custom configuration
///
/// This function is idempotent: if a global subscriber is already installed it
/// returns `Ok(())`, which makes it safe to call from tests.
///
/// # Example
/// ```no_run
/// use sonia_common::logging::{self, OutputFormat, TracingConfig};
/// use tracing::Level;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = TracingConfig::new(Level::DEBUG).with_format(OutputFormat::Json);
/// logging::init(config)?;
/// # Ok(())
/// # }
/// ```
pub fn init(config: TracingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let base = fmt::layer()
        .with_file(config.with_file_and_line)
        .with_line_number(config.with_file_and_line)
        .with_thread_names(config.with_thread_names);

    let layer = match config.format {
        OutputFormat::Pretty => base
            .pretty()
            .with_ansi(std::io::stdout().is_terminal())
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Compact => base
            .compact()
            .with_ansi(false)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Json => base.json().with_filter(env_filter).boxed(),
    };

    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => Ok(()),
        // Expected in tests and when several components try to init tracing
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(SoniaError::Other(anyhow::anyhow!(
            "Failed to initialize tracing: {e}"
        ))),
    }
}

/// Parse log level string into tracing Level
fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(SoniaError::invalid(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));

        // Case insensitive
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("Debug"), Ok(Level::DEBUG)));

        assert!(matches!(
            parse_log_level("chatty"),
            Err(SoniaError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_tracing_config_from_config() {
        let mut config = SoniaConfig::default();
        config.application.log_level = "debug".to_string();
        config.application.log_format = OutputFormat::Json;

        let tracing_config = TracingConfig::from_config(&config).unwrap();
        assert_eq!(tracing_config.level, Level::DEBUG);
        assert_eq!(tracing_config.format, OutputFormat::Json);
    }

    #[test]
    fn test_tracing_config_builder() {
        let config = TracingConfig::new(Level::WARN)
            .with_format(OutputFormat::Compact)
            .without_location();

        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, OutputFormat::Compact);
        assert!(!config.with_file_and_line);
        assert!(config.with_thread_names);
    }

    #[test]
    fn test_output_format_names() {
        #[derive(Deserialize)]
        struct Section {
            log_format: OutputFormat,
        }
        let section: Section = toml::from_str("log_format = \"compact\"").unwrap();
        assert_eq!(section.log_format, OutputFormat::Compact);
        assert!(toml::from_str::<Section>("log_format = \"xml\"").is_err());
    }
}

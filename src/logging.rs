//! Tracing initialisation
//!
//! Library code only emits `tracing` events. Binaries call [`init`] or
//! [`init_from_config`] once to install a `tracing-subscriber` pipeline with
//! one of three output formats:
//! - Pretty, with colors (development)
//! - Compact, without colors (production)
//! - JSON (log aggregation)
//!
//! `RUST_LOG` takes precedence over the configured level.
//!
//! # Example
//! ```no_run
//! use amc100::logging::{self, LogFormat, LoggingSetup};
//! use tracing::Level;
//!
//! logging::init(LoggingSetup::new(Level::DEBUG).with_format(LogFormat::Json))?;
//! tracing::info!(address = "192.168.1.1", "connecting");
//! # Ok::<(), String>(())
//! ```

use crate::config::Amc100Config;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer,
};

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Pretty-printed format with colors
    Pretty,
    /// Compact format without colors
    Compact,
    /// JSON, one object per line
    Json,
}

impl LogFormat {
    /// Parse `pretty`, `compact` or `json`.
    pub fn parse(format: &str) -> Result<Self, String> {
        match format.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "Invalid log format '{}'. Must be one of: pretty, compact, json",
                other
            )),
        }
    }
}

/// Subscriber options
#[derive(Debug, Clone)]
pub struct LoggingSetup {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: LogFormat,
    /// Emit span open/close events
    pub with_span_events: bool,
    /// Include file and line numbers
    pub with_file_and_line: bool,
    /// Include thread names
    pub with_thread_names: bool,
    /// Enable ANSI colors (pretty format only)
    pub with_ansi: bool,
}

impl Default for LoggingSetup {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            with_span_events: false,
            with_file_and_line: false,
            with_thread_names: false,
            with_ansi: true,
        }
    }
}

impl LoggingSetup {
    /// Setup with the given default level
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Setup described by the `[logging]` table
    pub fn from_config(config: &Amc100Config) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&config.logging.level)?,
            format: LogFormat::parse(&config.logging.format)?,
            ..Default::default()
        })
    }

    /// Set output format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable span events
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize logging from the loaded configuration
pub fn init_from_config(config: &Amc100Config) -> Result<(), String> {
    init(LoggingSetup::from_config(config)?)
}

/// Install the global subscriber.
///
/// Idempotent: if a subscriber is already installed (tests, embedding
/// applications) this returns `Ok(())`.
pub fn init(setup: LoggingSetup) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(setup.level.as_str().to_lowercase()));

    let span_events = if setup.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let result = match setup.format {
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_span_events(span_events)
                .with_file(setup.with_file_and_line)
                .with_line_number(setup.with_file_and_line)
                .with_thread_names(setup.with_thread_names)
                .with_ansi(setup.with_ansi)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(fmt_layer).try_init()
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_span_events(span_events)
                .with_file(setup.with_file_and_line)
                .with_line_number(setup.with_file_and_line)
                .with_thread_names(setup.with_thread_names)
                .with_ansi(false)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(fmt_layer).try_init()
        }
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_span_events(span_events)
                .with_file(setup.with_file_and_line)
                .with_line_number(setup.with_file_and_line)
                .with_thread_names(setup.with_thread_names)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(fmt_layer).try_init()
        }
    };

    result.or_else(already_initialized)
}

fn already_initialized(e: TryInitError) -> Result<(), String> {
    // Expected in tests and when an embedding application owns the subscriber.
    if e.to_string()
        .contains("a global default trace dispatcher has already been set")
    {
        Ok(())
    } else {
        Err(format!("Failed to initialize tracing: {}", e))
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

        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_setup_from_config() {
        let mut config = Amc100Config::default();
        config.logging.level = "debug".into();
        config.logging.format = "compact".into();

        let setup = LoggingSetup::from_config(&config).unwrap();
        assert!(matches!(setup.level, Level::DEBUG));
        assert_eq!(setup.format, LogFormat::Compact);

        config.logging.format = "yaml".into();
        assert!(LoggingSetup::from_config(&config).is_err());
    }

    #[test]
    fn test_init_is_idempotent() {
        let setup = LoggingSetup::new(Level::WARN).with_format(LogFormat::Compact);
        assert!(init(setup.clone()).is_ok());
        assert!(init(setup).is_ok());
    }
}

//! Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `amc100.toml` (optional; every field has a default)
//! 2. Environment variables prefixed with `AMC100_`, nested with a double
//!    underscore, e.g. `AMC100_CLIENT__REQUEST_TIMEOUT_MS=500`
//!
//! # Example
//! ```no_run
//! use amc100::config::Amc100Config;
//!
//! let config = Amc100Config::load()?;
//! config.validate()?;
//! println!("Simulator binds {}", config.server.bind);
//! # Ok::<(), amc100::AmcError>(())
//! ```

use crate::error::{AmcError, AmcResult};
use crate::logging::parse_log_level;
use crate::transport::{TcpTransport, DEFAULT_PORT, DEFAULT_TIMEOUT_MS};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file.
pub const DEFAULT_CONFIG_FILE: &str = "amc100.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Amc100Config {
    /// Client-side transport settings
    #[serde(default)]
    pub client: ClientConfig,
    /// Simulator server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// TCP client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Port used when an address carries none
    #[serde(default = "default_port")]
    pub default_port: u16,
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Reply timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

/// Simulator server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Serial number reported by the simulated device
    #[serde(default = "default_serial_number")]
    pub serial_number: String,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_request_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_bind() -> String {
    format!("127.0.0.1:{DEFAULT_PORT}")
}

fn default_serial_number() -> String {
    "AMC100-SIM-0001".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_port: default_port(),
            connect_timeout_ms: default_connect_timeout(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            serial_number: default_serial_number(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ClientConfig {
    /// TCP transport configured with these settings.
    pub fn transport(&self) -> TcpTransport {
        TcpTransport::new()
            .with_default_port(self.default_port)
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms))
    }
}

impl Amc100Config {
    /// Load configuration from `amc100.toml` and environment variables
    pub fn load() -> AmcResult<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AmcResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("AMC100_").split("__"))
            .extract()
            .map_err(|e| AmcError::Config(e.to_string()))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AmcResult<()> {
        parse_log_level(&self.logging.level).map_err(AmcError::Config)?;

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(AmcError::Config(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            )));
        }

        if self.client.default_port == 0 {
            return Err(AmcError::Config("client.default_port must not be 0".into()));
        }
        if self.client.connect_timeout_ms == 0 || self.client.request_timeout_ms == 0 {
            return Err(AmcError::Config("client timeouts must be positive".into()));
        }
        if self.server.bind.trim().is_empty() {
            return Err(AmcError::Config("server.bind must not be empty".into()));
        }
        if self.server.serial_number.trim().is_empty() {
            return Err(AmcError::Config("server.serial_number must not be empty".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_missing_file_gives_defaults() {
        let config = Amc100Config::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config, Amc100Config::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[client]
request_timeout_ms = 750

[server]
bind = "0.0.0.0:9191"

[logging]
level = "debug"
format = "json"
"#
        )
        .unwrap();

        let config = Amc100Config::load_from(file.path()).unwrap();
        assert_eq!(config.client.request_timeout_ms, 750);
        assert_eq!(config.client.default_port, DEFAULT_PORT);
        assert_eq!(config.server.bind, "0.0.0.0:9191");
        assert_eq!(config.logging.format, "json");
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        std::env::set_var("AMC100_SERVER__SERIAL_NUMBER", "ENV-42");
        let config = Amc100Config::load_from("does/not/exist.toml");
        std::env::remove_var("AMC100_SERVER__SERIAL_NUMBER");

        assert_eq!(config.unwrap().server.serial_number, "ENV-42");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = Amc100Config::default();
        config.logging.level = "loud".into();
        assert!(matches!(config.validate(), Err(AmcError::Config(_))));

        let mut config = Amc100Config::default();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());

        let mut config = Amc100Config::default();
        config.client.request_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serializes_to_toml() {
        let text = toml::to_string(&Amc100Config::default()).unwrap();
        assert!(text.contains("[client]"));
        let back: Amc100Config = toml::from_str(&text).unwrap();
        assert_eq!(back, Amc100Config::default());
    }
}

//! Gateway configuration.
//!
//! Supports configuration from:
//! - TOML file (default: `butler.toml`)
//! - Environment variables with `BUTLER__` prefix (double underscore for nesting)
//! - In-file variable substitution: `${VAR}` or `${VAR:-default}`
//!
//! Environment variable examples:
//! - `BUTLER__SERVER__BIND=0.0.0.0:9001`
//! - `BUTLER__TIMEOUT__IDLE_SECS=120`
//! - `BUTLER__BACKEND__MODE=tcp`
//!
//! In-file substitution examples:
//! ```toml
//! [backend]
//! data_store = "${STORE_HOST:-127.0.0.1}:11000"
//! ```

mod backend;
mod log;
mod server;
mod timeout;

use std::path::Path;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use backend::{
    BackendConfig, BackendMode, DEFAULT_BUS_PUBLISH_PORT, DEFAULT_BUS_SUBSCRIBE_PORT,
    DEFAULT_DATA_STORE_PORT, DEFAULT_REQUEST_TIMEOUT_MS,
};
pub use log::LogConfig;
pub use server::{ServerConfig, DEFAULT_PORT};
pub use timeout::{TimeoutConfig, DEFAULT_IDLE_SECS, DEFAULT_SCAN_INTERVAL_MS};

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let Ok(re) = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}") else {
        return content.to_string();
    };
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration.
    pub log: LogConfig,
    /// Listener configuration.
    pub server: ServerConfig,
    /// Idle eviction configuration.
    pub timeout: TimeoutConfig,
    /// Data store and broadcast bus configuration.
    pub backend: BackendConfig,
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// Config parsing/loading error.
    Config(config::ConfigError),
    /// Invalid configuration value.
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file is not an error: defaults and `BUTLER__` variables
    /// still apply.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("server.bind", format!("0.0.0.0:{}", DEFAULT_PORT))?
            .set_default("server.workers", 0)?
            .set_default("timeout.idle_secs", DEFAULT_IDLE_SECS as i64)?
            .set_default("timeout.scan_interval_ms", DEFAULT_SCAN_INTERVAL_MS as i64)?
            .set_default("backend.mode", "memory")?
            .set_default(
                "backend.data_store",
                format!("127.0.0.1:{}", DEFAULT_DATA_STORE_PORT),
            )?
            .set_default(
                "backend.bus_publish",
                format!("127.0.0.1:{}", DEFAULT_BUS_PUBLISH_PORT),
            )?
            .set_default(
                "backend.bus_subscribe",
                format!("127.0.0.1:{}", DEFAULT_BUS_SUBSCRIBE_PORT),
            )?
            .set_default("backend.request_timeout_ms", DEFAULT_REQUEST_TIMEOUT_MS as i64)?;

        let path = path.as_ref();
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let substituted = substitute_env_vars(&content);
            builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
        }

        // Override with environment variables (BUTLER__SERVER__BIND, etc.)
        let cfg = builder
            .add_source(
                Environment::with_prefix("BUTLER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (for testing).
    #[allow(dead_code)]
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let substituted = substitute_env_vars(content);
        let config: Config = toml::from_str(&substituted)
            .map_err(|e| ConfigError::Validation(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.log.validate().map_err(ConfigError::Validation)?;
        self.timeout.validate().map_err(ConfigError::Validation)?;
        self.backend.validate().map_err(ConfigError::Validation)?;
        Ok(())
    }
}

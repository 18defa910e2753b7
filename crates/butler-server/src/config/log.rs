//! Logging configuration.

use serde::Deserialize;

const LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset: a level name, or a full
    /// `env_logger` directive such as `info,butler_server::fanout=debug`.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LogConfig {
    /// The `env_logger` default filter.
    pub fn filter(&self) -> &str {
        self.level.trim()
    }

    /// Plain level names must be known; directives are left to `env_logger`.
    pub fn validate(&self) -> Result<(), String> {
        let filter = self.filter();
        if filter.is_empty() {
            return Err("log.level must not be empty".to_string());
        }
        let is_directive = filter.contains(['=', ',']);
        if !is_directive && !LEVELS.contains(&filter.to_ascii_lowercase().as_str()) {
            return Err(format!("log.level {:?} is not a known level", filter));
        }
        Ok(())
    }
}

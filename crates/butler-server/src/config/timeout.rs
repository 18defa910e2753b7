//! Idle-connection eviction settings.

use std::time::Duration;

use serde::Deserialize;

/// Default idle threshold in seconds.
pub const DEFAULT_IDLE_SECS: u64 = 60;

/// Default scan period in milliseconds.
pub const DEFAULT_SCAN_INTERVAL_MS: u64 = 1000;

/// Timeout manager configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Close connections with no reads for this many seconds.
    #[serde(default = "default_idle_secs")]
    pub idle_secs: u64,
    /// How often the registry is scanned.
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
}

fn default_idle_secs() -> u64 {
    DEFAULT_IDLE_SECS
}

fn default_scan_interval_ms() -> u64 {
    DEFAULT_SCAN_INTERVAL_MS
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            idle_secs: DEFAULT_IDLE_SECS,
            scan_interval_ms: DEFAULT_SCAN_INTERVAL_MS,
        }
    }
}

impl TimeoutConfig {
    #[inline]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    #[inline]
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.idle_secs == 0 {
            return Err("timeout.idle_secs must be greater than 0".to_string());
        }
        if self.scan_interval_ms == 0 {
            return Err("timeout.scan_interval_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

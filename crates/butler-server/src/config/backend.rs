//! Backend selection and addresses.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;

/// Default data-store request/reply port.
pub const DEFAULT_DATA_STORE_PORT: u16 = 11000;

/// Default broadcast bus publish port.
pub const DEFAULT_BUS_PUBLISH_PORT: u16 = 10001;

/// Default broadcast bus subscribe port.
pub const DEFAULT_BUS_SUBSCRIBE_PORT: u16 = 10000;

/// Default data-store request timeout in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Which backend implementation the gateway talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// In-process user table and broadcast bus.
    #[default]
    Memory,
    /// Line-delimited TCP services.
    Tcp,
}

/// Backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub mode: BackendMode,
    /// Data-store request/reply endpoint.
    #[serde(default = "default_data_store")]
    pub data_store: SocketAddr,
    /// Broadcast bus endpoint messages are published to.
    #[serde(default = "default_bus_publish")]
    pub bus_publish: SocketAddr,
    /// Broadcast bus endpoint the fanout subscribes to.
    #[serde(default = "default_bus_subscribe")]
    pub bus_subscribe: SocketAddr,
    /// Upper bound for one data-store call (connect, write and read).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn localhost(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

fn default_data_store() -> SocketAddr {
    localhost(DEFAULT_DATA_STORE_PORT)
}

fn default_bus_publish() -> SocketAddr {
    localhost(DEFAULT_BUS_PUBLISH_PORT)
}

fn default_bus_subscribe() -> SocketAddr {
    localhost(DEFAULT_BUS_SUBSCRIBE_PORT)
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            mode: BackendMode::default(),
            data_store: default_data_store(),
            bus_publish: default_bus_publish(),
            bus_subscribe: default_bus_subscribe(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl BackendConfig {
    #[inline]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.request_timeout_ms == 0 {
            return Err("backend.request_timeout_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

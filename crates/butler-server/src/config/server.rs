//! Listener configuration.

use std::net::{Ipv4Addr, SocketAddr};

use serde::Deserialize;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 9000;

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP bind address.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Number of worker threads (0 = one per CPU).
    #[serde(default)]
    pub workers: usize,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            workers: 0,
        }
    }
}

impl ServerConfig {
    /// Worker count with 0 resolved to the CPU count.
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

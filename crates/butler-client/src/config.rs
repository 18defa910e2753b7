//! Client configuration types.

use std::net::SocketAddr;
use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Gateway address.
    pub address: SocketAddr,
    /// How long a request waits for its reply.
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Create a new config with the given address.
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Set the reply timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

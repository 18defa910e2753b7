//! Backend gateway: the data store and the broadcast bus.
//!
//! Two call styles:
//! - [`RequestReply`]: one request, exactly one reply, no state kept between
//!   calls. Failures come back as an empty string, never as an error.
//! - [`Publisher`]: fire-and-forget. `publish` queues and returns.
//!
//! [`BusSubscription`] is the receiving end of the bus, driven by the fanout
//! thread.

mod memory;
mod tcp;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackendConfig, BackendMode};

pub use memory::{local_bus, LocalPublisher, LocalSubscription, MemoryStore};
pub use tcp::{TcpBusSubscription, TcpPublisher, TcpRequestReply};

/// Blocking request/reply call to the data store.
pub trait RequestReply: Send + Sync {
    /// Send `request` and wait for its reply. An empty string means no reply.
    fn request(&self, request: &str) -> String;
}

/// Fire-and-forget publish to the broadcast bus.
pub trait Publisher: Send + Sync {
    fn publish(&self, message: String);
}

/// All-topics subscription to the broadcast bus.
pub trait BusSubscription: Send {
    /// Wait up to `timeout` for the next message. `Ok(None)` on timeout.
    fn next_message(&mut self, timeout: Duration) -> io::Result<Option<String>>;
}

/// The three backend endpoints the gateway is wired to.
pub struct Backends {
    pub store: Arc<dyn RequestReply>,
    pub publisher: Arc<dyn Publisher>,
    pub subscription: Box<dyn BusSubscription>,
}

impl Backends {
    /// In-process user table and broadcast bus.
    pub fn memory() -> Self {
        let (publisher, subscription) = local_bus();
        Self {
            store: Arc::new(MemoryStore::new()),
            publisher: Arc::new(publisher),
            subscription: Box::new(subscription),
        }
    }

    /// Line-delimited TCP services at the configured addresses.
    pub fn tcp(config: &BackendConfig) -> io::Result<Self> {
        Ok(Self {
            store: Arc::new(TcpRequestReply::new(
                config.data_store,
                config.request_timeout(),
            )),
            publisher: Arc::new(TcpPublisher::start(
                config.bus_publish,
                config.request_timeout(),
            )?),
            subscription: Box::new(TcpBusSubscription::new(config.bus_subscribe)),
        })
    }

    pub fn from_config(config: &BackendConfig) -> io::Result<Self> {
        match config.mode {
            BackendMode::Memory => Ok(Self::memory()),
            BackendMode::Tcp => Self::tcp(config),
        }
    }
}

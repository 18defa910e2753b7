//! Blocking request client.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use log::debug;
use mio::net::TcpStream;
use parking_lot::Mutex;

use butler_core::{ReactorCore, ReactorHandle, Shutdown};

use crate::config::ClientConfig;
use crate::correlator::{correlator, CorrelatorMap};
use crate::error::{ClientError, Result};
use crate::reactor::ClientReactor;

/// Gateway client. Cheap to share across threads by reference; every
/// request runs on its own connection.
pub struct Client {
    config: ClientConfig,
    reactor: ReactorHandle,
    correlators: Arc<CorrelatorMap>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Start the client reactor thread.
    pub fn start(config: ClientConfig) -> Result<Self> {
        let core = ReactorCore::new(Arc::new(Shutdown::new()))?;
        let reactor = core.handle();
        let correlators = Arc::new(CorrelatorMap::default());

        let thread = {
            let correlators = Arc::clone(&correlators);
            thread::Builder::new()
                .name("butler-client".to_string())
                .spawn(move || ClientReactor::new(core, correlators).run())?
        };

        Ok(Self {
            config,
            reactor,
            correlators,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Send one request on a fresh connection and block for its reply.
    pub fn request(&self, payload: impl Into<Bytes>) -> Result<Bytes> {
        if self.reactor.is_shutdown() {
            return Err(ClientError::Shutdown);
        }

        let stream = TcpStream::connect(self.config.address)?;
        let token = self.reactor.next_token();
        let (correlator, pending) = correlator();

        self.correlators.insert(token, correlator);
        if self.reactor.is_shutdown() {
            // The reactor may already have released its correlators.
            self.correlators.remove(token);
            return Err(ClientError::Shutdown);
        }
        if let Err(e) = self.reactor.connect(token, stream, payload.into()) {
            self.correlators.remove(token);
            return Err(e.into());
        }

        let reply = pending.wait(self.config.request_timeout);
        if matches!(reply, Err(ClientError::Timeout)) {
            debug!("Request on {:?} timed out", token);
            self.reactor.close(token);
        }
        reply
    }

    /// Send a textual request and decode the reply as UTF-8 (lossy).
    pub fn request_str(&self, payload: &str) -> Result<String> {
        let reply = self.request(Bytes::copy_from_slice(payload.as_bytes()))?;
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }

    /// Stop the reactor thread and wait for it. Requests still waiting on
    /// other threads fail with `ConnectionClosed`.
    pub fn shutdown(&self) {
        self.reactor.shutdown();
        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            let _ = thread.join();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}

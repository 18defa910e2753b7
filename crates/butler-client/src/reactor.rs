//! Client reactor: the connecting variant.
//!
//! Connections arrive through `REGISTER` changes with write interest. Write
//! readiness first completes the connect, then drains the queued request.
//! The first read on a connection is the reply: it is copied out of the
//! scratch buffer, handed to the connection's correlator, and the connection
//! is closed.

use std::ops::ControlFlow;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error, trace};
use mio::{Events, Token};

use butler_core::{FlushStatus, ReactorCore, ReadStatus, WAKER};

use crate::correlator::CorrelatorMap;

pub(crate) struct ClientReactor {
    core: ReactorCore,
    correlators: Arc<CorrelatorMap>,
}

impl ClientReactor {
    pub fn new(core: ReactorCore, correlators: Arc<CorrelatorMap>) -> Self {
        Self { core, correlators }
    }

    /// Run until shutdown is requested.
    pub fn run(mut self) {
        let mut events = Events::with_capacity(256);

        while !self.core.is_shutdown() {
            for token in self.core.apply_pending() {
                self.forget(token);
            }

            if let Err(e) = self.core.poll(&mut events, None) {
                error!("Client poll failed: {}", e);
                break;
            }

            for event in events.iter() {
                let token = event.token();
                if token == WAKER {
                    continue;
                }

                if event.is_error() {
                    debug!("Connection {:?} failed", token);
                    self.close(token);
                    continue;
                }
                if event.is_writable() {
                    self.handle_writable(token);
                }
                if event.is_readable() && self.core.contains(token) {
                    self.handle_readable(token);
                }
            }
        }

        let abandoned = self.correlators.clear();
        debug!("Client reactor stopped ({} requests abandoned)", abandoned);
    }

    fn handle_writable(&mut self, token: Token) {
        match self.core.finish_connect(token) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                debug!("Connect for {:?} failed: {}", token, e);
                self.close(token);
                return;
            }
        }

        match self.core.flush(token) {
            Ok(FlushStatus::Drained) => trace!("Request on {:?} sent", token),
            Ok(FlushStatus::Pending) => {}
            Err(e) => {
                debug!("Write on {:?} failed: {}", token, e);
                self.close(token);
            }
        }
    }

    fn handle_readable(&mut self, token: Token) {
        let mut reply = None;
        let status = self.core.read(token, |data| {
            reply = Some(Bytes::copy_from_slice(data));
            ControlFlow::Break(())
        });

        if let Some(reply) = reply {
            if let Some(correlator) = self.correlators.remove(token) {
                if !correlator.complete(reply) {
                    trace!("Caller for {:?} already gave up", token);
                }
            }
            // One request per connection: the reply ends it.
            self.close(token);
        } else if status == ReadStatus::Closed {
            self.close(token);
        }
    }

    fn close(&mut self, token: Token) {
        self.core.close(token);
        self.forget(token);
    }

    fn forget(&mut self, token: Token) {
        // Dropping an uncompleted correlator wakes its caller with an error.
        self.correlators.remove(token);
    }
}

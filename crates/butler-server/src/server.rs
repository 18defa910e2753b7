//! Server reactor: the listening variant.
//!
//! Accepts connections, hands every read to the worker pool and writes
//! queued replies and broadcasts. Owns the listener, everything else lives
//! in the shared [`ReactorCore`].

use std::io;
use std::ops::ControlFlow;
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::Sender;
use log::{debug, error, info, warn};
use mio::net::TcpListener;
use mio::{Events, Interest, Token};

use butler_core::{ConnectionSink, FlushStatus, ReactorCore, ReadStatus, WAKER};

use crate::fanout::SubscriberSet;
use crate::timeout::IdleRegistry;
use crate::worker::WorkerMsg;

/// Token for the listener socket.
pub const LISTENER: Token = Token(0);

/// Server reactor.
pub struct Server {
    core: ReactorCore,
    listener: TcpListener,
    jobs: Sender<WorkerMsg>,
    idle: Arc<IdleRegistry>,
    subscribers: Arc<SubscriberSet>,
    /// This reactor as seen by the fanout.
    sink: Arc<dyn ConnectionSink>,
}

impl Server {
    /// Register `listener` with the reactor.
    pub fn new(
        core: ReactorCore,
        mut listener: TcpListener,
        jobs: Sender<WorkerMsg>,
        idle: Arc<IdleRegistry>,
        subscribers: Arc<SubscriberSet>,
    ) -> io::Result<Self> {
        core.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let sink: Arc<dyn ConnectionSink> = Arc::new(core.handle());

        Ok(Self {
            core,
            listener,
            jobs,
            idle,
            subscribers,
            sink,
        })
    }

    /// Run until shutdown. Only a failing poll ends the loop early.
    pub fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(1024);
        info!("Server reactor {} running", self.sink.reactor_id());

        while !self.core.is_shutdown() {
            for token in self.core.apply_pending() {
                self.forget(token);
            }

            if let Err(e) = self.core.poll(&mut events, None) {
                error!("Server poll failed: {}", e);
                return Err(e);
            }

            for event in events.iter() {
                match event.token() {
                    WAKER => {}
                    LISTENER => self.accept_connections(),
                    token => {
                        if event.is_writable() {
                            self.handle_writable(token);
                        }
                        if event.is_readable() && self.core.contains(token) {
                            self.handle_readable(token);
                        }
                    }
                }
            }
        }

        debug!(
            "Server reactor stopped with {} open connections",
            self.core.len()
        );
        Ok(())
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let token = self.core.handle().next_token();
                    if let Err(e) = self.core.insert(token, stream, Interest::READABLE) {
                        warn!("Failed to register connection from {}: {}", addr, e);
                        continue;
                    }
                    self.idle.touch(token);
                    self.subscribers.add(token, Arc::clone(&self.sink));
                    debug!("Accepted connection {:?} from {}", token, addr);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn handle_readable(&mut self, token: Token) {
        let jobs = &self.jobs;
        let mut received = false;

        let status = self.core.read(token, |data| {
            received = true;
            let msg = WorkerMsg::Request {
                token,
                data: Bytes::copy_from_slice(data),
            };
            match jobs.send(msg) {
                Ok(()) => ControlFlow::Continue(()),
                Err(_) => ControlFlow::Break(()),
            }
        });

        if received {
            self.idle.touch(token);
        }
        if status == ReadStatus::Closed {
            self.close(token);
        }
    }

    fn handle_writable(&mut self, token: Token) {
        match self.core.flush(token) {
            Ok(FlushStatus::Drained | FlushStatus::Pending) => {}
            Err(e) => {
                debug!("Write to {:?} failed: {}", token, e);
                self.close(token);
            }
        }
    }

    fn close(&mut self, token: Token) {
        self.core.close(token);
        self.forget(token);
    }

    /// Drop every registry entry for a closed connection.
    fn forget(&mut self, token: Token) {
        self.idle.remove(token);
        self.subscribers.remove(token, self.sink.reactor_id());
    }
}

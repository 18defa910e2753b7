//! Reactor core shared by the server and client variants.
//!
//! Threading model:
//! - [`ReactorCore`] lives on the reactor thread. It alone touches the
//!   `mio::Poll`, the scratch read buffer and the connection table.
//! - [`ReactorHandle`] is the cross-thread side. It only ever appends to the
//!   outbound queues and the pending-work queue, then wakes the poll.
//!
//! The scratch buffer is single-writer: exactly one thread reads, and read
//! callbacks must copy out what they keep before the next read reuses it.

use std::io::{self, Read};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use bytes::Bytes;
use log::{debug, trace, warn};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Registry, Token, Waker};

use crate::outbound::{FlushStatus, OutboundQueues};
use crate::pending::{PendingChange, PendingQueue};
use crate::shutdown::Shutdown;

/// Size of the reusable read buffer.
pub const SCRATCH_SIZE: usize = 8 * 1024;

/// Token reserved for the poll waker.
pub const WAKER: Token = Token(usize::MAX);

/// First token handed out to connections. Variants may reserve lower tokens
/// (the server uses `Token(0)` for its listener).
const FIRST_CONNECTION: usize = 1;

static NEXT_REACTOR_ID: AtomicUsize = AtomicUsize::new(0);

/// Anything a broadcast can be delivered through: a connection token on some
/// reactor.
pub trait ConnectionSink: Send + Sync {
    /// Process-unique id of the reactor owning the connection.
    fn reactor_id(&self) -> usize;

    /// Queue `data` for `token`. Returns false if the connection is gone.
    fn send(&self, token: Token, data: Bytes) -> bool;
}

/// State shared between the reactor thread and every handle.
struct ReactorShared {
    id: usize,
    pending: PendingQueue,
    outbound: OutboundQueues,
    shutdown: Arc<Shutdown>,
    next_token: AtomicUsize,
}

/// Thread-safe handle to a running reactor.
#[derive(Clone)]
pub struct ReactorHandle {
    shared: Arc<ReactorShared>,
}

impl ReactorHandle {
    /// Process-unique reactor id.
    #[inline]
    pub fn id(&self) -> usize {
        self.shared.id
    }

    /// Allocate a fresh connection token. Tokens are never reused.
    pub fn next_token(&self) -> Token {
        Token(self.shared.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Queue `data` for `token` and ask for write interest.
    ///
    /// Callable from any thread; never blocks on I/O. Buffers for one
    /// connection are written in call order. Returns false (and drops the
    /// data) if the connection is unknown or already closed.
    pub fn send(&self, token: Token, data: impl Into<Bytes>) -> bool {
        if !self.shared.outbound.enqueue(token, data.into()) {
            trace!("Dropping send to closed connection {:?}", token);
            return false;
        }
        let modify = PendingChange::Modify {
            token,
            interest: Interest::READABLE | Interest::WRITABLE,
        };
        if let Err(e) = self.shared.pending.push(modify) {
            warn!("Failed to wake reactor {}: {}", self.shared.id, e);
        }
        true
    }

    /// Hand a connecting stream to the reactor with `request` already queued.
    /// The reactor registers it for write readiness, which fires once the
    /// connect completes.
    pub fn connect(&self, token: Token, stream: TcpStream, request: Bytes) -> io::Result<()> {
        self.shared.outbound.open(token);
        self.shared.outbound.enqueue(token, request);
        self.shared.pending.push(PendingChange::Register {
            token,
            stream,
            interest: Interest::WRITABLE,
        })
    }

    /// Ask the reactor to close `token` through its normal close path.
    pub fn close(&self, token: Token) {
        if let Err(e) = self.shared.pending.push(PendingChange::Close { token }) {
            warn!("Failed to wake reactor {}: {}", self.shared.id, e);
        }
    }

    /// Whether `token` still has an outbound queue (i.e. is not closed).
    pub fn is_open(&self, token: Token) -> bool {
        self.shared.outbound.contains(token)
    }

    /// Number of open connections known to the outbound map.
    pub fn open_connections(&self) -> usize {
        self.shared.outbound.len()
    }

    /// Stop the reactor loop at its next iteration boundary.
    pub fn shutdown(&self) {
        self.shared.shutdown.trigger();
        if let Err(e) = self.shared.pending.wake() {
            debug!("Wake on shutdown failed: {}", e);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.is_triggered()
    }
}

impl ConnectionSink for ReactorHandle {
    fn reactor_id(&self) -> usize {
        self.id()
    }

    fn send(&self, token: Token, data: Bytes) -> bool {
        ReactorHandle::send(self, token, data)
    }
}

/// Result of draining a readable connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Nothing more to read for now.
    Open,
    /// Peer closed or the stream failed; the caller must close it.
    Closed,
}

/// A registered stream, owned by the reactor thread.
struct Connection {
    stream: TcpStream,
    interest: Interest,
    connected: bool,
}

/// Reactor-thread half: poll, scratch buffer, connection table.
pub struct ReactorCore {
    poll: Poll,
    scratch: Box<[u8]>,
    connections: AHashMap<Token, Connection>,
    shared: Arc<ReactorShared>,
}

impl ReactorCore {
    pub fn new(shutdown: Arc<Shutdown>) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER)?;
        let shared = Arc::new(ReactorShared {
            id: NEXT_REACTOR_ID.fetch_add(1, Ordering::Relaxed),
            pending: PendingQueue::new(waker),
            outbound: OutboundQueues::new(),
            shutdown,
            next_token: AtomicUsize::new(FIRST_CONNECTION),
        });

        Ok(Self {
            poll,
            scratch: vec![0u8; SCRATCH_SIZE].into_boxed_slice(),
            connections: AHashMap::new(),
            shared,
        })
    }

    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.is_triggered()
    }

    /// Block until something is ready or the waker fires.
    pub fn poll(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        match self.poll.poll(events, timeout) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                events.clear();
                Ok(())
            }
            other => other,
        }
    }

    /// Register an already-connected stream (accepted on the reactor thread).
    pub fn insert(&mut self, token: Token, mut stream: TcpStream, interest: Interest) -> io::Result<()> {
        self.poll.registry().register(&mut stream, token, interest)?;
        self.shared.outbound.open(token);
        self.connections.insert(
            token,
            Connection {
                stream,
                interest,
                connected: true,
            },
        );
        Ok(())
    }

    pub fn contains(&self, token: Token) -> bool {
        self.connections.contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Apply every queued change. Returns the tokens closed along the way so
    /// the variant can clear its own registries.
    pub fn apply_pending(&mut self) -> Vec<Token> {
        let mut closed = Vec::new();

        for change in self.shared.pending.drain() {
            match change {
                PendingChange::Register {
                    token,
                    mut stream,
                    interest,
                } => {
                    if let Err(e) = self.poll.registry().register(&mut stream, token, interest) {
                        warn!("Failed to register connection {:?}: {}", token, e);
                        self.shared.outbound.remove(token);
                        closed.push(token);
                        continue;
                    }
                    self.connections.insert(
                        token,
                        Connection {
                            stream,
                            interest,
                            connected: false,
                        },
                    );
                }
                PendingChange::Modify { token, interest } => {
                    if let Err(e) = self.set_interest(token, interest) {
                        debug!("Failed to update interest for {:?}: {}", token, e);
                        if self.close(token) {
                            closed.push(token);
                        }
                    }
                }
                PendingChange::Close { token } => {
                    if self.close(token) {
                        closed.push(token);
                    }
                }
            }
        }

        closed
    }

    /// Read until the stream would block, handing each read to `on_data`.
    /// The slice borrows the scratch buffer and is only valid for the call.
    /// Returning `ControlFlow::Break` stops reading early.
    pub fn read<F>(&mut self, token: Token, mut on_data: F) -> ReadStatus
    where
        F: FnMut(&[u8]) -> ControlFlow<()>,
    {
        let Some(conn) = self.connections.get_mut(&token) else {
            return ReadStatus::Closed;
        };

        loop {
            match conn.stream.read(&mut self.scratch) {
                Ok(0) => return ReadStatus::Closed,
                Ok(n) => {
                    if on_data(&self.scratch[..n]).is_break() {
                        return ReadStatus::Open;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadStatus::Open,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Read error on {:?}: {}", token, e);
                    return ReadStatus::Closed;
                }
            }
        }
    }

    /// Write queued buffers; drops write interest once the queue is empty.
    pub fn flush(&mut self, token: Token) -> io::Result<FlushStatus> {
        let Some(conn) = self.connections.get_mut(&token) else {
            return Ok(FlushStatus::Drained);
        };

        let status = self.shared.outbound.flush(token, &mut conn.stream)?;
        if status == FlushStatus::Drained {
            self.set_interest(token, Interest::READABLE)?;
        }
        Ok(status)
    }

    /// Complete a non-blocking connect. Ok(false) means still in progress.
    pub fn finish_connect(&mut self, token: Token) -> io::Result<bool> {
        let Some(conn) = self.connections.get_mut(&token) else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        if conn.connected {
            return Ok(true);
        }
        if let Some(e) = conn.stream.take_error()? {
            return Err(e);
        }
        match conn.stream.peer_addr() {
            Ok(_) => {
                conn.connected = true;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Deregister and drop a connection along with its outbound queue.
    /// Returns false if it was not open.
    pub fn close(&mut self, token: Token) -> bool {
        let had_queue = self.shared.outbound.remove(token);
        match self.connections.remove(&token) {
            Some(mut conn) => {
                if let Err(e) = self.poll.registry().deregister(&mut conn.stream) {
                    trace!("Deregister {:?} failed: {}", token, e);
                }
                debug!("Closed connection {:?}", token);
                true
            }
            None => had_queue,
        }
    }

    fn set_interest(&mut self, token: Token, interest: Interest) -> io::Result<()> {
        let Some(conn) = self.connections.get_mut(&token) else {
            return Ok(());
        };
        if conn.interest != interest {
            self.poll
                .registry()
                .reregister(&mut conn.stream, token, interest)?;
            conn.interest = interest;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::{TcpListener as StdTcpListener, TcpStream as StdTcpStream};
    use std::time::Instant;

    use super::*;

    /// Accept one real connection and register it with the core.
    fn connected_pair(core: &mut ReactorCore) -> (Token, StdTcpStream) {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let peer = StdTcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();

        let token = core.handle().next_token();
        core.insert(token, TcpStream::from_std(accepted), Interest::READABLE)
            .unwrap();
        (token, peer)
    }

    fn poll_until<F: FnMut(&mut ReactorCore, &Events) -> bool>(core: &mut ReactorCore, mut done: F) {
        let mut events = Events::with_capacity(64);
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            core.poll(&mut events, Some(Duration::from_millis(50))).unwrap();
            if done(core, &events) {
                return;
            }
        }
        panic!("condition not reached before deadline");
    }

    #[test]
    fn test_send_from_other_thread_wakes_and_writes() {
        let mut core = ReactorCore::new(Arc::new(Shutdown::new())).unwrap();
        let (token, mut peer) = connected_pair(&mut core);
        let handle = core.handle();

        std::thread::spawn(move || {
            assert!(handle.send(token, Bytes::from_static(b"first ")));
            assert!(handle.send(token, Bytes::from_static(b"second")));
        })
        .join()
        .unwrap();

        core.apply_pending();
        poll_until(&mut core, |core, events| {
            events
                .iter()
                .filter(|e| e.token() == token && e.is_writable())
                .any(|_| core.flush(token).unwrap() == FlushStatus::Drained)
        });

        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut buf = [0u8; 12];
        std::io::Read::read_exact(&mut peer, &mut buf).unwrap();
        assert_eq!(&buf, b"first second");
    }

    #[test]
    fn test_read_hands_exact_bytes_then_detects_close() {
        let mut core = ReactorCore::new(Arc::new(Shutdown::new())).unwrap();
        let (token, mut peer) = connected_pair(&mut core);

        peer.write_all(b"ping").unwrap();
        let mut received = Vec::new();
        poll_until(&mut core, |core, events| {
            if events.iter().any(|e| e.token() == token) {
                core.read(token, |data| {
                    received.extend_from_slice(data);
                    ControlFlow::Continue(())
                });
            }
            !received.is_empty()
        });
        assert_eq!(received, b"ping");

        drop(peer);
        poll_until(&mut core, |core, events| {
            events.iter().any(|e| e.token() == token)
                && core.read(token, |_| ControlFlow::Continue(())) == ReadStatus::Closed
        });
        assert!(core.close(token));
        assert!(!core.handle().is_open(token));
    }

    #[test]
    fn test_reset_by_peer_reports_closed() {
        let mut core = ReactorCore::new(Arc::new(Shutdown::new())).unwrap();
        let (token, peer) = connected_pair(&mut core);

        // Zero linger turns the close into a reset.
        socket2::SockRef::from(&peer)
            .set_linger(Some(Duration::ZERO))
            .unwrap();
        drop(peer);

        poll_until(&mut core, |core, events| {
            events.iter().any(|e| e.token() == token)
                && core.read(token, |_| ControlFlow::Continue(())) == ReadStatus::Closed
        });
        assert!(core.close(token));
        assert!(!core.contains(token));
        assert!(!core.handle().is_open(token));
    }

    #[test]
    fn test_close_request_is_applied_once() {
        let mut core = ReactorCore::new(Arc::new(Shutdown::new())).unwrap();
        let (token, _peer) = connected_pair(&mut core);
        let handle = core.handle();

        handle.close(token);
        handle.close(token);
        assert_eq!(core.apply_pending(), vec![token]);
        assert!(!core.contains(token));
        assert!(!handle.send(token, Bytes::from_static(b"late")));
        assert_eq!(handle.open_connections(), 0);
    }

    #[test]
    fn test_tokens_are_unique_and_reactor_ids_differ() {
        let a = ReactorCore::new(Arc::new(Shutdown::new())).unwrap();
        let b = ReactorCore::new(Arc::new(Shutdown::new())).unwrap();
        let handle = a.handle();
        let first = handle.next_token();
        let second = handle.next_token();
        assert_ne!(first, second);
        assert_ne!(first, WAKER);
        assert_ne!(a.handle().id(), b.handle().id());
    }

    #[test]
    fn test_shutdown_wakes_poll() {
        let mut core = ReactorCore::new(Arc::new(Shutdown::new())).unwrap();
        let handle = core.handle();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            handle.shutdown();
        });

        let mut events = Events::with_capacity(8);
        core.poll(&mut events, Some(Duration::from_secs(10))).unwrap();
        assert!(events.iter().any(|e| e.token() == WAKER));
        assert!(core.is_shutdown());
    }
}

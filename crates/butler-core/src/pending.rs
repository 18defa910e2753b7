//! Pending-work queue: interest-set changes handed to the reactor thread.
//!
//! Any thread may push; only the reactor thread drains. Every push is
//! followed by a wake of the reactor's poll, since the reactor may be blocked
//! with nothing else ready.

use std::io;
use std::mem;

use mio::net::TcpStream;
use mio::{Interest, Token, Waker};
use parking_lot::Mutex;

/// A change to apply on the reactor thread. Consumed exactly once.
#[derive(Debug)]
pub enum PendingChange {
    /// Bind a new stream to the poll with the given interest.
    /// Used for connections whose connect is still in progress.
    Register {
        token: Token,
        stream: TcpStream,
        interest: Interest,
    },
    /// Replace the interest set of an existing connection.
    Modify { token: Token, interest: Interest },
    /// Close a connection through the reactor's close path.
    Close { token: Token },
}

impl PendingChange {
    pub fn token(&self) -> Token {
        match self {
            PendingChange::Register { token, .. }
            | PendingChange::Modify { token, .. }
            | PendingChange::Close { token } => *token,
        }
    }
}

/// Ordered, thread-safe queue of pending changes plus the reactor's waker.
pub struct PendingQueue {
    changes: Mutex<Vec<PendingChange>>,
    waker: Waker,
}

impl PendingQueue {
    pub fn new(waker: Waker) -> Self {
        Self {
            changes: Mutex::new(Vec::new()),
            waker,
        }
    }

    /// Queue a change and wake the reactor.
    pub fn push(&self, change: PendingChange) -> io::Result<()> {
        self.changes.lock().push(change);
        self.waker.wake()
    }

    /// Wake the reactor without queueing anything.
    pub fn wake(&self) -> io::Result<()> {
        self.waker.wake()
    }

    /// Take every queued change, in push order.
    pub fn drain(&self) -> Vec<PendingChange> {
        mem::take(&mut *self.changes.lock())
    }

    pub fn len(&self) -> usize {
        self.changes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.lock().is_empty()
    }
}

//! Per-connection outbound buffer queues.
//!
//! One map, one lock. Producers on any thread append whole buffers; the
//! reactor thread drains them front-to-back until the transport would block.
//! A partial write leaves the front buffer in place with its cursor advanced,
//! so bytes from different `send` calls never interleave.

use std::collections::VecDeque;
use std::io::{self, Write};

use ahash::AHashMap;
use bytes::{Buf, Bytes};
use mio::Token;
use parking_lot::Mutex;

/// Outcome of a flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    /// Queue is empty; write interest can be dropped.
    Drained,
    /// Transport stopped accepting bytes; more remain queued.
    Pending,
}

#[derive(Default)]
pub struct OutboundQueues {
    queues: Mutex<AHashMap<Token, VecDeque<Bytes>>>,
}

impl OutboundQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the (empty) queue for a new connection.
    pub fn open(&self, token: Token) {
        self.queues.lock().entry(token).or_default();
    }

    /// Append a buffer. Returns false if the connection is unknown, in which
    /// case the buffer is dropped.
    pub fn enqueue(&self, token: Token, data: Bytes) -> bool {
        match self.queues.lock().get_mut(&token) {
            Some(queue) => {
                queue.push_back(data);
                true
            }
            None => false,
        }
    }

    /// Drop the queue of a closed connection along with anything unsent.
    pub fn remove(&self, token: Token) -> bool {
        self.queues.lock().remove(&token).is_some()
    }

    pub fn contains(&self, token: Token) -> bool {
        self.queues.lock().contains_key(&token)
    }

    /// Number of bytes still queued for `token`.
    pub fn queued_bytes(&self, token: Token) -> usize {
        self.queues
            .lock()
            .get(&token)
            .map(|q| q.iter().map(Bytes::len).sum())
            .unwrap_or(0)
    }

    /// Number of connections with a queue.
    pub fn len(&self) -> usize {
        self.queues.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.lock().is_empty()
    }

    /// Write as much of the queue as `writer` accepts. Called by the reactor
    /// thread only; the writer is non-blocking.
    pub fn flush<W: Write>(&self, token: Token, writer: &mut W) -> io::Result<FlushStatus> {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(&token) else {
            return Ok(FlushStatus::Drained);
        };

        while let Some(front) = queue.front_mut() {
            if front.is_empty() {
                queue.pop_front();
                continue;
            }
            match writer.write(front) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                // Short writes keep the cursor; the next write reports
                // WouldBlock once the transport is full.
                Ok(n) => front.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(FlushStatus::Pending);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(FlushStatus::Drained)
    }
}

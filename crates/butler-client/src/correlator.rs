//! Response correlation between a blocked caller and the reactor thread.
//!
//! The reactor owns the [`Correlator`] for a connection; the caller owns the
//! matching [`PendingReply`]. Completing consumes the correlator, so at most
//! one reply is ever delivered. Dropping it without completing (connection
//! closed) wakes the caller with [`ClientError::ConnectionClosed`].

use std::time::Duration;

use ahash::AHashMap;
use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use mio::Token;
use parking_lot::Mutex;

use crate::error::{ClientError, Result};

/// Reactor-side half: hands the reply to the waiting caller.
#[derive(Debug)]
pub struct Correlator {
    tx: Sender<Bytes>,
}

/// Caller-side half: blocks until the reply is delivered.
#[derive(Debug)]
pub struct PendingReply {
    rx: Receiver<Bytes>,
}

/// Create a linked correlator pair.
pub fn correlator() -> (Correlator, PendingReply) {
    let (tx, rx) = bounded(1);
    (Correlator { tx }, PendingReply { rx })
}

impl Correlator {
    /// Deliver the reply. Returns false if the caller already gave up.
    pub fn complete(self, reply: Bytes) -> bool {
        self.tx.try_send(reply).is_ok()
    }
}

impl PendingReply {
    /// Wait up to `timeout` for the reply.
    pub fn wait(&self, timeout: Duration) -> Result<Bytes> {
        match self.rx.recv_timeout(timeout) {
            Ok(reply) => Ok(reply),
            Err(RecvTimeoutError::Timeout) => Err(ClientError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(ClientError::ConnectionClosed),
        }
    }
}

/// Correlators of in-flight requests, keyed by connection token.
#[derive(Default)]
pub(crate) struct CorrelatorMap {
    inner: Mutex<AHashMap<Token, Correlator>>,
}

impl CorrelatorMap {
    pub fn insert(&self, token: Token, correlator: Correlator) {
        self.inner.lock().insert(token, correlator);
    }

    pub fn remove(&self, token: Token) -> Option<Correlator> {
        self.inner.lock().remove(&token)
    }

    /// Drop every correlator; their callers see `ConnectionClosed`.
    pub fn clear(&self) -> usize {
        let drained = std::mem::take(&mut *self.inner.lock());
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_reply_wakes_waiter() {
        let (correlator, pending) = correlator();
        let waiter = thread::spawn(move || pending.wait(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(10));
        assert!(correlator.complete(Bytes::from_static(b"reply")));
        assert_eq!(waiter.join().unwrap().unwrap(), Bytes::from_static(b"reply"));
    }

    #[test]
    fn test_dropped_correlator_reports_closed() {
        let (correlator, pending) = correlator();
        drop(correlator);
        assert!(matches!(
            pending.wait(Duration::from_secs(5)),
            Err(ClientError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_wait_times_out() {
        let (_correlator, pending) = correlator();
        assert!(matches!(
            pending.wait(Duration::from_millis(10)),
            Err(ClientError::Timeout)
        ));
    }

    #[test]
    fn test_complete_after_caller_left() {
        let (correlator, pending) = correlator();
        drop(pending);
        assert!(!correlator.complete(Bytes::from_static(b"late")));
    }

    #[test]
    fn test_map_remove_is_single_shot() {
        let map = CorrelatorMap::default();
        let (correlator, _pending) = correlator();
        map.insert(Token(4), correlator);
        assert_eq!(map.len(), 1);
        assert!(map.remove(Token(4)).is_some());
        assert!(map.remove(Token(4)).is_none());
    }

    #[test]
    fn test_clear_releases_every_waiter() {
        let map = CorrelatorMap::default();
        let (first, first_reply) = correlator();
        let (second, second_reply) = correlator();
        map.insert(Token(1), first);
        map.insert(Token(2), second);

        assert_eq!(map.clear(), 2);
        assert_eq!(map.len(), 0);
        for pending in [first_reply, second_reply] {
            assert!(matches!(
                pending.wait(Duration::from_secs(5)),
                Err(ClientError::ConnectionClosed)
            ));
        }
    }
}

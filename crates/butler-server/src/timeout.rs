//! Idle-connection eviction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use log::{debug, info};
use mio::Token;
use parking_lot::Mutex;

use butler_core::{ReactorHandle, Shutdown};

/// Last-activity timestamps by connection.
///
/// The reactor thread touches entries on accept and on every read; the
/// timeout manager scans them. Each operation holds the lock for its own
/// map access only.
#[derive(Default)]
pub struct IdleRegistry {
    last_seen: Mutex<AHashMap<Token, Instant>>,
}

impl IdleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record activity on `token` now.
    #[inline]
    pub fn touch(&self, token: Token) {
        self.touch_at(token, Instant::now());
    }

    pub fn touch_at(&self, token: Token, at: Instant) {
        self.last_seen.lock().insert(token, at);
    }

    pub fn remove(&self, token: Token) -> bool {
        self.last_seen.lock().remove(&token).is_some()
    }

    pub fn contains(&self, token: Token) -> bool {
        self.last_seen.lock().contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.last_seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.lock().is_empty()
    }

    /// Remove and return every connection idle for longer than `idle`.
    pub fn take_expired(&self, now: Instant, idle: Duration) -> Vec<Token> {
        let mut expired = Vec::new();
        self.last_seen.lock().retain(|token, last| {
            let keep = now.saturating_duration_since(*last) <= idle;
            if !keep {
                expired.push(*token);
            }
            keep
        });
        expired
    }
}

/// Periodically closes idle connections through the reactor's own close path.
pub struct TimeoutManager {
    registry: Arc<IdleRegistry>,
    reactor: ReactorHandle,
    shutdown: Arc<Shutdown>,
    idle_timeout: Duration,
    scan_interval: Duration,
}

impl TimeoutManager {
    pub fn new(
        registry: Arc<IdleRegistry>,
        reactor: ReactorHandle,
        shutdown: Arc<Shutdown>,
        idle_timeout: Duration,
        scan_interval: Duration,
    ) -> Self {
        Self {
            registry,
            reactor,
            shutdown,
            idle_timeout,
            scan_interval,
        }
    }

    /// One scan: queue a close for every expired connection.
    pub fn scan(&self) -> usize {
        let expired = self.registry.take_expired(Instant::now(), self.idle_timeout);
        for &token in &expired {
            debug!("Connection {:?} idle for over {:?}, closing", token, self.idle_timeout);
            self.reactor.close(token);
        }
        expired.len()
    }

    /// Scan until shutdown.
    pub fn run(self) {
        info!(
            "Timeout manager started (idle {:?}, scan every {:?})",
            self.idle_timeout, self.scan_interval
        );
        while !self.shutdown.wait_timeout(self.scan_interval) {
            self.scan();
        }
        debug!("Timeout manager stopped");
    }
}

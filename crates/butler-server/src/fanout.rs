//! Broadcast fanout: bus messages out to every subscribed connection.
//!
//! One dedicated thread pulls messages off the bus subscription. Each
//! message waits [`DELIVERY_DELAY`] once, then goes to a snapshot of the
//! subscriber set: in registration order up to [`FANOUT_CUTOFF`]
//! subscribers, across the rayon pool above it.

use std::sync::Arc;
use std::time::Duration;

use ahash::RandomState;
use bytes::Bytes;
use indexmap::IndexMap;
use log::{debug, info, trace, warn};
use mio::Token;
use parking_lot::RwLock;
use rayon::prelude::*;

use butler_core::{ConnectionSink, Shutdown};

use crate::backend::BusSubscription;

/// Above this many subscribers delivery goes parallel.
pub const FANOUT_CUTOFF: usize = 50;

/// Fixed throttle applied once per broadcast message.
pub const DELIVERY_DELAY: Duration = Duration::from_secs(5);

/// How long one bus poll blocks before the shutdown flag is checked again.
const BUS_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Back-off after a bus error.
const BUS_RETRY_DELAY: Duration = Duration::from_secs(1);

/// A connection that receives broadcasts.
#[derive(Clone)]
pub struct Subscriber {
    pub token: Token,
    pub reactor: Arc<dyn ConnectionSink>,
}

impl Subscriber {
    pub fn new(token: Token, reactor: Arc<dyn ConnectionSink>) -> Self {
        Self { token, reactor }
    }

    #[inline]
    fn send(&self, message: &Bytes) -> bool {
        self.reactor.send(self.token, message.clone())
    }
}

/// Subscribers keyed by (reactor id, token), kept in registration order.
///
/// Writers take the lock only for the insert or removal itself; delivery
/// iterates over a snapshot, so it never holds the lock while sending.
#[derive(Default)]
pub struct SubscriberSet {
    inner: RwLock<IndexMap<(usize, Token), Subscriber, RandomState>>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. A (token, reactor) pair is stored once.
    pub fn add(&self, token: Token, reactor: Arc<dyn ConnectionSink>) {
        let key = (reactor.reactor_id(), token);
        self.inner
            .write()
            .entry(key)
            .or_insert_with(|| Subscriber::new(token, reactor));
    }

    /// Returns true if the connection was subscribed.
    pub fn remove(&self, token: Token, reactor_id: usize) -> bool {
        self.inner
            .write()
            .shift_remove(&(reactor_id, token))
            .is_some()
    }

    pub fn contains(&self, token: Token, reactor_id: usize) -> bool {
        self.inner.read().contains_key(&(reactor_id, token))
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Subscriber> {
        self.inner.read().values().cloned().collect()
    }
}

/// Outcome of one delivery pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutResult {
    /// Subscribers the message was queued for.
    pub delivered: usize,
    /// Subscribers whose connection had already closed.
    pub dropped: usize,
}

/// Queue `message` for every subscriber. All subscribers share one buffer.
pub fn deliver(subscribers: &[Subscriber], message: &Bytes) -> FanoutResult {
    let delivered = if subscribers.len() <= FANOUT_CUTOFF {
        subscribers.iter().filter(|s| s.send(message)).count()
    } else {
        subscribers.par_iter().filter(|s| s.send(message)).count()
    };

    FanoutResult {
        delivered,
        dropped: subscribers.len() - delivered,
    }
}

/// The fanout loop.
pub struct Fanout {
    subscription: Box<dyn BusSubscription>,
    subscribers: Arc<SubscriberSet>,
    shutdown: Arc<Shutdown>,
    delay: Duration,
}

impl Fanout {
    pub fn new(
        subscription: Box<dyn BusSubscription>,
        subscribers: Arc<SubscriberSet>,
        shutdown: Arc<Shutdown>,
    ) -> Self {
        Self {
            subscription,
            subscribers,
            shutdown,
            delay: DELIVERY_DELAY,
        }
    }

    /// Override the per-message delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Run until shutdown.
    pub fn run(mut self) {
        info!("Broadcast fanout started (delay {:?})", self.delay);

        while !self.shutdown.is_triggered() {
            let message = match self.subscription.next_message(BUS_POLL_INTERVAL) {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Bus subscription error: {}", e);
                    if self.shutdown.wait_timeout(BUS_RETRY_DELAY) {
                        break;
                    }
                    continue;
                }
            };

            trace!("Broadcast received ({} bytes)", message.len());
            if self.shutdown.wait_timeout(self.delay) {
                break;
            }

            let subscribers = self.subscribers.snapshot();
            let result = deliver(&subscribers, &Bytes::from(message));
            debug!(
                "Broadcast delivered to {} subscribers ({} gone)",
                result.delivered, result.dropped
            );
        }

        debug!("Broadcast fanout stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    use parking_lot::Mutex;

    use super::*;
    use crate::backend::{local_bus, Publisher};

    /// Records every (token, payload) it is asked to send.
    struct RecordingSink {
        id: usize,
        sent: Mutex<Vec<(Token, Bytes)>>,
        closed: Mutex<Vec<Token>>,
    }

    impl RecordingSink {
        fn new(id: usize) -> Arc<Self> {
            Arc::new(Self {
                id,
                sent: Mutex::new(Vec::new()),
                closed: Mutex::new(Vec::new()),
            })
        }

        fn tokens(&self) -> Vec<Token> {
            self.sent.lock().iter().map(|(t, _)| *t).collect()
        }
    }

    impl ConnectionSink for RecordingSink {
        fn reactor_id(&self) -> usize {
            self.id
        }

        fn send(&self, token: Token, data: Bytes) -> bool {
            if self.closed.lock().contains(&token) {
                return false;
            }
            self.sent.lock().push((token, data));
            true
        }
    }

    fn populate(set: &SubscriberSet, sink: &Arc<RecordingSink>, count: usize) {
        for i in 0..count {
            set.add(Token(i + 1), sink.clone());
        }
    }

    #[test]
    fn test_small_set_delivers_in_registration_order() {
        let sink = RecordingSink::new(1);
        let set = SubscriberSet::new();
        // Register in a non-sorted order.
        for i in [7, 3, 9, 1, 5, 2, 8, 4, 10, 6] {
            set.add(Token(i), sink.clone());
        }

        let result = deliver(&set.snapshot(), &Bytes::from_static(b"hello"));
        assert_eq!(result, FanoutResult { delivered: 10, dropped: 0 });
        let expected: Vec<Token> = [7, 3, 9, 1, 5, 2, 8, 4, 10, 6].map(Token).to_vec();
        assert_eq!(sink.tokens(), expected);
    }

    #[test]
    fn test_removal_keeps_registration_order() {
        let sink = RecordingSink::new(1);
        let set = SubscriberSet::new();
        populate(&set, &sink, 5);
        assert!(set.remove(Token(2), 1));
        set.add(Token(2), sink.clone());
        set.add(Token(4), sink.clone());

        let order: Vec<Token> = set.snapshot().iter().map(|s| s.token).collect();
        assert_eq!(order, [1, 3, 4, 5, 2].map(Token).to_vec());
    }

    #[test]
    fn test_large_set_reaches_everyone() {
        let sink = RecordingSink::new(1);
        let set = SubscriberSet::new();
        populate(&set, &sink, FANOUT_CUTOFF + 1);

        let result = deliver(&set.snapshot(), &Bytes::from_static(b"all"));
        assert_eq!(result.delivered, 51);

        let mut tokens = sink.tokens();
        tokens.sort();
        assert_eq!(tokens, (1..=51).map(Token).collect::<Vec<_>>());
        assert!(sink.sent.lock().iter().all(|(_, data)| data == "all"));
    }

    #[test]
    fn test_closed_subscribers_are_counted_as_dropped() {
        let sink = RecordingSink::new(1);
        let set = SubscriberSet::new();
        populate(&set, &sink, 3);
        sink.closed.lock().push(Token(2));

        let result = deliver(&set.snapshot(), &Bytes::from_static(b"x"));
        assert_eq!(result, FanoutResult { delivered: 2, dropped: 1 });
    }

    #[test]
    fn test_same_token_on_different_reactors() {
        let a = RecordingSink::new(1);
        let b = RecordingSink::new(2);
        let set = SubscriberSet::new();
        set.add(Token(5), a.clone());
        set.add(Token(5), b.clone());
        set.add(Token(5), a.clone());
        assert_eq!(set.len(), 2);

        assert!(set.remove(Token(5), 1));
        assert!(!set.remove(Token(5), 1));
        assert!(set.contains(Token(5), 2));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_mutation_during_delivery() {
        let sink = RecordingSink::new(1);
        let set = Arc::new(SubscriberSet::new());
        populate(&set, &sink, 200);

        let stop = Arc::new(AtomicUsize::new(0));
        let churn = {
            let set = Arc::clone(&set);
            let sink = sink.clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut next = 1000;
                while stop.load(Ordering::Relaxed) == 0 {
                    set.add(Token(next), sink.clone());
                    set.remove(Token(next), 1);
                    next += 1;
                }
            })
        };

        for _ in 0..20 {
            let result = deliver(&set.snapshot(), &Bytes::from_static(b"m"));
            assert!(result.delivered >= 200);
        }
        stop.store(1, Ordering::Relaxed);
        churn.join().unwrap();
        assert_eq!(set.len(), 200);
    }

    #[test]
    fn test_run_applies_delay_then_delivers() {
        let sink = RecordingSink::new(1);
        let set = Arc::new(SubscriberSet::new());
        populate(&set, &sink, 2);

        let (publisher, subscription) = local_bus();
        let shutdown = Arc::new(Shutdown::new());
        let fanout = Fanout::new(Box::new(subscription), set, shutdown.clone())
            .with_delay(Duration::from_millis(150));
        let thread = thread::spawn(move || fanout.run());

        let start = Instant::now();
        publisher.publish("news".to_string());
        while sink.sent.lock().len() < 2 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert_eq!(sink.tokens(), [Token(1), Token(2)]);

        shutdown.trigger();
        thread.join().unwrap();
    }

    #[test]
    fn test_shutdown_interrupts_delay() {
        let (publisher, subscription) = local_bus();
        let shutdown = Arc::new(Shutdown::new());
        let fanout = Fanout::new(
            Box::new(subscription),
            Arc::new(SubscriberSet::new()),
            shutdown.clone(),
        );
        let thread = thread::spawn(move || fanout.run());

        publisher.publish("late".to_string());
        thread::sleep(Duration::from_millis(300));
        let start = Instant::now();
        shutdown.trigger();
        thread.join().unwrap();
        assert!(start.elapsed() < DELIVERY_DELAY);
    }
}

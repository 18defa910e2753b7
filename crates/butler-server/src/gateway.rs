//! Gateway assembly: server reactor, workers, timeout manager and fanout.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};
use log::{error, info};
use mio::net::TcpListener;

use butler_core::{ReactorCore, ReactorHandle, Shutdown};

use crate::backend::{Backends, BusSubscription};
use crate::config::{Config, TimeoutConfig};
use crate::dispatch::{CommandTable, Dispatcher};
use crate::fanout::{Fanout, SubscriberSet, DELIVERY_DELAY};
use crate::server::Server;
use crate::timeout::{IdleRegistry, TimeoutManager};
use crate::worker::{spawn_workers, WorkerMsg};

/// A bound, not yet running gateway.
pub struct Gateway {
    server: Server,
    local_addr: SocketAddr,
    handle: ReactorHandle,
    shutdown: Arc<Shutdown>,
    jobs: Receiver<WorkerMsg>,
    dispatcher: Arc<Dispatcher>,
    subscription: Box<dyn BusSubscription>,
    subscribers: Arc<SubscriberSet>,
    idle: Arc<IdleRegistry>,
    workers: usize,
    timeout: TimeoutConfig,
    fanout_delay: Duration,
}

impl Gateway {
    /// Bind the listener and wire the backends in. Nothing runs until
    /// [`Gateway::run`] or [`Gateway::spawn`].
    pub fn bind(config: &Config, backends: Backends) -> io::Result<Self> {
        let shutdown = Arc::new(Shutdown::new());
        let core = ReactorCore::new(Arc::clone(&shutdown))?;
        let handle = core.handle();

        let listener = TcpListener::bind(config.server.bind)?;
        let local_addr = listener.local_addr()?;

        let (tx, rx) = unbounded();
        let idle = Arc::new(IdleRegistry::new());
        let subscribers = Arc::new(SubscriberSet::new());
        let server = Server::new(
            core,
            listener,
            tx,
            Arc::clone(&idle),
            Arc::clone(&subscribers),
        )?;

        let Backends {
            store,
            publisher,
            subscription,
        } = backends;
        let dispatcher = Arc::new(Dispatcher::new(CommandTable::new(store, publisher)));

        info!("butler listening on {}", local_addr);

        Ok(Self {
            server,
            local_addr,
            handle,
            shutdown,
            jobs: rx,
            dispatcher,
            subscription,
            subscribers,
            idle,
            workers: config.server.worker_count(),
            timeout: config.timeout.clone(),
            fanout_delay: DELIVERY_DELAY,
        })
    }

    /// Override the fanout's per-message delay.
    pub fn with_fanout_delay(mut self, delay: Duration) -> Self {
        self.fanout_delay = delay;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle to the server reactor; `shutdown()` on it stops the gateway.
    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    pub fn subscribers(&self) -> Arc<SubscriberSet> {
        Arc::clone(&self.subscribers)
    }

    pub fn idle_registry(&self) -> Arc<IdleRegistry> {
        Arc::clone(&self.idle)
    }

    /// Run on the current thread until shutdown.
    pub fn run(self) -> io::Result<()> {
        let Gateway {
            server,
            handle,
            shutdown,
            jobs,
            dispatcher,
            subscription,
            subscribers,
            idle,
            workers,
            timeout,
            fanout_delay,
            ..
        } = self;

        let mut threads = match spawn_workers(
            workers,
            jobs,
            dispatcher,
            handle.clone(),
            Arc::clone(&shutdown),
        ) {
            Ok(threads) => threads,
            Err(e) => {
                handle.shutdown();
                return Err(e);
            }
        };
        info!("Spawned {} worker threads", workers);

        let manager = TimeoutManager::new(
            idle,
            handle.clone(),
            Arc::clone(&shutdown),
            timeout.idle_timeout(),
            timeout.scan_interval(),
        );
        let fanout = Fanout::new(subscription, subscribers, Arc::clone(&shutdown))
            .with_delay(fanout_delay);

        let spawned = thread::Builder::new()
            .name("butler-timeout".to_string())
            .spawn(move || manager.run())
            .and_then(|t| {
                threads.push(t);
                thread::Builder::new()
                    .name("butler-fanout".to_string())
                    .spawn(move || fanout.run())
            });
        let result = match spawned {
            Ok(t) => {
                threads.push(t);
                server.run()
            }
            Err(e) => Err(e),
        };

        handle.shutdown();
        for t in threads {
            if t.join().is_err() {
                error!("A gateway thread panicked");
            }
        }
        info!("butler stopped");
        result
    }

    /// Run on a background thread.
    pub fn spawn(self) -> io::Result<RunningGateway> {
        let local_addr = self.local_addr;
        let handle = self.handle();
        let subscribers = self.subscribers();
        let idle = self.idle_registry();

        let thread = thread::Builder::new()
            .name("butler-reactor".to_string())
            .spawn(move || self.run())?;

        Ok(RunningGateway {
            local_addr,
            handle,
            subscribers,
            idle,
            thread: Some(thread),
        })
    }
}

/// A gateway running on its own thread. Stops when dropped.
pub struct RunningGateway {
    local_addr: SocketAddr,
    handle: ReactorHandle,
    subscribers: Arc<SubscriberSet>,
    idle: Arc<IdleRegistry>,
    thread: Option<JoinHandle<io::Result<()>>>,
}

impl RunningGateway {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> &ReactorHandle {
        &self.handle
    }

    pub fn subscribers(&self) -> &SubscriberSet {
        &self.subscribers
    }

    pub fn idle_registry(&self) -> &IdleRegistry {
        &self.idle
    }

    /// Stop every gateway thread and wait for them.
    pub fn shutdown(&mut self) -> io::Result<()> {
        self.handle.shutdown();
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| io::Error::other("gateway thread panicked"))?,
            None => Ok(()),
        }
    }
}

impl Drop for RunningGateway {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

//! Request workers.
//!
//! The reactor thread never runs handlers: each inbound read is copied into
//! a [`WorkerMsg`] and picked up here. Data-store calls block a worker, not
//! the reactor. Replies go back through [`ReactorHandle::send`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, trace};
use mio::Token;

use butler_core::{ReactorHandle, Shutdown};

use crate::dispatch::Dispatcher;

/// How long a worker waits for a job before re-checking for shutdown.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Messages sent to workers.
pub enum WorkerMsg {
    /// One inbound read from `token`, copied out of the scratch buffer.
    Request { token: Token, data: Bytes },
}

/// One request-handling thread.
pub struct Worker {
    pub id: usize,
    rx: Receiver<WorkerMsg>,
    dispatcher: Arc<Dispatcher>,
    reactor: ReactorHandle,
    shutdown: Arc<Shutdown>,
}

impl Worker {
    pub fn new(
        id: usize,
        rx: Receiver<WorkerMsg>,
        dispatcher: Arc<Dispatcher>,
        reactor: ReactorHandle,
        shutdown: Arc<Shutdown>,
    ) -> Self {
        Self {
            id,
            rx,
            dispatcher,
            reactor,
            shutdown,
        }
    }

    /// Handle one message.
    pub fn handle(&self, msg: WorkerMsg) {
        match msg {
            WorkerMsg::Request { token, data } => {
                let reply = self.dispatcher.dispatch(&data);
                if reply.is_empty() {
                    trace!("Worker {}: empty reply for {:?}", self.id, token);
                    return;
                }
                if !self.reactor.send(token, reply) {
                    debug!("Worker {}: {:?} closed before reply", self.id, token);
                }
            }
        }
    }

    /// Process messages until shutdown or until every sender is gone.
    pub fn run(self) {
        while !self.shutdown.is_triggered() {
            match self.rx.recv_timeout(IDLE_WAIT) {
                Ok(msg) => self.handle(msg),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("Worker {} stopped", self.id);
    }
}

/// Spawn `count` workers sharing one job queue.
pub fn spawn_workers(
    count: usize,
    rx: Receiver<WorkerMsg>,
    dispatcher: Arc<Dispatcher>,
    reactor: ReactorHandle,
    shutdown: Arc<Shutdown>,
) -> std::io::Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(count);
    for id in 0..count {
        let worker = Worker::new(
            id,
            rx.clone(),
            Arc::clone(&dispatcher),
            reactor.clone(),
            Arc::clone(&shutdown),
        );
        let handle = thread::Builder::new()
            .name(format!("worker-{}", id))
            .spawn(move || worker.run())?;
        handles.push(handle);
    }
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::unbounded;

    use butler_core::ReactorCore;

    use super::*;
    use crate::backend::{local_bus, MemoryStore};
    use crate::dispatch::CommandTable;

    fn dispatcher() -> Arc<Dispatcher> {
        let (publisher, _subscription) = local_bus();
        Arc::new(Dispatcher::new(CommandTable::new(
            Arc::new(MemoryStore::new()),
            Arc::new(publisher),
        )))
    }

    #[test]
    fn test_reply_to_closed_connection_is_dropped() {
        let shutdown = Arc::new(Shutdown::new());
        let core = ReactorCore::new(Arc::clone(&shutdown)).unwrap();
        let (_tx, rx) = unbounded();
        let worker = Worker::new(0, rx, dispatcher(), core.handle(), shutdown);

        worker.handle(WorkerMsg::Request {
            token: Token(42),
            data: Bytes::from_static(b"{\"command\":\"BOGUS\"}"),
        });
        assert_eq!(core.handle().open_connections(), 0);
    }

    #[test]
    fn test_workers_exit_when_queue_closes() {
        let shutdown = Arc::new(Shutdown::new());
        let core = ReactorCore::new(Arc::clone(&shutdown)).unwrap();
        let (tx, rx) = unbounded();

        let handles = spawn_workers(3, rx, dispatcher(), core.handle(), shutdown).unwrap();
        assert_eq!(handles.len(), 3);
        drop(tx);
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_workers_exit_on_shutdown() {
        let shutdown = Arc::new(Shutdown::new());
        let core = ReactorCore::new(Arc::clone(&shutdown)).unwrap();
        let (_tx, rx) = unbounded();

        let handles =
            spawn_workers(2, rx, dispatcher(), core.handle(), Arc::clone(&shutdown)).unwrap();
        shutdown.trigger();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}

//! In-process backends.

use std::io;
use std::time::Duration;

use ahash::AHashMap;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, trace};
use parking_lot::Mutex;

use butler_core::payload::{decode, encode};
use butler_core::{Command, User, UserRequest};

use super::{BusSubscription, Publisher, RequestReply};

/// User table keyed by login. Speaks the same request format as the TCP
/// data store and replies with the user or `null`.
#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<AHashMap<String, User>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.lock().is_empty()
    }

    fn lookup(&self, request: UserRequest) -> Option<User> {
        let command = Command::from_name(request.command.as_deref().unwrap_or_default());
        let user = request.user?;

        let mut users = self.users.lock();
        match command {
            Command::NewUser => {
                if user.login.is_empty() || users.contains_key(&user.login) {
                    return None;
                }
                users.insert(user.login.clone(), user.clone());
                Some(user)
            }
            Command::GetUserByLogin => users.get(&user.login).cloned(),
            Command::GetUserByLoginPassword => users
                .get(&user.login)
                .filter(|stored| stored.password == user.password)
                .cloned(),
            Command::Message | Command::NoCommand => None,
        }
    }
}

impl RequestReply for MemoryStore {
    fn request(&self, request: &str) -> String {
        let request: UserRequest = match decode(request) {
            Ok(request) => request,
            Err(e) => {
                debug!("Store rejected request: {}", e);
                return String::new();
            }
        };

        // `None` encodes as `null`, the data store's "no row" reply.
        encode(&self.lookup(request)).unwrap_or_default()
    }
}

/// Create a connected in-process bus.
pub fn local_bus() -> (LocalPublisher, LocalSubscription) {
    let (tx, rx) = unbounded();
    (LocalPublisher { tx }, LocalSubscription { rx })
}

/// Publishing half of the in-process bus.
#[derive(Clone)]
pub struct LocalPublisher {
    tx: Sender<String>,
}

impl Publisher for LocalPublisher {
    fn publish(&self, message: String) {
        if self.tx.send(message).is_err() {
            trace!("Local bus has no subscriber, message dropped");
        }
    }
}

/// Subscribing half of the in-process bus.
pub struct LocalSubscription {
    rx: Receiver<String>,
}

impl BusSubscription for LocalSubscription {
    fn next_message(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "local bus publisher dropped",
            )),
        }
    }
}

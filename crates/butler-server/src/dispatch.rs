//! Command dispatch: inbound payload to reply payload.
//!
//! The command table is built once and shared read-only by every worker.

use std::sync::Arc;

use ahash::AHashMap;
use log::{debug, warn};

use butler_core::payload::{decode, encode};
use butler_core::{Command, Inbound, Result, User};

use crate::backend::{Publisher, RequestReply};

/// A command handler: serialized request in, serialized reply out.
pub type Handler = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Immutable command name to handler mapping.
pub struct CommandTable {
    handlers: AHashMap<Command, Handler>,
}

impl CommandTable {
    /// Route the data-store commands to `store` and `MESSAGE` to `publisher`.
    pub fn new(store: Arc<dyn RequestReply>, publisher: Arc<dyn Publisher>) -> Self {
        let mut handlers: AHashMap<Command, Handler> = AHashMap::new();

        for command in Command::ROUTED {
            let handler: Handler = if command.is_data_store() {
                let store = Arc::clone(&store);
                Box::new(move |request: &str| data_store_call(store.as_ref(), request))
            } else {
                let publisher = Arc::clone(&publisher);
                Box::new(move |request: &str| {
                    publisher.publish(request.to_string());
                    // The real answer arrives later through the fanout.
                    Ok(request.to_string())
                })
            };
            handlers.insert(command, handler);
        }

        Self { handlers }
    }

    pub fn get(&self, command: Command) -> Option<&Handler> {
        self.handlers.get(&command)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

fn data_store_call(store: &dyn RequestReply, request: &str) -> Result<String> {
    let reply = store.request(request);
    let user: Option<User> = if reply.is_empty() {
        None
    } else {
        decode(&reply)?
    };
    encode(&user.unwrap_or_default())
}

/// Resolve the command and the canonical request text for `text`.
///
/// A payload carrying a user object and a command is a data-store request;
/// otherwise the chat schema is tried.
fn resolve(text: &str) -> Result<(Command, String)> {
    match Inbound::parse(text) {
        Some(inbound) => Ok((Command::from_name(inbound.command()), inbound.encode()?)),
        None => Ok((Command::NoCommand, Command::NoCommand.to_string())),
    }
}

/// Maps raw inbound payloads to reply payloads.
pub struct Dispatcher {
    table: CommandTable,
}

impl Dispatcher {
    pub fn new(table: CommandTable) -> Self {
        Self { table }
    }

    /// Produce the reply for one inbound payload. Never fails: unknown input
    /// yields `NO_COMMAND` and handler failures yield an empty reply.
    pub fn dispatch(&self, payload: &[u8]) -> String {
        let Ok(text) = std::str::from_utf8(payload) else {
            debug!("Non UTF-8 payload ({} bytes)", payload.len());
            return Command::NoCommand.to_string();
        };

        let (command, request) = match resolve(text.trim()) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("Failed to re-encode request: {}", e);
                return String::new();
            }
        };

        let Some(handler) = self.table.get(command) else {
            return Command::NoCommand.to_string();
        };

        match handler(&request) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("{} handler failed: {}", command, e);
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use butler_core::{ChatMessage, UserRequest};

    use super::*;
    use crate::backend::MemoryStore;

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<String>>,
    }

    impl Publisher for RecordingPublisher {
        fn publish(&self, message: String) {
            self.published.lock().push(message);
        }
    }

    struct FixedReply(&'static str);

    impl RequestReply for FixedReply {
        fn request(&self, _request: &str) -> String {
            self.0.to_string()
        }
    }

    fn dispatcher_with(store: Arc<dyn RequestReply>) -> (Dispatcher, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::default());
        let table = CommandTable::new(store, publisher.clone());
        (Dispatcher::new(table), publisher)
    }

    fn request(command: Command, login: &str, password: &str) -> Vec<u8> {
        encode(&UserRequest::new(command, User::new(login, password)))
            .unwrap()
            .into_bytes()
    }

    #[test]
    fn test_table_routes_every_command() {
        let (dispatcher, _) = dispatcher_with(Arc::new(MemoryStore::new()));
        assert_eq!(dispatcher.table.len(), 4);
        assert!(dispatcher.table.get(Command::NoCommand).is_none());
    }

    #[test]
    fn test_unknown_command() {
        let (dispatcher, publisher) = dispatcher_with(Arc::new(MemoryStore::new()));
        assert_eq!(dispatcher.dispatch(br#"{"command":"DROP_TABLES"}"#), "NO_COMMAND");
        assert_eq!(dispatcher.dispatch(b"plain text"), "NO_COMMAND");
        assert_eq!(dispatcher.dispatch(br#"{"user":{"login":"a"}}"#), "NO_COMMAND");
        assert_eq!(dispatcher.dispatch(&[0xff, 0xfe, 0x00]), "NO_COMMAND");
        assert!(publisher.published.lock().is_empty());
    }

    #[test]
    fn test_new_user_then_lookup_matches() {
        let (dispatcher, _) = dispatcher_with(Arc::new(MemoryStore::new()));

        let created: User =
            decode(&dispatcher.dispatch(&request(Command::NewUser, "ann", "pw"))).unwrap();
        assert_eq!(created, User::new("ann", "pw"));

        let found: User = decode(
            &dispatcher.dispatch(&request(Command::GetUserByLoginPassword, "ann", "pw")),
        )
        .unwrap();
        assert_eq!(found, created);

        let by_login: User =
            decode(&dispatcher.dispatch(&request(Command::GetUserByLogin, "ann", ""))).unwrap();
        assert_eq!(by_login.login, "ann");
    }

    #[test]
    fn test_new_user_with_extra_field_is_stored() {
        let (dispatcher, _) = dispatcher_with(Arc::new(MemoryStore::new()));
        let payload = br#"{"command":"NEW_USER","user":{"login":"ann","password":"pw"},"id":7}"#;

        let created: User = decode(&dispatcher.dispatch(payload)).unwrap();
        assert_eq!(created, User::new("ann", "pw"));

        let found: User = decode(
            &dispatcher.dispatch(&request(Command::GetUserByLoginPassword, "ann", "pw")),
        )
        .unwrap();
        assert_eq!(found, User::new("ann", "pw"));
    }

    #[test]
    fn test_missing_row_is_empty_user() {
        let (dispatcher, _) = dispatcher_with(Arc::new(MemoryStore::new()));
        let reply = dispatcher.dispatch(&request(Command::GetUserByLogin, "nobody", ""));
        assert_eq!(decode::<User>(&reply).unwrap(), User::default());
    }

    #[test]
    fn test_unreachable_store_is_empty_user() {
        let (dispatcher, _) = dispatcher_with(Arc::new(FixedReply("")));
        let reply = dispatcher.dispatch(&request(Command::GetUserByLogin, "ann", ""));
        assert!(decode::<User>(&reply).unwrap().is_empty());
    }

    #[test]
    fn test_garbled_store_reply_degrades_to_empty() {
        let (dispatcher, _) = dispatcher_with(Arc::new(FixedReply("{not json")));
        assert_eq!(dispatcher.dispatch(&request(Command::NewUser, "ann", "pw")), "");
    }

    #[test]
    fn test_message_publishes_and_echoes() {
        let (dispatcher, publisher) = dispatcher_with(Arc::new(MemoryStore::new()));
        let message = encode(&ChatMessage::new("ann", "hello all")).unwrap();

        let reply = dispatcher.dispatch(message.as_bytes());
        let echoed: ChatMessage = decode(&reply).unwrap();
        assert_eq!(echoed, ChatMessage::new("ann", "hello all"));
        assert_eq!(publisher.published.lock().as_slice(), [reply]);
    }

    #[test]
    fn test_trailing_newline_is_tolerated() {
        let (dispatcher, publisher) = dispatcher_with(Arc::new(MemoryStore::new()));
        let mut payload = encode(&ChatMessage::new("bo", "hey")).unwrap().into_bytes();
        payload.extend_from_slice(b"\r\n");

        assert_ne!(dispatcher.dispatch(&payload), "NO_COMMAND");
        assert_eq!(publisher.published.lock().len(), 1);
    }
}

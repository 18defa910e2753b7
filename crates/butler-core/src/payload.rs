//! Application payloads carried between clients, the gateway and backends.
//!
//! Payloads are JSON text. Two request schemas exist: [`UserRequest`] for the
//! data store and [`ChatMessage`] for the broadcast bus. Both ignore unknown
//! fields; [`Inbound::parse`] picks the schema by which fields are present.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::Command;
use crate::error::Result;

/// Data-store entity. An empty user (both fields blank) stands for "no row".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub login: String,
    pub password: String,
}

impl User {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }

    /// True for the placeholder returned when no row matched.
    pub fn is_empty(&self) -> bool {
        self.login.is_empty() && self.password.is_empty()
    }
}

/// Request addressed to the data store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

impl UserRequest {
    pub fn new(command: Command, user: User) -> Self {
        Self {
            command: Some(command.as_str().to_string()),
            user: Some(user),
        }
    }
}

/// Chat message published to the broadcast bus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn new(username: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            command: Some(Command::Message.as_str().to_string()),
            username: Some(username.into()),
            content: Some(content.into()),
        }
    }
}

/// An inbound client payload that declares a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    User(UserRequest),
    Chat(ChatMessage),
}

impl Inbound {
    /// Classify `text`. A JSON object with a `user` key and a command is a
    /// user request; otherwise it is a chat message if it declares a command.
    /// Returns `None` when no command can be found.
    pub fn parse(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        if !value.is_object() {
            return None;
        }

        if value.get("user").is_some() {
            if let Ok(request) = serde_json::from_value::<UserRequest>(value.clone()) {
                if request.command.is_some() {
                    return Some(Inbound::User(request));
                }
            }
        }

        serde_json::from_value::<ChatMessage>(value)
            .ok()
            .filter(|message| message.command.is_some())
            .map(Inbound::Chat)
    }

    /// The declared command name.
    pub fn command(&self) -> &str {
        let name = match self {
            Inbound::User(request) => request.command.as_deref(),
            Inbound::Chat(message) => message.command.as_deref(),
        };
        name.unwrap_or_default()
    }

    /// Canonical JSON of the matched schema.
    pub fn encode(&self) -> Result<String> {
        match self {
            Inbound::User(request) => encode(request),
            Inbound::Chat(message) => encode(message),
        }
    }
}

/// Serialize a payload to JSON text.
pub fn encode<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Deserialize a payload from JSON text.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_is_not_a_user_request() {
        let text = r#"{"command":"MESSAGE","username":"ann","content":"hi"}"#;
        let Some(Inbound::Chat(chat)) = Inbound::parse(text) else {
            panic!("expected a chat message");
        };
        assert_eq!(chat.username.as_deref(), Some("ann"));
        assert_eq!(chat.content.as_deref(), Some("hi"));
    }

    #[test]
    fn test_user_request_keeps_user_despite_extra_fields() {
        let text = r#"{"command":"NEW_USER","user":{"login":"ann","password":"pw"},"id":7}"#;
        let inbound = Inbound::parse(text).unwrap();
        assert_eq!(inbound.command(), "NEW_USER");
        assert_eq!(
            inbound,
            Inbound::User(UserRequest::new(Command::NewUser, User::new("ann", "pw")))
        );
        assert_eq!(
            inbound.encode().unwrap(),
            r#"{"command":"NEW_USER","user":{"login":"ann","password":"pw"}}"#
        );
    }

    #[test]
    fn test_inbound_without_command() {
        assert_eq!(Inbound::parse(r#"{"user":{"login":"a"}}"#), None);
        assert_eq!(Inbound::parse(r#"{"content":"hi"}"#), None);
        assert_eq!(Inbound::parse("[1,2]"), None);
        assert_eq!(Inbound::parse("not json"), None);
    }

    #[test]
    fn test_malformed_user_falls_back_to_chat() {
        let inbound = Inbound::parse(r#"{"command":"MESSAGE","user":"ann"}"#).unwrap();
        assert!(matches!(inbound, Inbound::Chat(_)));
        assert_eq!(inbound.command(), "MESSAGE");
    }

    #[test]
    fn test_user_request_without_command() {
        let request: UserRequest = decode(r#"{"user":{"login":"a","password":"b"}}"#).unwrap();
        assert!(request.command.is_none());
        assert_eq!(request.user, Some(User::new("a", "b")));
    }

    #[test]
    fn test_encode_skips_missing_fields() {
        let request = UserRequest {
            command: Some("NEW_USER".to_string()),
            user: None,
        };
        assert_eq!(encode(&request).unwrap(), r#"{"command":"NEW_USER"}"#);
    }

    #[test]
    fn test_null_decodes_as_no_user() {
        let user: Option<User> = decode("null").unwrap();
        assert!(user.is_none());
        assert!(User::default().is_empty());
    }
}

//! Application command names.
//!
//! The wire names are stable strings; anything that does not match one of
//! them resolves to [`Command::NoCommand`].

use std::fmt;

/// A command understood by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Look up a user by login and password (data store).
    GetUserByLoginPassword,
    /// Look up a user by login only (data store).
    GetUserByLogin,
    /// Create a user (data store).
    NewUser,
    /// Chat message for the broadcast bus.
    Message,
    /// Sentinel for unmatched input.
    NoCommand,
}

impl Command {
    /// All commands that map to a handler.
    pub const ROUTED: [Command; 4] = [
        Command::GetUserByLoginPassword,
        Command::GetUserByLogin,
        Command::NewUser,
        Command::Message,
    ];

    /// The stable wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Command::GetUserByLoginPassword => "GET_USER_BY_LOGIN_PASSWORD",
            Command::GetUserByLogin => "GET_USER_BY_LOGIN",
            Command::NewUser => "NEW_USER",
            Command::Message => "MESSAGE",
            Command::NoCommand => "NO_COMMAND",
        }
    }

    /// Resolve a wire name. Unknown names resolve to `NoCommand`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "GET_USER_BY_LOGIN_PASSWORD" => Command::GetUserByLoginPassword,
            "GET_USER_BY_LOGIN" => Command::GetUserByLogin,
            "NEW_USER" => Command::NewUser,
            "MESSAGE" => Command::Message,
            _ => Command::NoCommand,
        }
    }

    /// Whether this command is answered by the data store.
    #[inline]
    pub fn is_data_store(self) -> bool {
        matches!(
            self,
            Command::GetUserByLoginPassword | Command::GetUserByLogin | Command::NewUser
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//! butler-client - Blocking request client for the butler gateway.
//!
//! Requests are issued from any thread and carried by one mio reactor thread.
//! Each request opens a fresh connection, writes the payload, waits for one
//! reply and closes the connection.
//!
//! # Example
//!
//! ```ignore
//! use butler_client::{Client, ClientConfig};
//!
//! let client = Client::start(ClientConfig::new("127.0.0.1:9000".parse()?))?;
//! let reply = client.request_str(r#"{"command":"GET_USER_BY_LOGIN","user":{"login":"ann"}}"#)?;
//! ```

mod client;
mod config;
mod correlator;
mod error;
mod reactor;

pub use client::Client;
pub use config::ClientConfig;
pub use correlator::{correlator, Correlator, PendingReply};
pub use error::{ClientError, Result};

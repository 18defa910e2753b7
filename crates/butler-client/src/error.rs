//! Client error types.

use std::io;

use thiserror::Error;

/// Client error type.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed before a reply arrived")]
    ConnectionClosed,

    #[error("Timed out waiting for a reply")]
    Timeout,

    #[error("Client is shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, ClientError>;

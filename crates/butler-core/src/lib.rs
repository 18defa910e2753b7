//! butler-core - Reactor machinery and payload types shared by the gateway
//! server and its client.
//!
//! Both reactor variants (listening server, connecting client) are built from
//! the same pieces:
//! - [`PendingQueue`]: interest-set changes queued by any thread, applied by
//!   the reactor thread once per loop iteration
//! - [`OutboundQueues`]: per-connection FIFO of outbound buffers
//! - [`ReactorCore`]: the `mio::Poll`, the scratch read buffer and the
//!   connection table, touched only by the reactor thread
//! - [`ReactorHandle`]: the thread-safe side (`send`, `connect`, `close`,
//!   `shutdown`)

pub mod command;
pub mod error;
pub mod outbound;
pub mod payload;
pub mod pending;
pub mod reactor;
pub mod shutdown;

pub use command::Command;
pub use error::{Error, Result};
pub use outbound::{FlushStatus, OutboundQueues};
pub use payload::{ChatMessage, Inbound, User, UserRequest};
pub use pending::{PendingChange, PendingQueue};
pub use reactor::{ConnectionSink, ReactorCore, ReactorHandle, ReadStatus, SCRATCH_SIZE, WAKER};
pub use shutdown::Shutdown;

pub use mio::{Interest, Token};

//! butler-server - Multiplexed TCP gateway.
//!
//! One reactor thread carries every client connection. Reads are handed to
//! a worker pool that dispatches commands to the data store or the broadcast
//! bus; broadcasts come back through the fanout thread and go out to every
//! connected client. A timeout manager evicts idle connections.

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod fanout;
pub mod gateway;
pub mod server;
pub mod timeout;
pub mod worker;

pub use backend::{Backends, BusSubscription, Publisher, RequestReply};
pub use config::{Config, ConfigError};
pub use dispatch::{CommandTable, Dispatcher};
pub use fanout::{SubscriberSet, DELIVERY_DELAY, FANOUT_CUTOFF};
pub use gateway::{Gateway, RunningGateway};
pub use timeout::{IdleRegistry, TimeoutManager};

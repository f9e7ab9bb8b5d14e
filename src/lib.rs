//! A single-threaded, non-blocking connection pool for a fleet of
//! memcached-style cache servers.
//!
//! [`pool::ConnectionPool`] owns one long-lived TCP connection per
//! configured server, multiplexed from one dedicated I/O thread via
//! [`pool::ConnectionPool::handle_io`]. Producer threads submit work
//! through the cloneable [`pool::PoolHandle`] returned alongside it.
//! Operations are opaque to the pool beyond the [`operation::Operation`]
//! contract: the pool shuttles bytes between a socket and whatever
//! encoder/decoder the caller supplies.

pub mod buffer;
pub mod config;
pub mod error;
pub mod node;
pub mod operation;
pub mod pool;
pub mod reconnect;

pub use config::{Config, ConfigError};
pub use error::{PoolError, ProtocolError};
pub use node::{NodeHandle, NodeStats};
pub use operation::{OpState, Operation};
pub use pool::{ConnectionPool, PoolHandle};

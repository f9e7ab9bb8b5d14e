//! Error taxonomy for the connection pool.
//!
//! I/O failures and protocol errors are connection-local and are absorbed by
//! the event loop (see `pool::ConnectionPool::handle_io`); they never surface
//! here. What does surface is the small set of conditions that are
//! programmer- or caller-visible: using the pool after `shutdown()`, and the
//! selector's own I/O errors (as opposed to a single connection's).

use std::fmt;

/// Errors returned by the public pool API.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// `handle_io()` was called after `shutdown()`.
    #[error("connection pool has been shut down")]
    ShutDown,

    /// The selector (poll instance) itself failed; distinct from a
    /// per-connection I/O error, which is handled internally by queuing a
    /// reconnect rather than propagating.
    #[error("selector I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The outcome of feeding bytes to an [`crate::operation::Operation`], as
/// distinguished from a transport-level I/O error. A protocol error is
/// attributable to the operation/decoder; an I/O error is attributable to
/// the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError(pub String);

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol error: {}", self.0)
    }
}

impl std::error::Error for ProtocolError {}

//! Connection error types.

use replup_transport::TransportError;

/// Errors produced by the connection engine.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("cannot open {port}: {reason}")]
    Port { port: String, reason: String },

    #[error("{port} is already open")]
    AlreadyOpen { port: String },

    #[error("not connected")]
    NotConnected,

    #[error("send timed out after {written} of {total} bytes")]
    SendTimeout { written: usize, total: usize },

    #[error("line exceeded {capacity} bytes without a terminator, discarded")]
    Overflow { capacity: usize },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

//! Duplex byte transports.
//!
//! A [`Transport`] opens into independent read and write halves so one
//! thread can block on reads while another writes. Reads are always bounded
//! by a timeout and report `Ok(0)` when it elapses.

pub mod mock;
pub mod serial;

use std::time::Duration;

pub use mock::MockTransport;
pub use serial::SerialTransport;

/// Errors produced by a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("cannot open {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

/// A channel that can be opened into a reader and a writer.
pub trait Transport: Send {
    /// Human-readable endpoint name, e.g. `/dev/ttyUSB0`.
    fn name(&self) -> &str;

    /// Opens the channel. Each call returns a fresh pair of halves.
    fn open(&mut self) -> Result<(Box<dyn TransportRead>, Box<dyn TransportWrite>), TransportError>;
}

/// Receiving half.
pub trait TransportRead: Send {
    /// Reads into `buf`, waiting at most `timeout`. `Ok(0)` means nothing
    /// arrived in time.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;
}

/// Sending half.
pub trait TransportWrite: Send {
    /// Writes some prefix of `data` and returns its length. May return
    /// `Ok(0)` when the channel cannot accept bytes right now.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Discards any buffered input and output.
    fn discard_buffers(&mut self) -> Result<(), TransportError>;

    /// Closes the channel. The paired reader returns promptly afterwards.
    fn close(&mut self) -> Result<(), TransportError>;
}

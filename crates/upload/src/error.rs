//! Upload error types.

use replup_connection::ConnectionError;

use crate::types::Phase;

/// Errors produced while uploading.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot scan {path}: {reason}")]
    Scan { path: String, reason: String },

    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("connection lost")]
    ConnectionLost,

    #[error("no reply from board during {phase}")]
    ProtocolTimeout { phase: Phase },

    #[error("board raised {message}")]
    Device { message: String },

    #[error("transfer of {path} failed: {reason}")]
    Transfer { path: String, reason: String },
}

impl UploadError {
    /// True if no further file can succeed in this session.
    pub fn is_session_fatal(&self) -> bool {
        match self {
            Self::ConnectionLost => true,
            Self::ProtocolTimeout { phase } => *phase == Phase::EnterRawMode,
            Self::Connection(err) => !matches!(err, ConnectionError::SendTimeout { .. }),
            _ => false,
        }
    }

    /// True for failures worth repeating the same chunk for.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProtocolTimeout { .. }
                | Self::Connection(ConnectionError::SendTimeout { .. })
        )
    }
}

//! Error types for protocol encoding and framing.

use std::io;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while framing or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A frame declared a payload larger than the configured maximum.
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Declared payload length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The peer closed the stream in the middle of a frame.
    #[error("stream ended inside a frame")]
    Truncated,

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Returns true if the error was caused by a timeout on the stream.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(e)
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
        )
    }
}

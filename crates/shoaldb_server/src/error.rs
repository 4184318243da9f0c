//! Error types for the TCP server.

use shoaldb_core::CoreError;
use shoaldb_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the TCP server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Opening or driving the database failed.
    #[error("database error: {0}")]
    Database(#[from] CoreError),

    /// A frame could not be read or written.
    #[error("framing error: {0}")]
    Frame(#[from] ProtocolError),

    /// A blocking worker failed.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if the peer simply went away.
    pub fn is_disconnect(&self) -> bool {
        let io = match self {
            ServerError::Io(e) => e,
            ServerError::Frame(ProtocolError::Io(e)) => e,
            ServerError::Frame(ProtocolError::Truncated) => return true,
            _ => return false,
        };
        matches!(
            io.kind(),
            std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn disconnect_classification() {
        let eof = ServerError::Io(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(eof.is_disconnect());
        assert!(ServerError::Frame(ProtocolError::Truncated).is_disconnect());
        assert!(!ServerError::Internal("oops".into()).is_disconnect());
    }

    #[test]
    fn error_display() {
        let err = ServerError::Frame(ProtocolError::FrameTooLarge { len: 10, max: 5 });
        let msg = err.to_string();
        assert!(msg.contains("10"));
        assert!(msg.contains("5"));
    }
}

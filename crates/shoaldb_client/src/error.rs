//! Error types for remote connections.

use shoaldb_protocol::ProtocolError;
use std::io;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Transport-level failures.
///
/// Application errors never show up here: they arrive inside the response
/// envelope and leave the connection usable.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The host name did not resolve to any address.
    #[error("cannot resolve {0}")]
    Resolve(String),

    /// Every connect attempt failed.
    #[error("cannot connect to {addr} after {attempts} attempt(s): {source}")]
    Connect {
        /// Target address.
        addr: String,
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        #[source]
        source: io::Error,
    },

    /// A read or write timed out.
    #[error("request timed out")]
    Timeout,

    /// A frame could not be exchanged.
    #[error("framing error: {0}")]
    Frame(#[from] ProtocolError),

    /// The server closed the connection.
    #[error("server closed the connection")]
    Disconnected,

    /// An earlier failure left the connection unusable.
    #[error("connection is broken")]
    Broken,

    /// The connection was closed by the caller.
    #[error("connection is closed")]
    Closed,

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ClientError {
    /// Classifies a framing failure, folding timeouts into [`ClientError::Timeout`].
    pub(crate) fn from_frame(err: ProtocolError) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Frame(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_classified() {
        let err = ProtocolError::Io(io::Error::new(io::ErrorKind::WouldBlock, "slow"));
        assert!(matches!(ClientError::from_frame(err), ClientError::Timeout));
        assert!(matches!(
            ClientError::from_frame(ProtocolError::Truncated),
            ClientError::Frame(ProtocolError::Truncated)
        ));
    }

    #[test]
    fn error_display() {
        assert_eq!(ClientError::Broken.to_string(), "connection is broken");
        let err = ClientError::Connect {
            addr: "127.0.0.1:1".into(),
            attempts: 3,
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert!(err.to_string().contains("3 attempt"));
    }
}

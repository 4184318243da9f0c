//! Error types for ShoalDB core.

use shoaldb_protocol::{ErrorKind, RequestError};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in ShoalDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Caller-supplied JSON could not be parsed.
    #[error("parse error: {message}")]
    Parse {
        /// Description of the problem.
        message: String,
    },

    /// Arguments were well-formed but not acceptable.
    #[error("{message}")]
    Validation {
        /// Description of the problem.
        message: String,
    },

    /// A collection, index, bucket or object does not exist.
    #[error("{what} not found: {name}")]
    NotFound {
        /// Kind of object that was looked up.
        what: &'static str,
        /// Name that was looked up.
        name: String,
    },

    /// Transaction conflict detected.
    #[error("transaction conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// Uniqueness or identity constraint violated.
    #[error("constraint violation: {message}")]
    Constraint {
        /// Description of the violation.
        message: String,
    },

    /// Database is already open or locked.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// Invalid database format or version.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Key material was rejected.
    #[error("authentication failed: {message}")]
    Auth {
        /// Description of the failure.
        message: String,
    },

    /// Invalid key size.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// Encryption failed.
    #[error("encryption failed: {message}")]
    EncryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Decryption failed.
    #[error("decryption failed: {message}")]
    DecryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Request decoding failed before reaching the engine.
    #[error("{0}")]
    Request(#[from] RequestError),

    /// Unexpected engine failure.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            name: name.into(),
        }
    }

    /// Creates a transaction conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a constraint violation error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Creates an invalid key size error.
    pub fn invalid_key_size(actual: usize, expected: usize) -> Self {
        Self::InvalidKeySize { expected, actual }
    }

    /// Creates an encryption failed error.
    pub fn encryption_failed(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }

    /// Creates a decryption failed error.
    pub fn decryption_failed(message: impl Into<String>) -> Self {
        Self::DecryptionFailed {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the envelope kind reported for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Io(_) | CoreError::DatabaseLocked => ErrorKind::Io,
            CoreError::Parse { .. } => ErrorKind::Parse,
            CoreError::Validation { .. } => ErrorKind::Validation,
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::Conflict { .. } => ErrorKind::Conflict,
            CoreError::Constraint { .. } => ErrorKind::Constraint,
            CoreError::Auth { .. }
            | CoreError::InvalidKeySize { .. }
            | CoreError::DecryptionFailed { .. } => ErrorKind::Auth,
            CoreError::Request(e) => e.kind,
            CoreError::InvalidFormat { .. }
            | CoreError::EncryptionFailed { .. }
            | CoreError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns the message reported inside an envelope.
    pub fn envelope_message(&self) -> String {
        match self {
            CoreError::Request(e) => e.message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::invalid_format(format!("corrupt record: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_cover_closed_set() {
        assert_eq!(CoreError::parse("x").kind(), ErrorKind::Parse);
        assert_eq!(CoreError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(CoreError::not_found("index", "a").kind(), ErrorKind::NotFound);
        assert_eq!(CoreError::conflict("x").kind(), ErrorKind::Conflict);
        assert_eq!(CoreError::constraint("x").kind(), ErrorKind::Constraint);
        assert_eq!(CoreError::DatabaseLocked.kind(), ErrorKind::Io);
        assert_eq!(CoreError::invalid_key_size(31, 32).kind(), ErrorKind::Auth);
        assert_eq!(CoreError::internal("x").kind(), ErrorKind::Internal);
        let unsupported = RequestError::new(ErrorKind::Unsupported, "unknown verb: x");
        assert_eq!(CoreError::from(unsupported).kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn messages() {
        assert_eq!(
            CoreError::not_found("collection", "users").to_string(),
            "collection not found: users"
        );
        assert_eq!(
            CoreError::invalid_key_size(31, 32).to_string(),
            "invalid key size: expected 32 bytes, got 31"
        );
        let request = RequestError::validation("missing 'op' field");
        assert_eq!(
            CoreError::from(request).envelope_message(),
            "missing 'op' field"
        );
    }
}

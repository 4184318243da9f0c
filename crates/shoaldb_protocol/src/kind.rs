//! The closed set of application error kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Category of an application-level failure reported inside an envelope.
///
/// The set is closed: clients may match on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request (or a JSON fragment inside it) could not be parsed.
    Parse,
    /// The request was well-formed JSON but had the wrong shape.
    Validation,
    /// A named object does not exist.
    NotFound,
    /// A transaction lost an optimistic concurrency check, or the
    /// transaction state does not allow the verb.
    Conflict,
    /// A uniqueness or identity constraint was violated.
    Constraint,
    /// Storage failure inside the engine.
    Io,
    /// Key material or login credentials were rejected, or the session
    /// has not logged in.
    Auth,
    /// The verb is not part of the catalog understood by the peer.
    Unsupported,
    /// Unexpected engine failure.
    Internal,
    /// The response could not be understood by the client.
    Protocol,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [ErrorKind; 10] = [
        ErrorKind::Parse,
        ErrorKind::Validation,
        ErrorKind::NotFound,
        ErrorKind::Conflict,
        ErrorKind::Constraint,
        ErrorKind::Io,
        ErrorKind::Auth,
        ErrorKind::Unsupported,
        ErrorKind::Internal,
        ErrorKind::Protocol,
    ];

    /// Returns the wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Parse => "parse",
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Constraint => "constraint",
            ErrorKind::Io => "io",
            ErrorKind::Auth => "auth",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Internal => "internal",
            ErrorKind::Protocol => "protocol",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown error kind: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_serde() {
        for kind in ErrorKind::ALL {
            let encoded = serde_json::to_string(&kind).unwrap();
            assert_eq!(encoded, format!("\"{}\"", kind.as_str()));
            assert_eq!(kind.as_str().parse::<ErrorKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_rejected() {
        assert!("teapot".parse::<ErrorKind>().is_err());
    }
}

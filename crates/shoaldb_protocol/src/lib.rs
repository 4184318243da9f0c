//! # ShoalDB Protocol
//!
//! The command vocabulary shared by the embedded handle and the remote
//! connection.
//!
//! This crate provides:
//! - `Verb`, the closed catalog of supported operations
//! - `Request`, the typed form of a `{"op": ..}` command object
//! - `CommandBuilder`, which assembles request text without re-encoding
//!   caller-supplied JSON fragments
//! - Response envelopes (`{"ok": true, ..}` / `{"ok": false, "error": ..}`)
//!   and the closed `ErrorKind` set
//! - Length-prefixed framing for the TCP transport
//!
//! This is a pure protocol crate with no network I/O of its own.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod envelope;
mod error;
pub mod frame;
mod kind;
mod request;
mod verb;

pub use codec::CommandBuilder;
pub use envelope::{
    error_envelope, error_response, normalize_response, ok_envelope, ErrorBody, ParsedEnvelope,
};
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{
    check_len, decode_header, encode_frame, read_frame, write_frame, DEFAULT_MAX_FRAME_SIZE,
    FRAME_HEADER_LEN,
};
pub use kind::ErrorKind;
pub use request::{FindOptions, Request, RequestError, SortKey};
pub use verb::Verb;

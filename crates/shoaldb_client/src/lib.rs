//! # ShoalDB Client
//!
//! Blocking TCP client for a ShoalDB server.
//!
//! This crate provides:
//! - `Connection`, one typed method per verb, each returning the response
//!   envelope text
//! - Connect retries with backoff, and connect/read/write timeouts
//! - The `Ready → InTx → Ready` transaction state, with `Broken` as the
//!   terminal state after any transport failure
//! - `InterruptHandle`, which aborts an in-flight call from another thread
//!
//! Response text is normalized: anything that is not a well-formed envelope
//! is replaced by a `protocol` error envelope, so callers only ever see
//! `{"ok": ..}` objects.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connection;
mod error;
mod state;

pub use config::ClientConfig;
pub use connection::{Connection, InterruptHandle};
pub use error::{ClientError, ClientResult};
pub use state::ConnectionState;

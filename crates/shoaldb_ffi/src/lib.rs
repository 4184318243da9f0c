//! # ShoalDB FFI
//!
//! Stable C ABI for ShoalDB. The declarations live in `include/shoaldb.h`.
//!
//! This crate provides:
//! - Remote entry points: `shoaldb_connect`, one function per verb,
//!   `shoaldb_disconnect`
//! - Embedded entry points: `shoaldb_open`, `shoaldb_open_encrypted`,
//!   `shoaldb_execute`, `shoaldb_close`
//! - A single release function for every returned string,
//!   `shoaldb_free_string`
//!
//! ## Conventions
//!
//! Handles are opaque registry tokens. Destroyed handles are never reissued,
//! so using one afterwards fails cleanly instead of touching freed memory.
//!
//! Functions returning `char*` hand back a heap-owned JSON envelope that the
//! caller releases exactly once. Null means a boundary failure (unknown or
//! broken handle, transport failure); `shoaldb_last_error` describes it.
//! Application errors are reported inside the envelope.

#![warn(missing_docs)]

mod embedded;
mod error;
mod registry;
mod remote;
mod strings;

pub use embedded::*;
pub use error::{shoaldb_clear_error, shoaldb_last_error};
pub use remote::*;
pub use strings::{shoaldb_free_string, shoaldb_live_strings};

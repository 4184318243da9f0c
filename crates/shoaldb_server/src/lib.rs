//! # ShoalDB Server
//!
//! TCP front-end for a ShoalDB database.
//!
//! Each connection speaks length-prefixed JSON frames: a 4-byte big-endian
//! length followed by one command. The server answers every request frame
//! with exactly one response frame, in order. A connection owns one
//! [`Session`](shoaldb_core::Session), so transactions are scoped to the
//! connection and rolled back when it closes.
//!
//! ```rust,ignore
//! use shoaldb_core::{Config, Database};
//! use shoaldb_server::{Server, ServerConfig};
//! use std::sync::Arc;
//!
//! let db = Arc::new(Database::open("data", Config::default())?);
//! let server = Server::bind(ServerConfig::default(), db).await?;
//! server.run().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod frame;
mod handler;
mod server;

pub use config::{ServerConfig, DEFAULT_PORT};
pub use error::{ServerError, ServerResult};
pub use handler::ConnectionHandler;
pub use server::{Server, ServerHandle};

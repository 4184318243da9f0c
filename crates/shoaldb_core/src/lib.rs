//! # ShoalDB Core
//!
//! Embedded document database engine for ShoalDB.
//!
//! This crate provides:
//! - Collections of JSON documents with integer `_id`s
//! - Query, update and aggregation evaluation
//! - Single, unique, composite and full-text indexes
//! - Blob buckets with ranked search over textual objects
//! - Optimistic transactions
//! - Snapshot plus journal persistence, optionally sealed with AES-256-GCM
//! - [`Session`], which executes one JSON command and answers with one
//!   JSON envelope
//! - Password logins for sessions that serve remote callers
//!
//! ```rust,no_run
//! use shoaldb_core::{Config, Database, Session};
//! use std::sync::Arc;
//!
//! let db = Arc::new(Database::open("data", Config::default())?);
//! let mut session = Session::new(db);
//! let response = session.execute(r#"{"op":"insert","collection":"users","doc":{"name":"Ada"}}"#);
//! assert_eq!(response, r#"{"id":1,"ok":true}"#);
//! # Ok::<(), shoaldb_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregate;
mod auth;
mod blob;
mod collection;
mod config;
mod crypto;
mod database;
mod dir;
pub mod document;
mod error;
pub mod index;
mod manifest;
mod persist;
pub mod query;
mod session;
mod transaction;
pub mod update;
pub mod value;

pub use auth::Credentials;
pub use blob::{BlobHit, ObjectMeta, DEFAULT_CONTENT_TYPE};
pub use collection::{Collection, StoredDoc};
pub use config::Config;
pub use crypto::{EncryptionKey, KEY_SIZE};
pub use database::{CompactStats, Database, DeleteResult, UpdateResult};
pub use error::{CoreError, CoreResult};
pub use index::{IndexKind, IndexSpec};
pub use manifest::FORMAT_VERSION;
pub use persist::{CollectionSnapshot, JournalOp};
pub use session::Session;
pub use transaction::{Transaction, TransactionId};

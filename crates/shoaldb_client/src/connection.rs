//! Blocking TCP connection.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::state::ConnectionState;
use shoaldb_protocol::{
    check_len, error_response, normalize_response, read_frame, write_frame, CommandBuilder,
    ErrorKind, ProtocolError, Verb,
};
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;

/// A connection to a ShoalDB server.
///
/// Requests are strictly paired with responses: each call writes one frame
/// and blocks until the matching frame arrives. Every call that succeeds
/// returns the response envelope text; application errors are reported in
/// the envelope and leave the connection usable. Transport failures move
/// the connection to [`ConnectionState::Broken`] for good.
///
/// ```no_run
/// use shoaldb_client::{ClientConfig, Connection};
///
/// let mut conn = Connection::connect("127.0.0.1", 5433, ClientConfig::default())?;
/// assert_eq!(conn.ping()?, r#"{"ok":true,"pong":true}"#);
/// # Ok::<(), shoaldb_client::ClientError>(())
/// ```
#[derive(Debug)]
pub struct Connection {
    stream: Arc<TcpStream>,
    peer: SocketAddr,
    config: ClientConfig,
    state: ConnectionState,
}

/// Aborts a connection from another thread.
///
/// Shutting the socket down makes any in-flight call on the connection fail
/// promptly, which breaks the connection.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    stream: Arc<TcpStream>,
}

impl InterruptHandle {
    /// Shuts the socket down in both directions.
    pub fn interrupt(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            // Already closed by the peer; nothing left to abort.
            tracing::debug!(error = %e, "socket shutdown failed");
        }
    }
}

impl Connection {
    /// Connects to `host:port`, retrying per the configuration.
    pub fn connect(host: &str, port: u16, config: ClientConfig) -> ClientResult<Self> {
        let target = format!("{host}:{port}");
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|_| ClientError::Resolve(target.clone()))?
            .collect();
        if addrs.is_empty() {
            return Err(ClientError::Resolve(target));
        }

        let attempts = config.connect_attempts.max(1);
        let mut last_err = io::Error::from(io::ErrorKind::NotConnected);
        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = config.backoff_for(attempt);
                tracing::debug!(addr = %target, attempt, ?delay, "retrying connect");
                thread::sleep(delay);
            }
            for addr in &addrs {
                match TcpStream::connect_timeout(addr, config.connect_timeout) {
                    Ok(stream) => return Self::from_stream(stream, *addr, config),
                    Err(e) => last_err = e,
                }
            }
        }

        Err(ClientError::Connect {
            addr: target,
            attempts,
            source: last_err,
        })
    }

    fn from_stream(stream: TcpStream, peer: SocketAddr, config: ClientConfig) -> ClientResult<Self> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(non_zero(config.read_timeout))?;
        stream.set_write_timeout(non_zero(config.write_timeout))?;
        tracing::debug!(%peer, "connected");
        Ok(Self {
            stream: Arc::new(stream),
            peer,
            config,
            state: ConnectionState::Ready,
        })
    }

    /// Address of the server.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns a handle that can abort this connection from another thread.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            stream: Arc::clone(&self.stream),
        }
    }

    /// Sends raw request text and returns the response envelope.
    ///
    /// The request is not inspected beyond its `op`, which drives the
    /// transaction state.
    pub fn execute(&mut self, request: &str) -> ClientResult<String> {
        let verb = serde_json::from_str::<serde_json::Value>(request)
            .ok()
            .and_then(|value| value.get("op")?.as_str().and_then(Verb::from_name));
        self.roundtrip(verb, request)
    }

    /// Closes the connection. Any open transaction is rolled back by the server.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        let _ = self.stream.shutdown(Shutdown::Both);
        self.state = ConnectionState::Closed;
        tracing::debug!(peer = %self.peer, "connection closed");
    }

    fn send(&mut self, builder: CommandBuilder, verb: Verb) -> ClientResult<String> {
        self.roundtrip(Some(verb), &builder.finish())
    }

    fn roundtrip(&mut self, verb: Option<Verb>, request: &str) -> ClientResult<String> {
        match self.state {
            ConnectionState::Broken => return Err(ClientError::Broken),
            ConnectionState::Closed => return Err(ClientError::Closed),
            ConnectionState::Ready | ConnectionState::InTx => {}
        }

        let max = self.config.max_frame_size;
        if let Err(ProtocolError::FrameTooLarge { len, max }) = check_len(request.len(), max) {
            return Ok(error_response(
                ErrorKind::Validation,
                format!("request of {len} bytes exceeds the {max} byte limit"),
            ));
        }

        match self.exchange(request.as_bytes(), max) {
            Ok(payload) => {
                let response = normalize_response(&payload);
                if let Some(verb) = verb {
                    self.state = self.state.after(verb, &response);
                }
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "connection broken");
                self.state = ConnectionState::Broken;
                Err(e)
            }
        }
    }

    fn exchange(&self, request: &[u8], max: usize) -> ClientResult<Vec<u8>> {
        let mut stream = &*self.stream;
        write_frame(&mut stream, request, max).map_err(ClientError::from_frame)?;
        read_frame(&mut stream, max)
            .map_err(ClientError::from_frame)?
            .ok_or(ClientError::Disconnected)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn non_zero(timeout: std::time::Duration) -> Option<std::time::Duration> {
    (!timeout.is_zero()).then_some(timeout)
}

/// One method per verb. Document, query, update and pipeline arguments are
/// JSON text spliced into the request as given.
impl Connection {
    /// Health check.
    pub fn ping(&mut self) -> ClientResult<String> {
        self.send(CommandBuilder::new(Verb::Ping), Verb::Ping)
    }

    /// Logs the server session in. A rejected login comes back as an `auth`
    /// error envelope and leaves the connection usable.
    pub fn auth(&mut self, user: &str, password: &str) -> ClientResult<String> {
        let cmd = CommandBuilder::new(Verb::Auth)
            .str_field("user", user)
            .str_field("password", password);
        self.send(cmd, Verb::Auth)
    }

    /// Inserts one document.
    pub fn insert(&mut self, collection: &str, doc_json: &str) -> ClientResult<String> {
        let cmd = CommandBuilder::new(Verb::Insert)
            .str_field("collection", collection)
            .raw_field("doc", doc_json);
        self.send(cmd, Verb::Insert)
    }

    /// Inserts a JSON array of documents.
    pub fn insert_many(&mut self, collection: &str, docs_json: &str) -> ClientResult<String> {
        let cmd = CommandBuilder::new(Verb::InsertMany)
            .str_field("collection", collection)
            .raw_field("docs", docs_json);
        self.send(cmd, Verb::InsertMany)
    }

    /// Finds all matching documents.
    pub fn find(&mut self, collection: &str, query_json: &str) -> ClientResult<String> {
        self.collection_query(Verb::Find, collection, query_json)
    }

    /// Finds the first matching document.
    pub fn find_one(&mut self, collection: &str, query_json: &str) -> ClientResult<String> {
        self.collection_query(Verb::FindOne, collection, query_json)
    }

    /// Updates all matching documents.
    pub fn update(
        &mut self,
        collection: &str,
        query_json: &str,
        update_json: &str,
    ) -> ClientResult<String> {
        self.collection_update(Verb::Update, collection, query_json, update_json)
    }

    /// Updates the first matching document.
    pub fn update_one(
        &mut self,
        collection: &str,
        query_json: &str,
        update_json: &str,
    ) -> ClientResult<String> {
        self.collection_update(Verb::UpdateOne, collection, query_json, update_json)
    }

    /// Deletes all matching documents.
    pub fn delete(&mut self, collection: &str, query_json: &str) -> ClientResult<String> {
        self.collection_query(Verb::Delete, collection, query_json)
    }

    /// Deletes the first matching document.
    pub fn delete_one(&mut self, collection: &str, query_json: &str) -> ClientResult<String> {
        self.collection_query(Verb::DeleteOne, collection, query_json)
    }

    /// Counts the documents of a collection.
    pub fn count(&mut self, collection: &str) -> ClientResult<String> {
        self.collection_only(Verb::Count, collection)
    }

    /// Creates a collection.
    pub fn create_collection(&mut self, collection: &str) -> ClientResult<String> {
        self.collection_only(Verb::CreateCollection, collection)
    }

    /// Lists collection names.
    pub fn list_collections(&mut self) -> ClientResult<String> {
        self.send(CommandBuilder::new(Verb::ListCollections), Verb::ListCollections)
    }

    /// Drops a collection.
    pub fn drop_collection(&mut self, collection: &str) -> ClientResult<String> {
        self.collection_only(Verb::DropCollection, collection)
    }

    /// Compacts a collection.
    pub fn compact(&mut self, collection: &str) -> ClientResult<String> {
        self.collection_only(Verb::Compact, collection)
    }

    /// Runs an aggregation pipeline (a JSON array of stages).
    pub fn aggregate(&mut self, collection: &str, pipeline_json: &str) -> ClientResult<String> {
        let cmd = CommandBuilder::new(Verb::Aggregate)
            .str_field("collection", collection)
            .raw_field("pipeline", pipeline_json);
        self.send(cmd, Verb::Aggregate)
    }

    /// Creates a single-field index.
    pub fn create_index(&mut self, collection: &str, field: &str) -> ClientResult<String> {
        let cmd = CommandBuilder::new(Verb::CreateIndex)
            .str_field("collection", collection)
            .str_field("field", field);
        self.send(cmd, Verb::CreateIndex)
    }

    /// Creates a single-field unique index.
    pub fn create_unique_index(&mut self, collection: &str, field: &str) -> ClientResult<String> {
        let cmd = CommandBuilder::new(Verb::CreateUniqueIndex)
            .str_field("collection", collection)
            .str_field("field", field);
        self.send(cmd, Verb::CreateUniqueIndex)
    }

    /// Creates a composite index over a JSON array of field names.
    pub fn create_composite_index(
        &mut self,
        collection: &str,
        fields_json: &str,
    ) -> ClientResult<String> {
        let cmd = CommandBuilder::new(Verb::CreateCompositeIndex)
            .str_field("collection", collection)
            .raw_field("fields", fields_json);
        self.send(cmd, Verb::CreateCompositeIndex)
    }

    /// Creates a text index over a JSON array of field names.
    pub fn create_text_index(&mut self, collection: &str, fields_json: &str) -> ClientResult<String> {
        let cmd = CommandBuilder::new(Verb::CreateTextIndex)
            .str_field("collection", collection)
            .raw_field("fields", fields_json);
        self.send(cmd, Verb::CreateTextIndex)
    }

    /// Lists the indexes of a collection.
    pub fn list_indexes(&mut self, collection: &str) -> ClientResult<String> {
        self.collection_only(Verb::ListIndexes, collection)
    }

    /// Drops an index by name.
    pub fn drop_index(&mut self, collection: &str, index: &str) -> ClientResult<String> {
        let cmd = CommandBuilder::new(Verb::DropIndex)
            .str_field("collection", collection)
            .str_field("index", index);
        self.send(cmd, Verb::DropIndex)
    }

    /// Ranked text search within a collection.
    pub fn text_search(&mut self, collection: &str, query: &str, limit: i64) -> ClientResult<String> {
        let cmd = CommandBuilder::new(Verb::TextSearch)
            .str_field("collection", collection)
            .str_field("query", query)
            .int_field("limit", limit);
        self.send(cmd, Verb::TextSearch)
    }

    /// Ranked search over blob objects, optionally within one bucket.
    pub fn search(&mut self, query: &str, bucket: Option<&str>, limit: i64) -> ClientResult<String> {
        let cmd = CommandBuilder::new(Verb::Search)
            .str_field("query", query)
            .opt_str_field("bucket", bucket)
            .int_field("limit", limit);
        self.send(cmd, Verb::Search)
    }

    /// Creates a bucket.
    pub fn create_bucket(&mut self, bucket: &str) -> ClientResult<String> {
        self.bucket_only(Verb::CreateBucket, bucket)
    }

    /// Lists buckets.
    pub fn list_buckets(&mut self) -> ClientResult<String> {
        self.send(CommandBuilder::new(Verb::ListBuckets), Verb::ListBuckets)
    }

    /// Deletes a bucket and its objects.
    pub fn delete_bucket(&mut self, bucket: &str) -> ClientResult<String> {
        self.bucket_only(Verb::DeleteBucket, bucket)
    }

    /// Stores an object. `data_b64` is standard padded base64; `metadata_json`
    /// is an object of string values.
    pub fn put_object(
        &mut self,
        bucket: &str,
        key: &str,
        data_b64: &str,
        content_type: Option<&str>,
        metadata_json: Option<&str>,
    ) -> ClientResult<String> {
        let mut cmd = CommandBuilder::new(Verb::PutObject)
            .str_field("bucket", bucket)
            .str_field("key", key)
            .str_field("data", data_b64)
            .opt_str_field("content_type", content_type);
        if let Some(metadata) = metadata_json {
            cmd = cmd.raw_field("metadata", metadata);
        }
        self.send(cmd, Verb::PutObject)
    }

    /// Fetches an object with its payload.
    pub fn get_object(&mut self, bucket: &str, key: &str) -> ClientResult<String> {
        self.object(Verb::GetObject, bucket, key)
    }

    /// Fetches object metadata.
    pub fn head_object(&mut self, bucket: &str, key: &str) -> ClientResult<String> {
        self.object(Verb::HeadObject, bucket, key)
    }

    /// Deletes an object.
    pub fn delete_object(&mut self, bucket: &str, key: &str) -> ClientResult<String> {
        self.object(Verb::DeleteObject, bucket, key)
    }

    /// Lists objects by key, optionally restricted to a prefix.
    pub fn list_objects(
        &mut self,
        bucket: &str,
        prefix: Option<&str>,
        limit: i64,
    ) -> ClientResult<String> {
        let cmd = CommandBuilder::new(Verb::ListObjects)
            .str_field("bucket", bucket)
            .opt_str_field("prefix", prefix)
            .int_field("limit", limit);
        self.send(cmd, Verb::ListObjects)
    }

    /// Opens a transaction on this connection.
    pub fn begin_tx(&mut self) -> ClientResult<String> {
        self.send(CommandBuilder::new(Verb::BeginTx), Verb::BeginTx)
    }

    /// Commits the open transaction.
    pub fn commit_tx(&mut self) -> ClientResult<String> {
        self.send(CommandBuilder::new(Verb::CommitTx), Verb::CommitTx)
    }

    /// Discards the open transaction.
    pub fn rollback_tx(&mut self) -> ClientResult<String> {
        self.send(CommandBuilder::new(Verb::RollbackTx), Verb::RollbackTx)
    }

    fn collection_only(&mut self, verb: Verb, collection: &str) -> ClientResult<String> {
        let cmd = CommandBuilder::new(verb).str_field("collection", collection);
        self.send(cmd, verb)
    }

    fn collection_query(
        &mut self,
        verb: Verb,
        collection: &str,
        query_json: &str,
    ) -> ClientResult<String> {
        let cmd = CommandBuilder::new(verb)
            .str_field("collection", collection)
            .raw_field("query", query_json);
        self.send(cmd, verb)
    }

    fn collection_update(
        &mut self,
        verb: Verb,
        collection: &str,
        query_json: &str,
        update_json: &str,
    ) -> ClientResult<String> {
        let cmd = CommandBuilder::new(verb)
            .str_field("collection", collection)
            .raw_field("query", query_json)
            .raw_field("update", update_json);
        self.send(cmd, verb)
    }

    fn bucket_only(&mut self, verb: Verb, bucket: &str) -> ClientResult<String> {
        let cmd = CommandBuilder::new(verb).str_field("bucket", bucket);
        self.send(cmd, verb)
    }

    fn object(&mut self, verb: Verb, bucket: &str, key: &str) -> ClientResult<String> {
        let cmd = CommandBuilder::new(verb)
            .str_field("bucket", bucket)
            .str_field("key", key);
        self.send(cmd, verb)
    }
}

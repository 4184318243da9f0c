//! Command dispatch.
//!
//! A [`Session`] executes JSON commands against a [`Database`] and answers
//! each with a JSON envelope. It owns the caller's transaction context: after
//! `begin_tx` the document verbs are buffered in the transaction until
//! `commit_tx` or `rollback_tx`. Collection, index and blob verbs always take
//! effect immediately.
//!
//! A session built [`with_credentials`](Session::with_credentials) refuses
//! every verb except `ping` and `auth` until an `auth` succeeds. A session
//! without credentials accepts any login.

use crate::auth::Credentials;
use crate::blob::ObjectMeta;
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::index::{IndexKind, IndexSpec};
use crate::transaction::{Transaction, TransactionId};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};
use shoaldb_protocol::{error_envelope, ok_envelope, FindOptions, Request};
use std::sync::Arc;

/// One caller's view of a database.
pub struct Session {
    db: Arc<Database>,
    tx: Option<Transaction>,
    credentials: Option<Arc<Credentials>>,
    user: Option<String>,
}

impl Session {
    /// Creates a session with no active transaction.
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            tx: None,
            credentials: None,
            user: None,
        }
    }

    /// Requires a login against `credentials` before any other verb.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Arc<Credentials>) -> Self {
        self.credentials = Some(credentials);
        self.user = None;
        self
    }

    /// Returns the logged-in user, if any.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Returns true if the session may run every verb.
    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_none() || self.user.is_some()
    }

    /// Returns the database.
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Returns the active transaction id, if any.
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.tx.as_ref().map(Transaction::id)
    }

    /// Executes one command and returns its envelope text.
    ///
    /// Never fails: every outcome, including unparseable input, is reported
    /// inside the envelope.
    pub fn execute(&mut self, command: &str) -> String {
        self.execute_value(command).to_string()
    }

    /// Executes one command and returns its envelope.
    pub fn execute_value(&mut self, command: &str) -> Value {
        let result = Request::parse(command)
            .map_err(CoreError::from)
            .and_then(|request| self.execute_request(request));
        match result {
            Ok(payload) => ok_envelope(payload),
            Err(e) => error_envelope(e.kind(), e.envelope_message()),
        }
    }

    /// Executes a decoded request and returns its payload.
    pub fn execute_request(&mut self, request: Request) -> CoreResult<Value> {
        if request.verb().requires_auth() && !self.is_authenticated() {
            return Err(CoreError::auth("login required"));
        }
        let db = Arc::clone(&self.db);
        match request {
            Request::Ping => Ok(json!({ "pong": true })),
            Request::Auth { user, password } => self.login(user, &password),

            Request::BeginTx => {
                if let Some(tx) = &self.tx {
                    return Err(CoreError::validation(format!(
                        "transaction {} is already active",
                        tx.id()
                    )));
                }
                let tx = db.begin();
                let id = tx.id();
                self.tx = Some(tx);
                Ok(json!({ "tx_id": id }))
            }
            Request::CommitTx => {
                let tx = self
                    .tx
                    .take()
                    .ok_or_else(|| CoreError::validation("no active transaction"))?;
                let committed = tx.commit(&db)?;
                Ok(json!({ "committed": committed }))
            }
            Request::RollbackTx => {
                let rolled_back = match self.tx.take() {
                    Some(tx) => {
                        tx.rollback();
                        true
                    }
                    None => false,
                };
                Ok(json!({ "rolled_back": rolled_back }))
            }

            Request::Insert { collection, doc } => {
                let id = match self.tx.as_mut() {
                    Some(tx) => tx.insert(&db, &collection, doc)?,
                    None => db.insert(&collection, doc)?,
                };
                Ok(json!({ "id": id }))
            }
            Request::InsertMany { collection, docs } => {
                let Value::Array(docs) = docs else {
                    return Err(CoreError::validation("'docs' must be an array"));
                };
                let results = match self.tx.as_mut() {
                    Some(tx) => {
                        db.check_batch(docs.len())?;
                        docs.into_iter()
                            .map(|doc| tx.insert(&db, &collection, doc))
                            .collect()
                    }
                    None => db.insert_many(&collection, docs)?,
                };
                Ok(insert_many_payload(results))
            }
            Request::Find {
                collection,
                query,
                sort,
                skip,
                limit,
            } => {
                let (filter, options) = FindOptions::resolve(&query, sort.as_ref(), skip, limit)?;
                let docs = match &self.tx {
                    Some(tx) => tx.find(&db, &collection, &filter, &options)?,
                    None => db.find(&collection, &filter, &options)?,
                };
                Ok(json!({ "docs": docs }))
            }
            Request::FindOne { collection, query } => {
                let (filter, mut options) = FindOptions::resolve(&query, None, None, None)?;
                options.limit = Some(1);
                let docs = match &self.tx {
                    Some(tx) => tx.find(&db, &collection, &filter, &options)?,
                    None => db.find(&collection, &filter, &options)?,
                };
                Ok(json!({ "doc": docs.into_iter().next() }))
            }
            Request::Count { collection, query } => {
                let count = match &self.tx {
                    Some(tx) => tx.count(&db, &collection, &query)?,
                    None => db.count(&collection, &query)?,
                };
                Ok(json!({ "count": count }))
            }
            Request::Update {
                collection,
                query,
                update,
            } => self.update(&collection, &query, &update, true),
            Request::UpdateOne {
                collection,
                query,
                update,
            } => self.update(&collection, &query, &update, false),
            Request::Delete { collection, query } => self.delete(&collection, &query, true),
            Request::DeleteOne { collection, query } => self.delete(&collection, &query, false),

            Request::CreateCollection { collection } => {
                let existed = db.create_collection(&collection)?;
                Ok(json!({ "existed": existed }))
            }
            Request::ListCollections => Ok(json!({ "collections": db.list_collections() })),
            Request::DropCollection { collection } => {
                let existed = db.drop_collection(&collection)?;
                Ok(json!({ "existed": existed }))
            }
            Request::Compact { collection } => Ok(serde_json::to_value(db.compact(&collection)?)?),
            Request::Aggregate {
                collection,
                pipeline,
            } => Ok(json!({ "docs": db.aggregate(&collection, &pipeline)? })),

            Request::CreateIndex { collection, field } => {
                create_index(&db, &collection, IndexKind::Single, vec![field])
            }
            Request::CreateUniqueIndex { collection, field } => {
                create_index(&db, &collection, IndexKind::Unique, vec![field])
            }
            Request::CreateCompositeIndex { collection, fields } => {
                create_index(&db, &collection, IndexKind::Composite, fields)
            }
            Request::CreateTextIndex { collection, fields } => {
                create_index(&db, &collection, IndexKind::Text, fields)
            }
            Request::ListIndexes { collection } => {
                let indexes: Vec<Value> = db
                    .list_indexes(&collection)?
                    .iter()
                    .map(index_payload)
                    .collect();
                Ok(json!({ "indexes": indexes }))
            }
            Request::DropIndex { collection, index } => {
                db.drop_index(&collection, &index)?;
                Ok(json!({ "dropped": true }))
            }

            Request::TextSearch {
                collection,
                query,
                limit,
            } => {
                let hits: Vec<Value> = db
                    .text_search(&collection, &query, limit)?
                    .into_iter()
                    .map(|(score, doc)| json!({ "score": score, "doc": doc }))
                    .collect();
                Ok(json!({ "hits": hits }))
            }
            Request::Search {
                query,
                bucket,
                limit,
            } => Ok(json!({ "hits": db.search(&query, bucket.as_deref(), limit) })),

            Request::CreateBucket { bucket } => {
                Ok(json!({ "existed": db.create_bucket(&bucket)? }))
            }
            Request::ListBuckets => Ok(json!({ "buckets": db.list_buckets() })),
            Request::DeleteBucket { bucket } => {
                Ok(json!({ "existed": db.delete_bucket(&bucket)? }))
            }
            Request::PutObject {
                bucket,
                key,
                data,
                content_type,
                metadata,
            } => {
                let data = STANDARD
                    .decode(data.as_bytes())
                    .map_err(|e| CoreError::parse(format!("invalid base64 payload: {e}")))?;
                let meta = db.put_object(
                    &bucket,
                    &key,
                    &data,
                    content_type,
                    metadata.unwrap_or_default(),
                )?;
                Ok(json!({ "object": meta }))
            }
            Request::GetObject { bucket, key } => {
                let (meta, data) = db.get_object(&bucket, &key)?;
                Ok(get_object_payload(meta, &data))
            }
            Request::HeadObject { bucket, key } => {
                Ok(json!({ "object": db.head_object(&bucket, &key)? }))
            }
            Request::DeleteObject { bucket, key } => {
                Ok(json!({ "existed": db.delete_object(&bucket, &key)? }))
            }
            Request::ListObjects {
                bucket,
                prefix,
                limit,
            } => Ok(json!({ "objects": db.list_objects(&bucket, prefix.as_deref(), limit)? })),
        }
    }

    fn login(&mut self, user: String, password: &str) -> CoreResult<Value> {
        if let Some(credentials) = &self.credentials {
            if !credentials.verify(&user, password) {
                tracing::warn!(user = %user, "login rejected");
                self.user = None;
                return Err(CoreError::auth("bad user name or password"));
            }
        }
        tracing::debug!(user = %user, "logged in");
        let payload = json!({ "user": user });
        self.user = Some(user);
        Ok(payload)
    }

    fn update(
        &mut self,
        collection: &str,
        query: &Value,
        update: &Value,
        multi: bool,
    ) -> CoreResult<Value> {
        let (matched, modified) = match self.tx.as_mut() {
            Some(tx) => tx.update(&self.db, collection, query, update, multi)?,
            None => {
                let result = self.db.update(collection, query, update, multi)?;
                (result.matched, result.modified)
            }
        };
        Ok(json!({ "matched": matched, "modified": modified }))
    }

    fn delete(&mut self, collection: &str, query: &Value, multi: bool) -> CoreResult<Value> {
        let deleted = match self.tx.as_mut() {
            Some(tx) => tx.delete(&self.db, collection, query, multi)?,
            None => self.db.delete(collection, query, multi)?.deleted,
        };
        Ok(json!({ "matched": deleted, "deleted": deleted }))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tracing::debug!(tx = tx.id(), "session closed with an open transaction");
            tx.rollback();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("db", &self.db)
            .field("tx", &self.transaction_id())
            .field("user", &self.user)
            .finish()
    }
}

fn create_index(
    db: &Database,
    collection: &str,
    kind: IndexKind,
    fields: Vec<String>,
) -> CoreResult<Value> {
    let (index, existed) = db.create_index(collection, kind, fields)?;
    Ok(json!({ "index": index, "existed": existed }))
}

fn index_payload(spec: &IndexSpec) -> Value {
    json!({
        "name": spec.name,
        "kind": spec.kind.as_str(),
        "fields": spec.fields,
    })
}

fn insert_many_payload(results: Vec<CoreResult<u64>>) -> Value {
    let ids: Vec<u64> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
    let results: Vec<Value> = results
        .into_iter()
        .enumerate()
        .map(|(index, result)| match result {
            Ok(id) => json!({ "index": index, "ok": true, "id": id }),
            Err(e) => json!({
                "index": index,
                "ok": false,
                "error": { "kind": e.kind(), "message": e.envelope_message() },
            }),
        })
        .collect();
    json!({ "ids": ids, "inserted": ids.len(), "results": results })
}

fn get_object_payload(meta: ObjectMeta, data: &[u8]) -> Value {
    json!({
        "data": STANDARD.encode(data),
        "content_type": meta.content_type,
        "metadata": meta.metadata,
        "size": meta.size,
        "object": meta,
    })
}

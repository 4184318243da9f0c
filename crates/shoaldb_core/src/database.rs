//! Database facade.

use crate::aggregate;
use crate::blob::{BlobHit, BlobStore, ObjectMeta};
use crate::collection::Collection;
use crate::config::Config;
use crate::crypto::{CryptoManager, EncryptionKey};
use crate::dir::DatabaseDir;
use crate::error::{CoreError, CoreResult};
use crate::index::{IndexKind, IndexSpec};
use crate::manifest::Manifest;
use crate::persist::{CollectionStore, CommitLog, JournalOp};
use crate::query::Filter;
use crate::transaction::Transaction;
use crate::update::Update;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use shoaldb_protocol::FindOptions;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub(crate) type CollectionHandle = Arc<RwLock<Collection>>;

/// Outcome of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct UpdateResult {
    /// Documents matched by the query.
    pub matched: u64,
    /// Documents whose body changed.
    pub modified: u64,
}

/// Outcome of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DeleteResult {
    /// Documents matched by the query.
    pub matched: u64,
    /// Documents removed.
    pub deleted: u64,
}

/// Outcome of a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompactStats {
    /// Documents in the rewritten snapshot.
    pub docs: u64,
    /// Bytes on disk before compaction.
    pub old_size: u64,
    /// Bytes on disk after compaction.
    pub new_size: u64,
}

/// The main database handle.
///
/// `Database` owns the directory lock and all collection and blob state.
/// It is `Sync`: share it behind an `Arc` and give every caller its own
/// [`Session`](crate::Session) for transactions.
///
/// # Opening a Database
///
/// ```rust,no_run
/// use shoaldb_core::{Config, Database};
/// use serde_json::json;
///
/// let db = Database::open("my_database", Config::default())?;
/// let id = db.insert("users", json!({"name": "Ada"}))?;
/// assert!(db.find_by_id("users", id)?.is_some());
/// # Ok::<(), shoaldb_core::CoreError>(())
/// ```
pub struct Database {
    /// Configuration.
    config: Config,
    /// Database directory (holds the lock and the sealing key).
    dir: DatabaseDir,
    /// Live collections by name.
    collections: RwLock<BTreeMap<String, CollectionHandle>>,
    /// Buckets and their objects.
    blobs: RwLock<BlobStore>,
    /// Id floors of collections that do not exist yet but have ids
    /// reserved by open transactions.
    reserved: Mutex<BTreeMap<String, u64>>,
    /// Transaction id source.
    next_tx: AtomicU64,
}

impl Database {
    /// Opens or creates an unencrypted database.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process has the database locked (`DatabaseLocked`)
    /// - The directory is missing and `create_if_missing` is false
    /// - The store is encrypted (`Auth`)
    /// - A data file is corrupt (`InvalidFormat`)
    pub fn open(path: impl AsRef<Path>, config: Config) -> CoreResult<Self> {
        Self::open_with_key(path, None, config)
    }

    /// Opens or creates an encrypted database.
    ///
    /// `key_file` must hold exactly 32 raw bytes. The key is read before the
    /// directory is touched, so a bad key file leaves no trace on disk.
    pub fn open_encrypted(
        path: impl AsRef<Path>,
        key_file: impl AsRef<Path>,
        config: Config,
    ) -> CoreResult<Self> {
        let key = EncryptionKey::from_file(key_file.as_ref())?;
        Self::open_with_key(path, Some(key), config)
    }

    /// Opens a database with an optional in-memory key.
    pub fn open_with_key(
        path: impl AsRef<Path>,
        key: Option<EncryptionKey>,
        config: Config,
    ) -> CoreResult<Self> {
        let path = path.as_ref();
        let crypto = key.as_ref().map(CryptoManager::new);
        let mut dir = DatabaseDir::open(path, config.create_if_missing, config.sync_writes)?;

        match dir.load_manifest()? {
            Some(manifest) => manifest.verify(crypto.as_ref())?,
            None => dir.save_manifest(&Manifest::create(crypto.as_ref())?)?,
        }
        let encrypted = crypto.is_some();
        dir.set_crypto(crypto);

        let commit_log = CommitLog::new(&dir);
        let committed = commit_log.load()?;
        let mut collections = BTreeMap::new();
        for name in dir.collection_names()? {
            let store = CollectionStore::new(&dir, &name);
            let (mut collection, marked) = store.load(&committed)?;
            if marked {
                store.write_snapshot(&collection)?;
                collection.reset_journal();
            }
            collections.insert(name, Arc::new(RwLock::new(collection)));
        }
        commit_log.clear()?;
        let blobs = BlobStore::load(&dir)?;

        tracing::info!(
            path = %path.display(),
            collections = collections.len(),
            buckets = blobs.list_buckets().len(),
            encrypted,
            "database opened"
        );

        Ok(Self {
            config,
            dir,
            collections: RwLock::new(collections),
            blobs: RwLock::new(blobs),
            reserved: Mutex::new(BTreeMap::new()),
            next_tx: AtomicU64::new(1),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the database directory.
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Returns true if data files are sealed.
    pub fn is_encrypted(&self) -> bool {
        self.dir.crypto().is_some()
    }

    /// Flushes every collection into a fresh snapshot and releases the
    /// database.
    pub fn close(self) -> CoreResult<()> {
        let handles: Vec<CollectionHandle> = self.collections.read().values().cloned().collect();
        for handle in handles {
            let mut collection = handle.write();
            if collection.journal_len() > 0 {
                let name = collection.name().to_string();
                CollectionStore::new(&self.dir, &name).write_snapshot(&collection)?;
                collection.reset_journal();
            }
        }
        CommitLog::new(&self.dir).clear()?;
        tracing::info!(path = %self.dir.path().display(), "database closed");
        Ok(())
    }

    // =========================================================================
    // Collection plumbing
    // =========================================================================

    pub(crate) fn dir(&self) -> &DatabaseDir {
        &self.dir
    }

    pub(crate) fn handle(&self, name: &str) -> Option<CollectionHandle> {
        self.collections.read().get(name).cloned()
    }

    fn handle_or_create(&self, name: &str) -> (CollectionHandle, bool) {
        if let Some(handle) = self.handle(name) {
            return (handle, false);
        }
        let mut collections = self.collections.write();
        if let Some(handle) = collections.get(name) {
            return (Arc::clone(handle), false);
        }
        let mut collection = Collection::new(name);
        if let Some(&floor) = self.reserved.lock().get(name) {
            collection.raise_next_id(floor);
        }
        let handle = Arc::new(RwLock::new(collection));
        collections.insert(name.to_string(), Arc::clone(&handle));
        (handle, true)
    }

    /// Settles the `_id` of a document a transaction will insert.
    ///
    /// The id is taken from the collection's counter, or from a reservation
    /// floor when the collection does not exist yet, so the collection is
    /// neither created nor journaled. Returns the id, the document and
    /// whether the collection exists.
    pub(crate) fn reserve_insert(&self, name: &str, doc: Value) -> CoreResult<(u64, Value, bool)> {
        check_collection_name(name)?;
        loop {
            let collections = self.collections.read();
            let existing = collections.get(name).cloned();
            match existing {
                Some(handle) => {
                    drop(collections);
                    let mut collection = handle.write();
                    if collection.is_dropped() {
                        continue;
                    }
                    let (id, doc) = collection.prepare_insert(doc)?;
                    return Ok((id, doc, true));
                }
                None => {
                    let mut reserved = self.reserved.lock();
                    let floor = reserved.entry(name.to_string()).or_insert(1);
                    let mut scratch = Collection::new(name);
                    scratch.raise_next_id(*floor);
                    let (id, doc) = scratch.prepare_insert(doc)?;
                    *floor = scratch.next_id();
                    return Ok((id, doc, false));
                }
            }
        }
    }

    /// Live collection for a commit; created when `create` is set.
    ///
    /// Returns the handle and whether this call created it.
    pub(crate) fn commit_handle(&self, name: &str, create: bool) -> Option<(CollectionHandle, bool)> {
        if create {
            Some(self.handle_or_create(name))
        } else {
            self.handle(name).map(|handle| (handle, false))
        }
    }

    /// Forgets a collection created for a commit that did not go through.
    pub(crate) fn discard_if_unused(&self, name: &str, handle: &CollectionHandle) {
        let mut collection = handle.write();
        if !collection.is_empty() || CollectionStore::new(&self.dir, name).size() > 0 {
            return;
        }
        collection.mark_dropped();
        drop(collection);
        self.forget(name, handle);
    }

    fn forget(&self, name: &str, handle: &CollectionHandle) {
        let mut collections = self.collections.write();
        if collections
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, handle))
        {
            collections.remove(name);
        }
    }

    /// Runs `f` against a live collection, creating it when absent.
    ///
    /// A collection created here that `f` leaves empty and unpersisted is
    /// forgotten again.
    pub(crate) fn with_collection_mut<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Collection, &CollectionStore<'_>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        check_collection_name(name)?;
        let mut f = Some(f);
        loop {
            let (handle, created) = self.handle_or_create(name);
            let mut collection = handle.write();
            if collection.is_dropped() {
                continue;
            }
            let Some(f) = f.take() else {
                return Err(CoreError::internal("collection callback already consumed"));
            };
            let store = CollectionStore::new(&self.dir, name);
            let result = f(&mut collection, &store);
            if created && collection.is_empty() && store.size() == 0 {
                collection.mark_dropped();
                drop(collection);
                self.forget(name, &handle);
                return result;
            }
            let value = result?;
            self.maybe_compact(&mut collection, &store)?;
            return Ok(value);
        }
    }

    /// Runs `f` against an existing collection; `None` if it does not exist.
    fn with_existing_mut<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Collection, &CollectionStore<'_>) -> CoreResult<T>,
    ) -> CoreResult<Option<T>> {
        let Some(handle) = self.handle(name) else {
            return Ok(None);
        };
        let mut collection = handle.write();
        if collection.is_dropped() {
            return Ok(None);
        }
        let store = CollectionStore::new(&self.dir, name);
        let value = f(&mut collection, &store)?;
        self.maybe_compact(&mut collection, &store)?;
        Ok(Some(value))
    }

    fn with_existing<T>(
        &self,
        name: &str,
        f: impl FnOnce(&Collection) -> CoreResult<T>,
    ) -> CoreResult<Option<T>> {
        let Some(handle) = self.handle(name) else {
            return Ok(None);
        };
        let collection = handle.read();
        if collection.is_dropped() {
            return Ok(None);
        }
        f(&collection).map(Some)
    }

    pub(crate) fn maybe_compact(
        &self,
        collection: &mut Collection,
        store: &CollectionStore<'_>,
    ) -> CoreResult<()> {
        let threshold = self.config.compact_after;
        if threshold == 0 || collection.journal_len() < threshold {
            return Ok(());
        }
        let size = store.write_snapshot(collection)?;
        tracing::debug!(
            collection = collection.name(),
            records = collection.journal_len(),
            size,
            "journal folded into snapshot"
        );
        collection.reset_journal();
        Ok(())
    }

    // =========================================================================
    // Documents
    // =========================================================================

    /// Inserts a document and returns its `_id`.
    ///
    /// The collection is created if it does not exist.
    pub fn insert(&self, collection: &str, doc: Value) -> CoreResult<u64> {
        self.with_collection_mut(collection, |c, store| insert_one(c, store, doc))
    }

    /// Inserts several documents, each atomically on its own.
    ///
    /// Returns one result per input document, in order.
    pub fn insert_many(
        &self,
        collection: &str,
        docs: Vec<Value>,
    ) -> CoreResult<Vec<CoreResult<u64>>> {
        self.check_batch(docs.len())?;
        self.with_collection_mut(collection, |c, store| {
            Ok(docs
                .into_iter()
                .map(|doc| insert_one(c, store, doc))
                .collect())
        })
    }

    pub(crate) fn check_batch(&self, len: usize) -> CoreResult<()> {
        if len > self.config.max_batch_size {
            return Err(CoreError::validation(format!(
                "batch of {len} documents exceeds the limit of {}",
                self.config.max_batch_size
            )));
        }
        Ok(())
    }

    /// Documents matching `query`, ordered and windowed by `options`.
    ///
    /// A missing collection yields no documents.
    pub fn find(
        &self,
        collection: &str,
        query: &Value,
        options: &FindOptions,
    ) -> CoreResult<Vec<Value>> {
        let filter = Filter::parse(query)?;
        let docs = self.with_existing(collection, |c| {
            if options.sort.is_empty() {
                let skip = options.skip.unwrap_or(0) as usize;
                let limit = options.limit.map_or(usize::MAX, |l| l as usize);
                Ok(c.find_ids(&filter)
                    .into_iter()
                    .skip(skip)
                    .take(limit)
                    .filter_map(|id| c.get(id).map(|s| s.doc.clone()))
                    .collect())
            } else {
                let docs: Vec<Value> = c
                    .find_ids(&filter)
                    .into_iter()
                    .filter_map(|id| c.get(id).map(|s| s.doc.clone()))
                    .collect();
                Ok(window(docs, options))
            }
        })?;
        Ok(docs.unwrap_or_default())
    }

    /// First document matching `query` in `_id` order.
    pub fn find_one(&self, collection: &str, query: &Value) -> CoreResult<Option<Value>> {
        let options = FindOptions {
            limit: Some(1),
            ..FindOptions::default()
        };
        Ok(self.find(collection, query, &options)?.into_iter().next())
    }

    /// Looks up a document by `_id`.
    pub fn find_by_id(&self, collection: &str, id: u64) -> CoreResult<Option<Value>> {
        Ok(self
            .with_existing(collection, |c| Ok(c.get(id).map(|s| s.doc.clone())))?
            .flatten())
    }

    /// Number of documents matching `query`.
    pub fn count(&self, collection: &str, query: &Value) -> CoreResult<u64> {
        let filter = Filter::parse(query)?;
        let count = self.with_existing(collection, |c| Ok(c.find_ids(&filter).len() as u64))?;
        Ok(count.unwrap_or(0))
    }

    /// Applies `update` to matching documents (`multi`) or to the first one.
    ///
    /// Either every matched document is updated or none is.
    pub fn update(
        &self,
        collection: &str,
        query: &Value,
        update: &Value,
        multi: bool,
    ) -> CoreResult<UpdateResult> {
        let filter = Filter::parse(query)?;
        let update = Update::parse(update)?;
        let result = self.with_existing_mut(collection, |c, store| {
            let mut ids = c.find_ids(&filter);
            if !multi {
                ids.truncate(1);
            }

            let mut undo: Vec<(u64, Value)> = Vec::new();
            let mut ops = Vec::new();
            let outcome = (|| -> CoreResult<()> {
                for &id in &ids {
                    let Some(old) = c.get(id).map(|s| s.doc.clone()) else {
                        continue;
                    };
                    let mut new = old.clone();
                    if !update.apply(&mut new)? {
                        continue;
                    }
                    c.replace(id, new.clone())?;
                    undo.push((id, old));
                    ops.push(JournalOp::Put { doc: new });
                }
                Ok(())
            })();

            let modified = ops.len() as u64;
            let outcome = outcome.and_then(|()| match ops.len() {
                0 => Ok(()),
                1 => store.append(&ops),
                _ => store.append(&[JournalOp::Batch { marker: None, ops }]),
            });
            if let Err(e) = outcome {
                for (id, old) in undo.into_iter().rev() {
                    c.replace(id, old)?;
                }
                return Err(e);
            }
            if modified > 0 {
                c.note_journal(1);
            }
            Ok(UpdateResult {
                matched: ids.len() as u64,
                modified,
            })
        })?;
        Ok(result.unwrap_or_default())
    }

    /// Deletes matching documents (`multi`) or the first one.
    pub fn delete(&self, collection: &str, query: &Value, multi: bool) -> CoreResult<DeleteResult> {
        let filter = Filter::parse(query)?;
        let result = self.with_existing_mut(collection, |c, store| {
            let mut ids = c.find_ids(&filter);
            if !multi {
                ids.truncate(1);
            }
            let mut ops: Vec<JournalOp> = ids.iter().map(|&id| JournalOp::Delete { id }).collect();
            if ops.len() > 1 {
                ops = vec![JournalOp::Batch { marker: None, ops }];
            }
            store.append(&ops)?;
            for &id in &ids {
                c.remove(id);
            }
            c.note_journal(ops.len());
            Ok(DeleteResult {
                matched: ids.len() as u64,
                deleted: ids.len() as u64,
            })
        })?;
        Ok(result.unwrap_or_default())
    }

    /// Runs an aggregation pipeline over the collection in `_id` order.
    pub fn aggregate(&self, collection: &str, pipeline: &Value) -> CoreResult<Vec<Value>> {
        if !pipeline.is_array() {
            return Err(CoreError::validation("pipeline must be an array of stages"));
        }
        let docs = self
            .with_existing(collection, |c| Ok(c.iter().map(|(_, s)| s.doc.clone()).collect()))?
            .unwrap_or_default();
        aggregate::run(docs, pipeline)
    }

    // =========================================================================
    // Collections
    // =========================================================================

    /// Creates a collection. Returns whether it already existed.
    pub fn create_collection(&self, name: &str) -> CoreResult<bool> {
        check_collection_name(name)?;
        if self.handle(name).is_some_and(|h| !h.read().is_dropped()) {
            return Ok(true);
        }
        self.with_collection_mut(name, |c, store| {
            if store.size() > 0 || !c.is_empty() {
                return Ok(true);
            }
            store.write_snapshot(c)?;
            c.reset_journal();
            Ok(false)
        })
    }

    /// Names of all collections, sorted.
    pub fn list_collections(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    /// Drops a collection with its documents and indexes.
    ///
    /// Returns whether it existed.
    pub fn drop_collection(&self, name: &str) -> CoreResult<bool> {
        check_collection_name(name)?;
        let handle = self.collections.write().remove(name);
        let store = CollectionStore::new(&self.dir, name);
        match handle {
            Some(handle) => {
                let mut collection = handle.write();
                collection.mark_dropped();
                store.remove()?;
                tracing::debug!(collection = name, "collection dropped");
                Ok(true)
            }
            None => {
                store.remove()?;
                Ok(false)
            }
        }
    }

    /// Rewrites the collection snapshot and discards its journal.
    pub fn compact(&self, name: &str) -> CoreResult<CompactStats> {
        self.with_existing_mut(name, |c, store| {
            let old_size = store.size();
            let new_size = store.write_snapshot(c)?;
            c.reset_journal();
            tracing::info!(collection = name, old_size, new_size, "collection compacted");
            Ok(CompactStats {
                docs: c.len() as u64,
                old_size,
                new_size,
            })
        })?
        .ok_or_else(|| CoreError::not_found("collection", name))
    }

    // =========================================================================
    // Indexes
    // =========================================================================

    /// Creates an index. Returns `(name, existed)`.
    ///
    /// The collection is created if it does not exist.
    pub fn create_index(
        &self,
        collection: &str,
        kind: IndexKind,
        fields: Vec<String>,
    ) -> CoreResult<(String, bool)> {
        let spec = IndexSpec::new(kind, fields)?;
        self.with_collection_mut(collection, |c, store| {
            let (name, existed) = c.create_index(spec)?;
            if !existed {
                if let Err(e) = store.write_snapshot(c) {
                    c.drop_index(&name)?;
                    return Err(e);
                }
                c.reset_journal();
            }
            Ok((name, existed))
        })
    }

    /// Index declarations of a collection.
    pub fn list_indexes(&self, collection: &str) -> CoreResult<Vec<IndexSpec>> {
        self.with_existing(collection, |c| Ok(c.index_specs()))?
            .ok_or_else(|| CoreError::not_found("collection", collection))
    }

    /// Drops an index by name.
    pub fn drop_index(&self, collection: &str, index: &str) -> CoreResult<()> {
        self.with_existing_mut(collection, |c, store| {
            c.drop_index(index)?;
            store.write_snapshot(c)?;
            c.reset_journal();
            Ok(())
        })?
        .ok_or_else(|| CoreError::not_found("collection", collection))
    }

    /// Ranked full-text search over the collection's text index.
    ///
    /// `limit <= 0` selects the configured default.
    pub fn text_search(
        &self,
        collection: &str,
        query: &str,
        limit: i64,
    ) -> CoreResult<Vec<(f64, Value)>> {
        let limit = self.config.search_limit(limit);
        self.with_existing(collection, |c| {
            Ok(c.text_search(query, limit)?
                .into_iter()
                .filter_map(|(id, score)| c.get(id).map(|s| (score, s.doc.clone())))
                .collect())
        })?
        .ok_or_else(|| CoreError::not_found("collection", collection))
    }

    // =========================================================================
    // Blobs
    // =========================================================================

    /// Ranked search over textual objects, optionally within one bucket.
    pub fn search(&self, query: &str, bucket: Option<&str>, limit: i64) -> Vec<BlobHit> {
        let limit = self.config.search_limit(limit);
        self.blobs.read().search(query, bucket, limit)
    }

    /// Creates a bucket. Returns whether it already existed.
    pub fn create_bucket(&self, bucket: &str) -> CoreResult<bool> {
        self.blobs.write().create_bucket(&self.dir, bucket)
    }

    /// Names of all buckets, sorted.
    pub fn list_buckets(&self) -> Vec<String> {
        self.blobs.read().list_buckets()
    }

    /// Deletes a bucket and its objects. Returns whether it existed.
    pub fn delete_bucket(&self, bucket: &str) -> CoreResult<bool> {
        self.blobs.write().delete_bucket(&self.dir, bucket)
    }

    /// Stores an object.
    pub fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        content_type: Option<String>,
        metadata: BTreeMap<String, String>,
    ) -> CoreResult<ObjectMeta> {
        self.blobs
            .write()
            .put_object(&self.dir, bucket, key, data, content_type, metadata)
    }

    /// Metadata and payload of an object.
    pub fn get_object(&self, bucket: &str, key: &str) -> CoreResult<(ObjectMeta, Vec<u8>)> {
        self.blobs.read().get_object(&self.dir, bucket, key)
    }

    /// Metadata of an object.
    pub fn head_object(&self, bucket: &str, key: &str) -> CoreResult<ObjectMeta> {
        self.blobs.read().head_object(bucket, key)
    }

    /// Deletes an object. Returns whether it existed.
    pub fn delete_object(&self, bucket: &str, key: &str) -> CoreResult<bool> {
        self.blobs.write().delete_object(&self.dir, bucket, key)
    }

    /// Objects of a bucket in key order.
    ///
    /// `limit <= 0` selects the configured default.
    pub fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        limit: i64,
    ) -> CoreResult<Vec<ObjectMeta>> {
        let limit = self.config.list_limit(limit);
        self.blobs.read().list_objects(bucket, prefix, limit)
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Starts an optimistic transaction.
    pub fn begin(&self) -> Transaction {
        let id = self.next_tx.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(tx = id, "transaction started");
        Transaction::new(id)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.dir.path())
            .field("encrypted", &self.is_encrypted())
            .finish_non_exhaustive()
    }
}

pub(crate) fn check_collection_name(name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::validation("collection name must not be empty"));
    }
    Ok(())
}

fn insert_one(c: &mut Collection, store: &CollectionStore<'_>, doc: Value) -> CoreResult<u64> {
    let (id, doc) = c.prepare_insert(doc)?;
    c.check_insert(id, &doc)?;
    store.append(&[JournalOp::Put { doc: doc.clone() }])?;
    c.insert_prepared(id, doc)?;
    c.note_journal(1);
    Ok(id)
}

/// Sorts, skips and limits a result set.
pub(crate) fn window(mut docs: Vec<Value>, options: &FindOptions) -> Vec<Value> {
    if !options.sort.is_empty() {
        aggregate::sort_docs(&mut docs, &options.sort);
    }
    let skip = options.skip.unwrap_or(0) as usize;
    let limit = options.limit.map_or(usize::MAX, |l| l as usize);
    docs.into_iter().skip(skip).take(limit).collect()
}

//! Optimistic transactions.
//!
//! A transaction buffers writes per collection and records the version of
//! every committed document its updates and deletes observed. Reads see
//! committed state overlaid with the buffer. Commit takes the write locks
//! of all touched collections in name order, re-validates the recorded
//! versions and applies the buffer to staged copies. It then journals one
//! batch per collection, marks the commit when more than one collection is
//! involved, and only then publishes the copies.
//!
//! Inserts reserve their `_id` in memory right away. Nothing reaches disk,
//! and no collection is created, before commit.

use crate::collection::Collection;
use crate::database::{window, CollectionHandle, Database};
use crate::error::{CoreError, CoreResult};
use crate::persist::{CollectionStore, CommitLog, JournalOp};
use crate::query::Filter;
use crate::update::Update;
use serde_json::Value;
use shoaldb_protocol::FindOptions;
use std::collections::{BTreeMap, BTreeSet};

/// Transaction identifier.
pub type TransactionId = u64;

/// A buffered write.
#[derive(Debug, Clone)]
enum Pending {
    /// New document under a reserved id.
    Insert(Value),
    /// New body for a committed document.
    Replace(Value),
    /// Removal of a committed document.
    Delete,
}

/// A document as seen through the transaction.
#[derive(Debug)]
struct Seen {
    id: u64,
    doc: Value,
    /// Committed version, `None` for buffered bodies.
    version: Option<u64>,
}

/// A pending optimistic transaction.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    pending: BTreeMap<String, BTreeMap<u64, Pending>>,
    observed: BTreeMap<(String, u64), u64>,
    /// Collections that did not exist when this transaction first wrote
    /// to them.
    creates: BTreeSet<String>,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId) -> Self {
        Self {
            id,
            pending: BTreeMap::new(),
            observed: BTreeMap::new(),
            creates: BTreeSet::new(),
        }
    }

    /// Returns the transaction id.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Number of buffered writes.
    pub fn pending_writes(&self) -> usize {
        self.pending.values().map(BTreeMap::len).sum()
    }

    /// Returns true if nothing has been buffered or observed.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.observed.is_empty()
    }

    /// Buffers an insert and returns the reserved `_id`.
    pub fn insert(&mut self, db: &Database, collection: &str, doc: Value) -> CoreResult<u64> {
        let (id, doc, exists) = db.reserve_insert(collection, doc)?;
        if !exists {
            self.creates.insert(collection.to_string());
        }
        self.pending
            .entry(collection.to_string())
            .or_default()
            .insert(id, Pending::Insert(doc));
        Ok(id)
    }

    /// Matching documents as seen by this transaction.
    pub fn find(
        &self,
        db: &Database,
        collection: &str,
        query: &Value,
        options: &FindOptions,
    ) -> CoreResult<Vec<Value>> {
        let filter = Filter::parse(query)?;
        let docs = self
            .view(db, collection)
            .into_iter()
            .filter(|seen| filter.matches(&seen.doc))
            .map(|seen| seen.doc)
            .collect();
        Ok(window(docs, options))
    }

    /// First matching document as seen by this transaction.
    pub fn find_one(
        &self,
        db: &Database,
        collection: &str,
        query: &Value,
    ) -> CoreResult<Option<Value>> {
        let options = FindOptions {
            limit: Some(1),
            ..FindOptions::default()
        };
        Ok(self.find(db, collection, query, &options)?.into_iter().next())
    }

    /// Number of matching documents as seen by this transaction.
    pub fn count(&self, db: &Database, collection: &str, query: &Value) -> CoreResult<u64> {
        let filter = Filter::parse(query)?;
        Ok(self
            .view(db, collection)
            .iter()
            .filter(|seen| filter.matches(&seen.doc))
            .count() as u64)
    }

    /// Buffers an update. Returns `(matched, modified)`.
    pub fn update(
        &mut self,
        db: &Database,
        collection: &str,
        query: &Value,
        update: &Value,
        multi: bool,
    ) -> CoreResult<(u64, u64)> {
        let filter = Filter::parse(query)?;
        let update = Update::parse(update)?;
        let matched = self.matching(db, collection, &filter, multi);

        let mut staged = Vec::new();
        for seen in &matched {
            let mut new = seen.doc.clone();
            if update.apply(&mut new)? {
                staged.push((seen.id, new));
            }
        }

        self.observe(collection, &matched);
        let modified = staged.len() as u64;
        if staged.is_empty() {
            return Ok((matched.len() as u64, 0));
        }
        let writes = self.pending.entry(collection.to_string()).or_default();
        for (id, new) in staged {
            let entry = match writes.get(&id) {
                Some(Pending::Insert(_)) => Pending::Insert(new),
                _ => Pending::Replace(new),
            };
            writes.insert(id, entry);
        }
        Ok((matched.len() as u64, modified))
    }

    /// Buffers a delete. Returns the number of matched documents.
    pub fn delete(
        &mut self,
        db: &Database,
        collection: &str,
        query: &Value,
        multi: bool,
    ) -> CoreResult<u64> {
        let filter = Filter::parse(query)?;
        let matched = self.matching(db, collection, &filter, multi);
        if matched.is_empty() {
            return Ok(0);
        }

        self.observe(collection, &matched);
        let writes = self.pending.entry(collection.to_string()).or_default();
        for seen in &matched {
            if let Some(Pending::Insert(_)) = writes.get(&seen.id) {
                writes.remove(&seen.id);
            } else {
                writes.insert(seen.id, Pending::Delete);
            }
        }
        if writes.is_empty() {
            self.pending.remove(collection);
        }
        Ok(matched.len() as u64)
    }

    fn matching(&self, db: &Database, collection: &str, filter: &Filter, multi: bool) -> Vec<Seen> {
        let mut matched: Vec<Seen> = self
            .view(db, collection)
            .into_iter()
            .filter(|seen| filter.matches(&seen.doc))
            .collect();
        if !multi {
            matched.truncate(1);
        }
        matched
    }

    /// Records the committed version of every document not yet observed.
    fn observe(&mut self, collection: &str, seen: &[Seen]) {
        for seen in seen {
            if let Some(version) = seen.version {
                self.observed
                    .entry((collection.to_string(), seen.id))
                    .or_insert(version);
            }
        }
    }

    /// Committed documents overlaid with buffered writes, in `_id` order.
    fn view(&self, db: &Database, collection: &str) -> Vec<Seen> {
        let mut docs: BTreeMap<u64, Seen> = BTreeMap::new();
        if let Some(handle) = db.handle(collection) {
            let committed = handle.read();
            if !committed.is_dropped() {
                docs.extend(committed.iter().map(|(id, stored)| {
                    let seen = Seen {
                        id,
                        doc: stored.doc.clone(),
                        version: Some(stored.version),
                    };
                    (id, seen)
                }));
            }
        }
        if let Some(writes) = self.pending.get(collection) {
            for (&id, write) in writes {
                match write {
                    Pending::Insert(doc) | Pending::Replace(doc) => {
                        let doc = doc.clone();
                        docs.insert(id, Seen { id, doc, version: None });
                    }
                    Pending::Delete => {
                        docs.remove(&id);
                    }
                }
            }
        }
        docs.into_values().collect()
    }

    /// Validates and applies the buffered writes.
    ///
    /// Returns the number of writes applied. On error nothing is applied.
    pub fn commit(self, db: &Database) -> CoreResult<usize> {
        let names: BTreeSet<&str> = self
            .pending
            .keys()
            .map(String::as_str)
            .chain(self.observed.keys().map(|(name, _)| name.as_str()))
            .collect();

        let mut handles: Vec<(&str, CollectionHandle, bool)> = Vec::with_capacity(names.len());
        for name in names {
            let create = self.creates.contains(name) && self.pending.contains_key(name);
            let Some((handle, created)) = db.commit_handle(name, create) else {
                tracing::warn!(tx = self.id, collection = name, "commit conflict");
                self.discard_created(db, &handles);
                return Err(CoreError::conflict(format!(
                    "collection '{name}' was dropped"
                )));
            };
            handles.push((name, handle, created));
        }

        let result = self.apply(db, &handles);
        if result.is_err() {
            self.discard_created(db, &handles);
        }
        result
    }

    fn discard_created(&self, db: &Database, handles: &[(&str, CollectionHandle, bool)]) {
        for (name, handle, created) in handles {
            if *created {
                db.discard_if_unused(name, handle);
            }
        }
    }

    fn apply(&self, db: &Database, handles: &[(&str, CollectionHandle, bool)]) -> CoreResult<usize> {
        let mut guards: Vec<_> = handles
            .iter()
            .map(|(name, handle, _)| (*name, handle.write()))
            .collect();

        for (name, guard) in &guards {
            if guard.is_dropped() {
                tracing::warn!(tx = self.id, collection = name, "commit conflict");
                return Err(CoreError::conflict(format!(
                    "collection '{name}' was dropped"
                )));
            }
        }
        for ((name, id), version) in &self.observed {
            let current = guards
                .iter()
                .find(|(n, _)| *n == name.as_str())
                .and_then(|(_, guard)| guard.version(*id));
            if current != Some(*version) {
                tracing::warn!(tx = self.id, collection = %name, id, "commit conflict");
                return Err(CoreError::conflict(format!(
                    "document {id} in '{name}' changed since it was read"
                )));
            }
        }

        let mut staged: Vec<(usize, Collection, Vec<JournalOp>)> = Vec::new();
        for (slot, (name, guard)) in guards.iter().enumerate() {
            let Some(writes) = self.pending.get(*name) else {
                continue;
            };
            let mut copy: Collection = (**guard).clone();
            let mut ops = Vec::with_capacity(writes.len());
            for (id, write) in writes {
                match write {
                    Pending::Insert(doc) => {
                        copy.insert_prepared(*id, doc.clone())?;
                        ops.push(JournalOp::Put { doc: doc.clone() });
                    }
                    Pending::Replace(doc) => {
                        copy.replace(*id, doc.clone())?;
                        ops.push(JournalOp::Put { doc: doc.clone() });
                    }
                    Pending::Delete => {
                        copy.remove(*id);
                        ops.push(JournalOp::Delete { id: *id });
                    }
                }
            }
            staged.push((slot, copy, ops));
        }

        let marker = (staged.len() > 1).then_some(self.id);
        let staged: Vec<(usize, Collection, JournalOp)> = staged
            .into_iter()
            .map(|(slot, copy, ops)| (slot, copy, JournalOp::Batch { marker, ops }))
            .collect();
        for (slot, _, record) in &staged {
            CollectionStore::new(db.dir(), guards[*slot].0).append(std::slice::from_ref(record))?;
        }
        if let Some(tx) = marker {
            CommitLog::new(db.dir()).mark(tx)?;
        }

        let mut applied = 0;
        for (slot, mut copy, record) in staged {
            let (name, guard) = &mut guards[slot];
            copy.note_journal(1);
            applied += record.writes();
            **guard = copy;
            if let Err(e) = db.maybe_compact(guard, &CollectionStore::new(db.dir(), *name)) {
                tracing::warn!(collection = %name, error = %e, "compaction after commit failed");
            }
        }

        tracing::debug!(tx = self.id, writes = applied, "transaction committed");
        Ok(applied)
    }

    /// Discards the buffered writes.
    pub fn rollback(self) {
        tracing::debug!(
            tx = self.id,
            writes = self.pending_writes(),
            "transaction rolled back"
        );
    }
}

//! In-memory collection state.
//!
//! A collection owns its documents keyed by `_id`, the id counter and its
//! secondary indexes. Every stored document carries a version taken from a
//! per-collection clock; transactions compare versions to detect
//! conflicting writes.

use crate::document::{doc_id, parse_id, with_id_first, ID_FIELD};
use crate::error::{CoreError, CoreResult};
use crate::index::{Index, IndexKind, IndexSpec};
use crate::persist::{CollectionSnapshot, JournalOp};
use crate::query::Filter;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A document with its version.
#[derive(Debug, Clone)]
pub struct StoredDoc {
    /// Clock value of the last write.
    pub version: u64,
    /// Document body, `_id` included.
    pub doc: Value,
}

/// One collection.
#[derive(Debug, Clone)]
pub struct Collection {
    name: String,
    docs: BTreeMap<u64, StoredDoc>,
    next_id: u64,
    clock: u64,
    indexes: BTreeMap<String, Index>,
    journal_len: usize,
    dropped: bool,
}

impl Collection {
    /// Creates an empty collection.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            docs: BTreeMap::new(),
            next_id: 1,
            clock: 0,
            indexes: BTreeMap::new(),
            journal_len: 0,
            dropped: false,
        }
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Returns true if the collection holds no documents.
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Iterates documents in `_id` order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &StoredDoc)> {
        self.docs.iter().map(|(id, stored)| (*id, stored))
    }

    /// Looks up a document.
    pub fn get(&self, id: u64) -> Option<&StoredDoc> {
        self.docs.get(&id)
    }

    /// Current version of a document, `None` if absent.
    pub fn version(&self, id: u64) -> Option<u64> {
        self.docs.get(&id).map(|s| s.version)
    }

    pub(crate) fn is_dropped(&self) -> bool {
        self.dropped
    }

    pub(crate) fn mark_dropped(&mut self) {
        self.dropped = true;
    }

    pub(crate) fn journal_len(&self) -> usize {
        self.journal_len
    }

    pub(crate) fn note_journal(&mut self, records: usize) {
        self.journal_len += records;
    }

    pub(crate) fn reset_journal(&mut self) {
        self.journal_len = 0;
    }

    /// Takes the next id. Ids handed out are never reissued.
    pub fn reserve_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Makes sure ids below `floor` are never assigned.
    pub(crate) fn raise_next_id(&mut self, floor: u64) {
        self.next_id = self.next_id.max(floor);
    }

    fn claim_id(&mut self, id: u64) {
        if id >= self.next_id {
            self.next_id = id.saturating_add(1);
        }
    }

    /// Validates a new document and settles its `_id`.
    ///
    /// Returns the id and the document with `_id` as its first field.
    pub fn prepare_insert(&mut self, doc: Value) -> CoreResult<(u64, Value)> {
        let Value::Object(map) = doc else {
            return Err(CoreError::validation("document must be a JSON object"));
        };
        let id = match map.get(ID_FIELD) {
            Some(value) => {
                let id = parse_id(value)?;
                if self.docs.contains_key(&id) {
                    return Err(CoreError::constraint(format!(
                        "duplicate {ID_FIELD} {id} in collection '{}'",
                        self.name
                    )));
                }
                self.claim_id(id);
                id
            }
            None => self.reserve_id(),
        };
        Ok((id, with_id_first(id, map)))
    }

    /// Checks that `doc` can be stored under `id` without breaking an index.
    pub fn check(&self, id: u64, doc: &Value) -> CoreResult<()> {
        self.indexes.values().try_for_each(|index| index.check(id, doc))
    }

    /// Checks that a prepared insert can be applied.
    pub fn check_insert(&self, id: u64, doc: &Value) -> CoreResult<()> {
        if self.docs.contains_key(&id) {
            return Err(CoreError::constraint(format!(
                "duplicate {ID_FIELD} {id} in collection '{}'",
                self.name
            )));
        }
        self.check(id, doc)
    }

    /// Stores a prepared document.
    pub fn insert_prepared(&mut self, id: u64, doc: Value) -> CoreResult<()> {
        self.check_insert(id, &doc)?;
        self.claim_id(id);
        for index in self.indexes.values_mut() {
            index.insert(id, &doc);
        }
        self.clock += 1;
        self.docs.insert(
            id,
            StoredDoc {
                version: self.clock,
                doc,
            },
        );
        Ok(())
    }

    /// Inserts a document, assigning `_id` when absent.
    pub fn insert(&mut self, doc: Value) -> CoreResult<u64> {
        let (id, doc) = self.prepare_insert(doc)?;
        self.insert_prepared(id, doc)?;
        Ok(id)
    }

    /// Replaces the body of an existing document.
    ///
    /// The collection is unchanged if the new body violates an index.
    pub fn replace(&mut self, id: u64, doc: Value) -> CoreResult<()> {
        if doc_id(&doc) != Some(id) {
            return Err(CoreError::validation(format!("{ID_FIELD} is immutable")));
        }
        let old = self
            .docs
            .get(&id)
            .map(|s| s.doc.clone())
            .ok_or_else(|| CoreError::not_found("document", id.to_string()))?;

        for index in self.indexes.values_mut() {
            index.remove(id, &old);
        }
        if let Err(e) = self.check(id, &doc) {
            for index in self.indexes.values_mut() {
                index.insert(id, &old);
            }
            return Err(e);
        }
        for index in self.indexes.values_mut() {
            index.insert(id, &doc);
        }
        self.clock += 1;
        self.docs.insert(
            id,
            StoredDoc {
                version: self.clock,
                doc,
            },
        );
        Ok(())
    }

    /// Removes a document.
    pub fn remove(&mut self, id: u64) -> Option<Value> {
        let stored = self.docs.remove(&id)?;
        for index in self.indexes.values_mut() {
            index.remove(id, &stored.doc);
        }
        self.clock += 1;
        Some(stored.doc)
    }

    /// Ids of matching documents in `_id` order.
    ///
    /// Equality conditions on indexed fields narrow the scan.
    pub fn find_ids(&self, filter: &Filter) -> Vec<u64> {
        let mut candidates: Option<BTreeSet<u64>> = None;
        for (path, value) in filter.equalities() {
            for index in self.indexes.values() {
                if let Some(ids) = index.lookup(path, value) {
                    let smaller = candidates.as_ref().map_or(true, |c| ids.len() < c.len());
                    if smaller {
                        candidates = Some(ids);
                    }
                }
            }
        }

        match candidates {
            Some(ids) => ids
                .into_iter()
                .filter(|id| self.docs.get(id).is_some_and(|s| filter.matches(&s.doc)))
                .collect(),
            None => self
                .docs
                .iter()
                .filter(|(_, s)| filter.matches(&s.doc))
                .map(|(id, _)| *id)
                .collect(),
        }
    }

    /// Creates an index. Returns `(name, existed)`.
    pub fn create_index(&mut self, spec: IndexSpec) -> CoreResult<(String, bool)> {
        if let Some(existing) = self.indexes.get(&spec.name) {
            if existing.spec() == &spec {
                return Ok((spec.name, true));
            }
            return Err(CoreError::validation(format!(
                "index '{}' already exists with a different definition",
                spec.name
            )));
        }
        if spec.kind == IndexKind::Text
            && self.indexes.values().any(|i| i.spec().kind == IndexKind::Text)
        {
            return Err(CoreError::validation(format!(
                "collection '{}' already has a text index",
                self.name
            )));
        }

        let mut index = Index::new(spec);
        for (id, stored) in &self.docs {
            index.check(*id, &stored.doc).map_err(|e| {
                CoreError::constraint(format!(
                    "cannot build index '{}' over existing documents: {e}",
                    index.spec().name
                ))
            })?;
            index.insert(*id, &stored.doc);
        }
        let name = index.spec().name.clone();
        self.indexes.insert(name.clone(), index);
        Ok((name, false))
    }

    /// Drops an index by name.
    pub fn drop_index(&mut self, name: &str) -> CoreResult<()> {
        self.indexes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found("index", name))
    }

    /// Declarations of all indexes, by name.
    pub fn index_specs(&self) -> Vec<IndexSpec> {
        self.indexes.values().map(|i| i.spec().clone()).collect()
    }

    /// Ranked `(id, score)` pairs from the text index.
    pub fn text_search(&self, query: &str, limit: usize) -> CoreResult<Vec<(u64, f64)>> {
        self.indexes
            .values()
            .find_map(|index| index.text_search(query, limit))
            .ok_or_else(|| CoreError::not_found("text index on collection", self.name.clone()))
    }

    /// Captures the collection for a snapshot file.
    pub fn snapshot(&self) -> CollectionSnapshot {
        CollectionSnapshot {
            name: self.name.clone(),
            next_id: self.next_id,
            indexes: self.index_specs(),
            docs: self.docs.values().map(|s| s.doc.clone()).collect(),
        }
    }

    /// Rebuilds a collection from a snapshot.
    pub fn from_snapshot(snapshot: CollectionSnapshot) -> CoreResult<Self> {
        let mut collection = Collection::new(snapshot.name);
        for doc in snapshot.docs {
            collection.replay(JournalOp::Put { doc })?;
        }
        for spec in snapshot.indexes {
            collection.create_index(spec)?;
        }
        collection.next_id = collection.next_id.max(snapshot.next_id);
        Ok(collection)
    }

    /// Applies one journal record.
    pub fn replay(&mut self, op: JournalOp) -> CoreResult<()> {
        match op {
            JournalOp::Put { doc } => {
                let id = doc_id(&doc)
                    .ok_or_else(|| CoreError::invalid_format("journal record without _id"))?;
                if self.docs.contains_key(&id) {
                    self.replace(id, doc)
                } else {
                    self.insert_prepared(id, doc)
                }
            }
            JournalOp::Delete { id } => {
                self.remove(id);
                Ok(())
            }
            JournalOp::Batch { ops, .. } => ops.into_iter().try_for_each(|op| self.replay(op)),
        }
    }

    /// Next id to be assigned.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_are_assigned_and_never_reused() {
        let mut c = Collection::new("users");
        let a = c.insert(json!({"name": "Ada"})).unwrap();
        let b = c.insert(json!({"name": "Bob"})).unwrap();
        assert_eq!((a, b), (1, 2));
        c.remove(b);
        assert_eq!(c.insert(json!({})).unwrap(), 3);
        assert_eq!(c.get(a).unwrap().doc, json!({"_id": 1, "name": "Ada"}));
    }

    #[test]
    fn explicit_ids() {
        let mut c = Collection::new("c");
        assert_eq!(c.insert(json!({"_id": 10})).unwrap(), 10);
        assert_eq!(c.insert(json!({})).unwrap(), 11);
        assert!(matches!(
            c.insert(json!({"_id": 10})),
            Err(CoreError::Constraint { .. })
        ));
        assert!(matches!(
            c.insert(json!({"_id": "x"})),
            Err(CoreError::Validation { .. })
        ));
        assert!(matches!(c.insert(json!([1])), Err(CoreError::Validation { .. })));
    }

    #[test]
    fn unique_index_enforced() {
        let mut c = Collection::new("users");
        c.insert(json!({"name": "Ada"})).unwrap();
        let spec = IndexSpec::new(IndexKind::Unique, vec!["name".into()]).unwrap();
        assert_eq!(c.create_index(spec.clone()).unwrap(), ("uniq_name".into(), false));
        assert_eq!(c.create_index(spec).unwrap(), ("uniq_name".into(), true));

        let err = c.insert(json!({"name": "Ada"})).unwrap_err();
        assert!(matches!(err, CoreError::Constraint { .. }));
        c.insert(json!({"other": 1})).unwrap();
        c.insert(json!({"other": 2})).unwrap();
    }

    #[test]
    fn unique_index_fails_over_duplicates() {
        let mut c = Collection::new("c");
        c.insert(json!({"k": 1})).unwrap();
        c.insert(json!({"k": 1})).unwrap();
        let spec = IndexSpec::new(IndexKind::Unique, vec!["k".into()]).unwrap();
        assert!(matches!(c.create_index(spec), Err(CoreError::Constraint { .. })));
        assert!(c.index_specs().is_empty());
    }

    #[test]
    fn replace_is_atomic_on_violation() {
        let mut c = Collection::new("c");
        let spec = IndexSpec::new(IndexKind::Unique, vec!["k".into()]).unwrap();
        c.create_index(spec).unwrap();
        let a = c.insert(json!({"k": 1})).unwrap();
        let b = c.insert(json!({"k": 2})).unwrap();
        let version = c.version(b).unwrap();

        assert!(c.replace(b, json!({"_id": b, "k": 1})).is_err());
        assert_eq!(c.version(b), Some(version));
        let filter = Filter::parse(&json!({"k": 2})).unwrap();
        assert_eq!(c.find_ids(&filter), vec![b]);

        c.replace(b, json!({"_id": b, "k": 3})).unwrap();
        assert!(c.version(b).unwrap() > version);
        assert!(c.replace(a, json!({"_id": 99, "k": 5})).is_err());
    }

    #[test]
    fn find_uses_index_candidates() {
        let mut c = Collection::new("c");
        let spec = IndexSpec::new(IndexKind::Single, vec!["color".into()]).unwrap();
        c.create_index(spec).unwrap();
        for color in ["red", "blue", "red"] {
            c.insert(json!({"color": color, "n": 1})).unwrap();
        }
        let filter = Filter::parse(&json!({"color": "red", "n": 1})).unwrap();
        assert_eq!(c.find_ids(&filter), vec![1, 3]);
    }

    #[test]
    fn one_text_index_per_collection() {
        let mut c = Collection::new("docs");
        c.create_index(IndexSpec::new(IndexKind::Text, vec!["title".into()]).unwrap())
            .unwrap();
        let second = IndexSpec::new(IndexKind::Text, vec!["body".into()]).unwrap();
        assert!(matches!(c.create_index(second), Err(CoreError::Validation { .. })));
        c.insert(json!({"title": "the quick brown fox"})).unwrap();
        assert_eq!(c.text_search("quick", 10).unwrap().len(), 1);
    }

    #[test]
    fn drop_unknown_index() {
        let mut c = Collection::new("c");
        assert!(matches!(c.drop_index("idx_x"), Err(CoreError::NotFound { .. })));
        assert!(matches!(c.text_search("x", 1), Err(CoreError::NotFound { .. })));
    }

    #[test]
    fn snapshot_round_trip() {
        let mut c = Collection::new("c");
        c.create_index(IndexSpec::new(IndexKind::Unique, vec!["k".into()]).unwrap())
            .unwrap();
        c.insert(json!({"k": 1})).unwrap();
        let gone = c.insert(json!({"k": 2})).unwrap();
        c.remove(gone);

        let restored = Collection::from_snapshot(c.snapshot()).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.next_id(), 3);
        assert_eq!(restored.index_specs(), c.index_specs());
    }
}

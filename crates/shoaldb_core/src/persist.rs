//! Collection files.
//!
//! Each collection is stored as a snapshot plus a journal of writes made
//! since that snapshot. Journal records use the same length-prefixed
//! framing as the wire protocol; each record body is sealed separately, so
//! a torn final record is detected and dropped on replay.
//! Compaction folds the journal into a fresh snapshot.
//!
//! A transaction writes one [`JournalOp::Batch`] record per collection. When
//! it touches several collections the batches carry the transaction id and
//! only count once that id is in the [`CommitLog`]; batches without a
//! marker are replayed unconditionally.

use crate::collection::Collection;
use crate::dir::{encode_hex, DatabaseDir, JOURNAL_EXT, SNAPSHOT_EXT};
use crate::error::{CoreError, CoreResult};
use crate::index::IndexSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shoaldb_protocol::frame::{encode_frame, read_frame};
use shoaldb_protocol::ProtocolError;
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Cursor};

/// Serialized form of a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    /// Collection name.
    pub name: String,
    /// Next id to assign.
    pub next_id: u64,
    /// Index declarations.
    pub indexes: Vec<IndexSpec>,
    /// Documents in `_id` order.
    pub docs: Vec<Value>,
}

/// One journaled write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalOp {
    /// Insert or replace a document (identified by its `_id`).
    Put {
        /// Full document.
        doc: Value,
    },
    /// Delete a document.
    Delete {
        /// Document id.
        id: u64,
    },
    /// Writes applied as one unit.
    Batch {
        /// Transaction whose commit marker must be present for replay.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        marker: Option<u64>,
        /// The writes, in order.
        ops: Vec<JournalOp>,
    },
}

impl JournalOp {
    /// Number of document writes this record carries.
    pub fn writes(&self) -> usize {
        match self {
            JournalOp::Batch { ops, .. } => ops.iter().map(JournalOp::writes).sum(),
            _ => 1,
        }
    }
}

/// Snapshot and journal files of one collection.
pub struct CollectionStore<'a> {
    dir: &'a DatabaseDir,
    name: &'a str,
}

impl<'a> CollectionStore<'a> {
    /// Addresses the files of collection `name`.
    pub fn new(dir: &'a DatabaseDir, name: &'a str) -> Self {
        Self { dir, name }
    }

    fn snapshot_role(&self) -> String {
        format!("collection:{}", encode_hex(self.name.as_bytes()))
    }

    fn journal_role(&self) -> String {
        format!("journal:{}", encode_hex(self.name.as_bytes()))
    }

    /// Loads the collection, replaying its journal.
    ///
    /// Batches whose marker is not in `committed` are skipped. The flag is
    /// set when the journal held any marked batch.
    pub fn load(&self, committed: &BTreeSet<u64>) -> CoreResult<(Collection, bool)> {
        let snapshot_path = self.dir.collection_path(self.name, SNAPSHOT_EXT);
        let mut collection = match self.dir.read_sealed(&snapshot_path, &self.snapshot_role())? {
            Some(bytes) => {
                let snapshot: CollectionSnapshot = serde_json::from_slice(&bytes)?;
                if snapshot.name != self.name {
                    return Err(CoreError::invalid_format(format!(
                        "snapshot for '{}' holds collection '{}'",
                        self.name, snapshot.name
                    )));
                }
                Collection::from_snapshot(snapshot)?
            }
            None => Collection::new(self.name),
        };

        let ops = self.read_journal()?;
        let replayed = ops.len();
        let mut marked = false;
        for op in ops {
            if let JournalOp::Batch {
                marker: Some(tx), ..
            } = &op
            {
                marked = true;
                if !committed.contains(tx) {
                    tracing::debug!(collection = self.name, tx, "skipping uncommitted batch");
                    continue;
                }
            }
            collection.replay(op)?;
        }
        collection.note_journal(replayed);
        Ok((collection, marked))
    }

    fn read_journal(&self) -> CoreResult<Vec<JournalOp>> {
        let path = self.dir.collection_path(self.name, JOURNAL_EXT);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let role = self.journal_role();
        let mut reader = Cursor::new(data);
        let mut ops = Vec::new();
        loop {
            match read_frame(&mut reader, usize::MAX) {
                Ok(Some(record)) => {
                    let plain = self.dir.unseal(&role, &record)?;
                    ops.push(serde_json::from_slice(&plain)?);
                }
                Ok(None) => break,
                Err(ProtocolError::Truncated) => {
                    tracing::warn!(
                        collection = self.name,
                        records = ops.len(),
                        "dropping torn record at end of journal"
                    );
                    break;
                }
                Err(e) => {
                    return Err(CoreError::invalid_format(format!("unreadable journal: {e}")))
                }
            }
        }
        Ok(ops)
    }

    /// Appends records to the journal.
    pub fn append(&self, ops: &[JournalOp]) -> CoreResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let role = self.journal_role();
        let mut buf = Vec::new();
        for op in ops {
            let sealed = self.dir.seal(&role, &serde_json::to_vec(op)?)?;
            let frame = encode_frame(&sealed, u32::MAX as usize)
                .map_err(|e| CoreError::validation(format!("record too large: {e}")))?;
            buf.extend_from_slice(&frame);
        }
        self.dir
            .append(&self.dir.collection_path(self.name, JOURNAL_EXT), &buf)
    }

    /// Writes a fresh snapshot and discards the journal.
    ///
    /// Returns the snapshot size in bytes.
    pub fn write_snapshot(&self, collection: &Collection) -> CoreResult<u64> {
        let bytes = serde_json::to_vec(&collection.snapshot())?;
        let size = self.dir.write_sealed(
            &self.dir.collection_path(self.name, SNAPSHOT_EXT),
            &self.snapshot_role(),
            &bytes,
        )?;
        self.dir
            .remove_file(&self.dir.collection_path(self.name, JOURNAL_EXT))?;
        Ok(size)
    }

    /// Combined size of snapshot and journal.
    pub fn size(&self) -> u64 {
        self.dir
            .file_size(&self.dir.collection_path(self.name, SNAPSHOT_EXT))
            + self
                .dir
                .file_size(&self.dir.collection_path(self.name, JOURNAL_EXT))
    }

    /// Deletes both files. Returns whether any existed.
    pub fn remove(&self) -> CoreResult<bool> {
        let snapshot = self
            .dir
            .remove_file(&self.dir.collection_path(self.name, SNAPSHOT_EXT))?;
        let journal = self
            .dir
            .remove_file(&self.dir.collection_path(self.name, JOURNAL_EXT))?;
        Ok(snapshot || journal)
    }
}

/// Commit markers of transactions spanning several collections.
///
/// The file is emptied once every journal that could hold a marked batch
/// has been folded into a snapshot.
pub struct CommitLog<'a> {
    dir: &'a DatabaseDir,
}

impl<'a> CommitLog<'a> {
    const ROLE: &'static str = "commits";

    /// Addresses the commit log of `dir`.
    pub fn new(dir: &'a DatabaseDir) -> Self {
        Self { dir }
    }

    /// Ids of committed transactions.
    pub fn load(&self) -> CoreResult<BTreeSet<u64>> {
        let data = match fs::read(self.dir.commit_log_path()) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };
        let mut reader = Cursor::new(data);
        let mut committed = BTreeSet::new();
        loop {
            match read_frame(&mut reader, usize::MAX) {
                Ok(Some(record)) => {
                    let plain = self.dir.unseal(Self::ROLE, &record)?;
                    let bytes: [u8; 8] = plain.as_slice().try_into().map_err(|_| {
                        CoreError::invalid_format("commit marker is not 8 bytes")
                    })?;
                    committed.insert(u64::from_be_bytes(bytes));
                }
                Ok(None) => break,
                Err(ProtocolError::Truncated) => {
                    tracing::warn!("dropping torn commit marker");
                    break;
                }
                Err(e) => {
                    return Err(CoreError::invalid_format(format!("unreadable commit log: {e}")))
                }
            }
        }
        Ok(committed)
    }

    /// Records that transaction `tx` committed. This is the commit point.
    pub fn mark(&self, tx: u64) -> CoreResult<()> {
        let sealed = self.dir.seal(Self::ROLE, &tx.to_be_bytes())?;
        let frame = encode_frame(&sealed, u32::MAX as usize)
            .map_err(|e| CoreError::internal(format!("commit marker: {e}")))?;
        self.dir.append(&self.dir.commit_log_path(), &frame)
    }

    /// Deletes the log.
    pub fn clear(&self) -> CoreResult<()> {
        self.dir.remove_file(&self.dir.commit_log_path())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CryptoManager, EncryptionKey};
    use crate::index::{IndexKind, IndexSpec};
    use serde_json::json;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn journal_replay_rebuilds_state() {
        let temp = tempdir().unwrap();
        let dir = DatabaseDir::open(temp.path(), true, false).unwrap();
        let store = CollectionStore::new(&dir, "users");

        store
            .append(&[
                JournalOp::Put {
                    doc: json!({"_id": 1, "name": "Ada"}),
                },
                JournalOp::Put {
                    doc: json!({"_id": 2, "name": "Bob"}),
                },
                JournalOp::Put {
                    doc: json!({"_id": 1, "name": "Ada L."}),
                },
                JournalOp::Delete { id: 2 },
                JournalOp::Batch {
                    marker: None,
                    ops: vec![JournalOp::Put {
                        doc: json!({"_id": 6, "name": "Cy"}),
                    }],
                },
            ])
            .unwrap();

        let c = store.load(&BTreeSet::new()).unwrap().0;
        assert_eq!(c.len(), 2);
        assert_eq!(c.get(1).unwrap().doc, json!({"_id": 1, "name": "Ada L."}));
        assert_eq!(c.next_id(), 7);
        assert_eq!(c.journal_len(), 5);
    }

    #[test]
    fn marked_batches_need_a_commit_marker() {
        let temp = tempdir().unwrap();
        let dir = DatabaseDir::open(temp.path(), true, false).unwrap();
        let store = CollectionStore::new(&dir, "c");
        let batch = |tx: u64, id: u64| JournalOp::Batch {
            marker: Some(tx),
            ops: vec![JournalOp::Put {
                doc: json!({"_id": id}),
            }],
        };
        store.append(&[batch(4, 1), batch(5, 2)]).unwrap();

        let log = CommitLog::new(&dir);
        log.mark(5).unwrap();
        let committed = log.load().unwrap();
        assert_eq!(committed, BTreeSet::from([5]));

        let (c, marked) = store.load(&committed).unwrap();
        assert!(marked);
        assert!(c.get(1).is_none());
        assert!(c.get(2).is_some());

        log.clear().unwrap();
        assert!(log.load().unwrap().is_empty());
    }

    #[test]
    fn sealed_commit_log() {
        let temp = tempdir().unwrap();
        let mut dir = DatabaseDir::open(temp.path(), true, false).unwrap();
        dir.set_crypto(Some(CryptoManager::new(&EncryptionKey::generate())));
        let log = CommitLog::new(&dir);
        log.mark(u64::MAX).unwrap();
        log.mark(3).unwrap();
        assert_eq!(log.load().unwrap(), BTreeSet::from([3, u64::MAX]));
    }

    #[test]
    fn snapshot_truncates_journal() {
        let temp = tempdir().unwrap();
        let dir = DatabaseDir::open(temp.path(), true, false).unwrap();
        let store = CollectionStore::new(&dir, "c");

        let mut c = Collection::new("c");
        c.create_index(IndexSpec::new(IndexKind::Single, vec!["k".into()]).unwrap())
            .unwrap();
        for k in 0..10 {
            let id = c.insert(json!({"k": k})).unwrap();
            store
                .append(&[JournalOp::Put {
                    doc: c.get(id).unwrap().doc.clone(),
                }])
                .unwrap();
        }
        let before = store.size();
        let after = store.write_snapshot(&c).unwrap();
        assert!(after > 0);
        assert_eq!(store.size(), after);
        assert!(before > 0);

        let loaded = store.load(&BTreeSet::new()).unwrap().0;
        assert_eq!(loaded.len(), 10);
        assert_eq!(loaded.index_specs().len(), 1);
        assert_eq!(loaded.journal_len(), 0);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let temp = tempdir().unwrap();
        let dir = DatabaseDir::open(temp.path(), true, false).unwrap();
        let store = CollectionStore::new(&dir, "c");
        store
            .append(&[JournalOp::Put {
                doc: json!({"_id": 1}),
            }])
            .unwrap();

        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.collection_path("c", JOURNAL_EXT))
            .unwrap();
        file.write_all(&[0, 0, 0, 50, b'{']).unwrap();

        assert_eq!(store.load(&BTreeSet::new()).unwrap().0.len(), 1);
    }

    #[test]
    fn sealed_journal() {
        let temp = tempdir().unwrap();
        let mut dir = DatabaseDir::open(temp.path(), true, false).unwrap();
        dir.set_crypto(Some(CryptoManager::new(&EncryptionKey::generate())));
        let store = CollectionStore::new(&dir, "secret");
        store
            .append(&[JournalOp::Put {
                doc: json!({"_id": 1, "ssn": "123-45-6789"}),
            }])
            .unwrap();

        let raw = fs::read(dir.collection_path("secret", JOURNAL_EXT)).unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("123-45-6789"));
        assert_eq!(store.load(&BTreeSet::new()).unwrap().0.len(), 1);
    }
}

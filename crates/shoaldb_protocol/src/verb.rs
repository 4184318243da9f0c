//! The verb catalog.

use std::fmt;

/// Every operation understood at the boundary.
///
/// Both the embedded handle (`execute`) and the remote connection speak
/// exactly this vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Verb {
    /// Health check.
    Ping,
    /// Log the session in with a user name and password.
    Auth,
    /// Insert one document.
    Insert,
    /// Insert an array of documents.
    InsertMany,
    /// Find all matching documents.
    Find,
    /// Find the first matching document.
    FindOne,
    /// Update all matching documents.
    Update,
    /// Update the first matching document.
    UpdateOne,
    /// Delete all matching documents.
    Delete,
    /// Delete the first matching document.
    DeleteOne,
    /// Count documents.
    Count,
    /// Create a collection explicitly.
    CreateCollection,
    /// List collection names.
    ListCollections,
    /// Drop a collection with its indexes.
    DropCollection,
    /// Reclaim space held by a collection.
    Compact,
    /// Run an aggregation pipeline.
    Aggregate,
    /// Create a single-field index.
    CreateIndex,
    /// Create a single-field unique index.
    CreateUniqueIndex,
    /// Create an ordered multi-field index.
    CreateCompositeIndex,
    /// Create a full-text index.
    CreateTextIndex,
    /// List the indexes of a collection.
    ListIndexes,
    /// Drop an index by name.
    DropIndex,
    /// Ranked search within one collection.
    TextSearch,
    /// Ranked search over blob objects.
    Search,
    /// Create a blob bucket.
    CreateBucket,
    /// List blob buckets.
    ListBuckets,
    /// Delete a blob bucket and its objects.
    DeleteBucket,
    /// Store a blob object.
    PutObject,
    /// Fetch a blob object with its payload.
    GetObject,
    /// Fetch blob object metadata only.
    HeadObject,
    /// Delete a blob object.
    DeleteObject,
    /// List blob objects by key.
    ListObjects,
    /// Open a transaction on the session.
    BeginTx,
    /// Commit the session transaction.
    CommitTx,
    /// Discard the session transaction.
    RollbackTx,
}

impl Verb {
    /// The full catalog.
    pub const ALL: [Verb; 35] = [
        Verb::Ping,
        Verb::Auth,
        Verb::Insert,
        Verb::InsertMany,
        Verb::Find,
        Verb::FindOne,
        Verb::Update,
        Verb::UpdateOne,
        Verb::Delete,
        Verb::DeleteOne,
        Verb::Count,
        Verb::CreateCollection,
        Verb::ListCollections,
        Verb::DropCollection,
        Verb::Compact,
        Verb::Aggregate,
        Verb::CreateIndex,
        Verb::CreateUniqueIndex,
        Verb::CreateCompositeIndex,
        Verb::CreateTextIndex,
        Verb::ListIndexes,
        Verb::DropIndex,
        Verb::TextSearch,
        Verb::Search,
        Verb::CreateBucket,
        Verb::ListBuckets,
        Verb::DeleteBucket,
        Verb::PutObject,
        Verb::GetObject,
        Verb::HeadObject,
        Verb::DeleteObject,
        Verb::ListObjects,
        Verb::BeginTx,
        Verb::CommitTx,
        Verb::RollbackTx,
    ];

    /// Returns the wire name used in the `op` field.
    pub fn name(self) -> &'static str {
        match self {
            Verb::Ping => "ping",
            Verb::Auth => "auth",
            Verb::Insert => "insert",
            Verb::InsertMany => "insert_many",
            Verb::Find => "find",
            Verb::FindOne => "find_one",
            Verb::Update => "update",
            Verb::UpdateOne => "update_one",
            Verb::Delete => "delete",
            Verb::DeleteOne => "delete_one",
            Verb::Count => "count",
            Verb::CreateCollection => "create_collection",
            Verb::ListCollections => "list_collections",
            Verb::DropCollection => "drop_collection",
            Verb::Compact => "compact",
            Verb::Aggregate => "aggregate",
            Verb::CreateIndex => "create_index",
            Verb::CreateUniqueIndex => "create_unique_index",
            Verb::CreateCompositeIndex => "create_composite_index",
            Verb::CreateTextIndex => "create_text_index",
            Verb::ListIndexes => "list_indexes",
            Verb::DropIndex => "drop_index",
            Verb::TextSearch => "text_search",
            Verb::Search => "search",
            Verb::CreateBucket => "create_bucket",
            Verb::ListBuckets => "list_buckets",
            Verb::DeleteBucket => "delete_bucket",
            Verb::PutObject => "put_object",
            Verb::GetObject => "get_object",
            Verb::HeadObject => "head_object",
            Verb::DeleteObject => "delete_object",
            Verb::ListObjects => "list_objects",
            Verb::BeginTx => "begin_tx",
            Verb::CommitTx => "commit_tx",
            Verb::RollbackTx => "rollback_tx",
        }
    }

    /// Looks up a verb by its wire name.
    pub fn from_name(name: &str) -> Option<Verb> {
        Verb::ALL.into_iter().find(|verb| verb.name() == name)
    }

    /// Returns false for the verbs a session may run before logging in.
    pub fn requires_auth(self) -> bool {
        !matches!(self, Verb::Ping | Verb::Auth)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique_and_round_trip() {
        let mut seen = HashSet::new();
        for verb in Verb::ALL {
            assert!(seen.insert(verb.name()), "duplicate name {}", verb.name());
            assert_eq!(Verb::from_name(verb.name()), Some(verb));
        }
    }

    #[test]
    fn unknown_name() {
        assert_eq!(Verb::from_name("vector_search"), None);
        assert_eq!(Verb::from_name("PING"), None);
    }

    #[test]
    fn only_ping_and_auth_skip_login() {
        let open: Vec<Verb> = Verb::ALL.into_iter().filter(|v| !v.requires_auth()).collect();
        assert_eq!(open, vec![Verb::Ping, Verb::Auth]);
    }
}

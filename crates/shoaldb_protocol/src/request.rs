//! Typed requests.
//!
//! A request on the wire is a JSON object whose `op` field names a
//! [`Verb`]; the remaining fields are the verb's arguments. [`Request`]
//! is the decoded form the engine dispatches on.

use crate::kind::ErrorKind;
use crate::verb::Verb;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Why a request could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct RequestError {
    /// Envelope kind to report.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl RequestError {
    /// Creates a request error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a `validation` error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// A decoded command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
#[allow(missing_docs)] // Field names mirror the wire format
pub enum Request {
    Ping,
    Auth {
        user: String,
        password: String,
    },
    Insert {
        collection: String,
        doc: Value,
    },
    InsertMany {
        collection: String,
        docs: Value,
    },
    Find {
        collection: String,
        #[serde(default = "empty_object")]
        query: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sort: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        skip: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u64>,
    },
    FindOne {
        collection: String,
        #[serde(default = "empty_object")]
        query: Value,
    },
    Update {
        collection: String,
        query: Value,
        update: Value,
    },
    UpdateOne {
        collection: String,
        query: Value,
        update: Value,
    },
    Delete {
        collection: String,
        query: Value,
    },
    DeleteOne {
        collection: String,
        query: Value,
    },
    Count {
        collection: String,
        #[serde(default = "empty_object")]
        query: Value,
    },
    CreateCollection {
        collection: String,
    },
    ListCollections,
    DropCollection {
        collection: String,
    },
    Compact {
        collection: String,
    },
    Aggregate {
        collection: String,
        pipeline: Value,
    },
    CreateIndex {
        collection: String,
        field: String,
    },
    CreateUniqueIndex {
        collection: String,
        field: String,
    },
    CreateCompositeIndex {
        collection: String,
        fields: Vec<String>,
    },
    CreateTextIndex {
        collection: String,
        fields: Vec<String>,
    },
    ListIndexes {
        collection: String,
    },
    DropIndex {
        collection: String,
        index: String,
    },
    TextSearch {
        collection: String,
        query: String,
        #[serde(default)]
        limit: i64,
    },
    Search {
        query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bucket: Option<String>,
        #[serde(default)]
        limit: i64,
    },
    CreateBucket {
        bucket: String,
    },
    ListBuckets,
    DeleteBucket {
        bucket: String,
    },
    PutObject {
        bucket: String,
        key: String,
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<BTreeMap<String, String>>,
    },
    GetObject {
        bucket: String,
        key: String,
    },
    HeadObject {
        bucket: String,
        key: String,
    },
    DeleteObject {
        bucket: String,
        key: String,
    },
    ListObjects {
        bucket: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
        #[serde(default)]
        limit: i64,
    },
    BeginTx,
    CommitTx,
    RollbackTx,
}

impl Request {
    /// Decodes request text.
    ///
    /// Unparseable text is a `parse` error, an unknown `op` is
    /// `unsupported`, and arguments of the wrong shape are `validation`.
    pub fn parse(text: &str) -> Result<Request, RequestError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RequestError::new(ErrorKind::Parse, format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Decodes an already-parsed request object.
    pub fn from_value(value: Value) -> Result<Request, RequestError> {
        let op = match &value {
            Value::Object(map) => match map.get("op") {
                Some(Value::String(op)) => op.clone(),
                Some(_) => return Err(RequestError::validation("'op' must be a string")),
                None => return Err(RequestError::validation("missing 'op' field")),
            },
            _ => return Err(RequestError::validation("request must be a JSON object")),
        };

        if Verb::from_name(&op).is_none() {
            return Err(RequestError::new(
                ErrorKind::Unsupported,
                format!("unknown verb: {op}"),
            ));
        }

        serde_json::from_value(value)
            .map_err(|e| RequestError::validation(format!("invalid arguments for '{op}': {e}")))
    }

    /// Returns the verb of this request.
    pub fn verb(&self) -> Verb {
        match self {
            Request::Ping => Verb::Ping,
            Request::Auth { .. } => Verb::Auth,
            Request::Insert { .. } => Verb::Insert,
            Request::InsertMany { .. } => Verb::InsertMany,
            Request::Find { .. } => Verb::Find,
            Request::FindOne { .. } => Verb::FindOne,
            Request::Update { .. } => Verb::Update,
            Request::UpdateOne { .. } => Verb::UpdateOne,
            Request::Delete { .. } => Verb::Delete,
            Request::DeleteOne { .. } => Verb::DeleteOne,
            Request::Count { .. } => Verb::Count,
            Request::CreateCollection { .. } => Verb::CreateCollection,
            Request::ListCollections => Verb::ListCollections,
            Request::DropCollection { .. } => Verb::DropCollection,
            Request::Compact { .. } => Verb::Compact,
            Request::Aggregate { .. } => Verb::Aggregate,
            Request::CreateIndex { .. } => Verb::CreateIndex,
            Request::CreateUniqueIndex { .. } => Verb::CreateUniqueIndex,
            Request::CreateCompositeIndex { .. } => Verb::CreateCompositeIndex,
            Request::CreateTextIndex { .. } => Verb::CreateTextIndex,
            Request::ListIndexes { .. } => Verb::ListIndexes,
            Request::DropIndex { .. } => Verb::DropIndex,
            Request::TextSearch { .. } => Verb::TextSearch,
            Request::Search { .. } => Verb::Search,
            Request::CreateBucket { .. } => Verb::CreateBucket,
            Request::ListBuckets => Verb::ListBuckets,
            Request::DeleteBucket { .. } => Verb::DeleteBucket,
            Request::PutObject { .. } => Verb::PutObject,
            Request::GetObject { .. } => Verb::GetObject,
            Request::HeadObject { .. } => Verb::HeadObject,
            Request::DeleteObject { .. } => Verb::DeleteObject,
            Request::ListObjects { .. } => Verb::ListObjects,
            Request::BeginTx => Verb::BeginTx,
            Request::CommitTx => Verb::CommitTx,
            Request::RollbackTx => Verb::RollbackTx,
        }
    }
}

/// One sort key of a find.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Dotted field path.
    pub field: String,
    /// Sort descending instead of ascending.
    pub descending: bool,
}

impl SortKey {
    /// Parses a sort specification such as `{"age": -1, "name": 1}`.
    pub fn parse_spec(value: &Value) -> Result<Vec<SortKey>, RequestError> {
        parse_sort(value)
    }
}

/// Ordering and paging applied after matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    /// Sort keys, most significant first.
    pub sort: Vec<SortKey>,
    /// Number of matches to skip.
    pub skip: Option<u64>,
    /// Maximum number of matches to return.
    pub limit: Option<u64>,
}

impl FindOptions {
    /// Separates `$sort`/`$skip`/`$limit` directives from a query object and
    /// merges them with top-level request options. Top-level options win.
    ///
    /// Returns the query with the directives removed.
    pub fn resolve(
        query: &Value,
        sort: Option<&Value>,
        skip: Option<u64>,
        limit: Option<u64>,
    ) -> Result<(Value, FindOptions), RequestError> {
        let mut options = FindOptions::default();
        let mut filter = query.clone();

        if let Value::Object(map) = &mut filter {
            if let Some(directive) = map.remove("$sort") {
                options.sort = parse_sort(&directive)?;
            }
            if let Some(directive) = map.remove("$skip") {
                options.skip = Some(parse_count("$skip", &directive)?);
            }
            if let Some(directive) = map.remove("$limit") {
                options.limit = Some(parse_count("$limit", &directive)?);
            }
        }

        if let Some(sort) = sort {
            options.sort = parse_sort(sort)?;
        }
        if skip.is_some() {
            options.skip = skip;
        }
        if limit.is_some() {
            options.limit = limit;
        }

        Ok((filter, options))
    }
}

fn parse_sort(value: &Value) -> Result<Vec<SortKey>, RequestError> {
    let map = value
        .as_object()
        .ok_or_else(|| RequestError::validation("sort must be an object of field: 1 | -1"))?;
    map.iter()
        .map(|(field, direction)| match direction.as_i64() {
            Some(1) => Ok(SortKey {
                field: field.clone(),
                descending: false,
            }),
            Some(-1) => Ok(SortKey {
                field: field.clone(),
                descending: true,
            }),
            _ => Err(RequestError::validation(format!(
                "sort direction for '{field}' must be 1 or -1"
            ))),
        })
        .collect()
}

fn parse_count(name: &str, value: &Value) -> Result<u64, RequestError> {
    value
        .as_u64()
        .ok_or_else(|| RequestError::validation(format!("{name} must be a non-negative integer")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_insert() {
        let request =
            Request::parse(r#"{"op":"insert","collection":"users","doc":{"name":"Ada"}}"#).unwrap();
        assert_eq!(
            request,
            Request::Insert {
                collection: "users".into(),
                doc: json!({"name": "Ada"}),
            }
        );
        assert_eq!(request.verb(), Verb::Insert);
    }

    #[test]
    fn unit_verbs() {
        assert_eq!(Request::parse(r#"{"op":"ping"}"#).unwrap(), Request::Ping);
        assert_eq!(
            Request::parse(r#"{"op":"rollback_tx"}"#).unwrap(),
            Request::RollbackTx
        );
    }

    #[test]
    fn parse_auth() {
        let request = Request::parse(r#"{"op":"auth","user":"ada","password":"pw"}"#).unwrap();
        assert_eq!(
            request,
            Request::Auth {
                user: "ada".into(),
                password: "pw".into(),
            }
        );
        let err = Request::parse(r#"{"op":"auth","user":"ada"}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn defaults_apply() {
        let request = Request::parse(r#"{"op":"find","collection":"c"}"#).unwrap();
        match request {
            Request::Find { query, limit, .. } => {
                assert_eq!(query, json!({}));
                assert_eq!(limit, None);
            }
            other => panic!("unexpected {other:?}"),
        }

        let request = Request::parse(r#"{"op":"text_search","collection":"c","query":"fox"}"#)
            .unwrap();
        assert!(matches!(request, Request::TextSearch { limit: 0, .. }));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = Request::parse(r#"{"op":"insert","collection":"c","doc":{"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }

    #[test]
    fn unknown_verb_is_unsupported() {
        let err = Request::parse(r#"{"op":"vector_search"}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unsupported);
    }

    #[test]
    fn missing_op_and_bad_shapes_are_validation() {
        assert_eq!(
            Request::parse(r#"{"collection":"c"}"#).unwrap_err().kind,
            ErrorKind::Validation
        );
        assert_eq!(Request::parse("[1,2]").unwrap_err().kind, ErrorKind::Validation);
        assert_eq!(
            Request::parse(r#"{"op":"insert"}"#).unwrap_err().kind,
            ErrorKind::Validation
        );
        assert_eq!(
            Request::parse(r#"{"op":"create_composite_index","collection":"c","fields":[1]}"#)
                .unwrap_err()
                .kind,
            ErrorKind::Validation
        );
    }

    #[test]
    fn serialization_uses_op_tag() {
        let value = serde_json::to_value(Request::DropIndex {
            collection: "c".into(),
            index: "idx_a".into(),
        })
        .unwrap();
        assert_eq!(
            value,
            json!({"op": "drop_index", "collection": "c", "index": "idx_a"})
        );
    }

    #[test]
    fn find_options_from_query_directives() {
        let (filter, options) = FindOptions::resolve(
            &json!({"age": {"$gt": 3}, "$limit": 2, "$sort": {"age": -1}}),
            None,
            None,
            None,
        )
        .unwrap();
        assert_eq!(filter, json!({"age": {"$gt": 3}}));
        assert_eq!(options.limit, Some(2));
        assert_eq!(
            options.sort,
            vec![SortKey {
                field: "age".into(),
                descending: true
            }]
        );
    }

    #[test]
    fn top_level_options_override_directives() {
        let (_, options) =
            FindOptions::resolve(&json!({"$limit": 2}), None, Some(1), Some(5)).unwrap();
        assert_eq!(options.limit, Some(5));
        assert_eq!(options.skip, Some(1));
    }

    #[test]
    fn bad_sort_direction() {
        let err = FindOptions::resolve(&json!({}), Some(&json!({"a": 2})), None, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }
}

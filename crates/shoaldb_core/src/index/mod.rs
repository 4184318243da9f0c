//! Secondary indexes.
//!
//! # Index Types
//!
//! - `single`: ordered index over one field
//! - `unique`: single-field index rejecting duplicate values
//! - `composite`: ordered index over several fields, order significant
//! - `text`: ranked full-text index over string fields
//!
//! Index names are derived from kind and fields (`idx_age`,
//! `uniq_email`, `idx_last_first`, `text_title_body`).

mod field;
mod text;

pub use field::FieldIndex;
pub use text::{TextIndex, TokenizerConfig};

use crate::document::lookup_all;
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Kind of a secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Single-field index.
    Single,
    /// Single-field unique index.
    Unique,
    /// Multi-field index.
    Composite,
    /// Full-text index.
    Text,
}

impl IndexKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            IndexKind::Single => "single",
            IndexKind::Unique => "unique",
            IndexKind::Composite => "composite",
            IndexKind::Text => "text",
        }
    }
}

/// Declaration of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Index name, unique within a collection.
    pub name: String,
    /// Index kind.
    pub kind: IndexKind,
    /// Indexed field paths.
    pub fields: Vec<String>,
}

impl IndexSpec {
    /// Builds and validates a spec, deriving its name.
    pub fn new(kind: IndexKind, fields: Vec<String>) -> CoreResult<Self> {
        if fields.is_empty() {
            return Err(CoreError::validation("index needs at least one field"));
        }
        if let Some(bad) = fields.iter().find(|f| f.is_empty() || f.starts_with('$')) {
            return Err(CoreError::validation(format!("invalid index field '{bad}'")));
        }
        match kind {
            IndexKind::Single | IndexKind::Unique if fields.len() != 1 => {
                return Err(CoreError::validation(format!(
                    "{} index takes exactly one field",
                    kind.as_str()
                )))
            }
            IndexKind::Composite if fields.len() < 2 => {
                return Err(CoreError::validation(
                    "composite index takes at least two fields",
                ))
            }
            _ => {}
        }
        let unique: BTreeSet<&String> = fields.iter().collect();
        if unique.len() != fields.len() {
            return Err(CoreError::validation("index fields must be distinct"));
        }

        let prefix = match kind {
            IndexKind::Single | IndexKind::Composite => "idx",
            IndexKind::Unique => "uniq",
            IndexKind::Text => "text",
        };
        Ok(Self {
            name: format!("{prefix}_{}", fields.join("_")),
            kind,
            fields,
        })
    }
}

#[derive(Debug, Clone)]
enum IndexBody {
    Field(FieldIndex),
    Text(TextIndex<u64>),
}

/// A live index of one collection.
#[derive(Debug, Clone)]
pub struct Index {
    spec: IndexSpec,
    body: IndexBody,
}

impl Index {
    /// Creates an empty index for `spec`.
    pub fn new(spec: IndexSpec) -> Self {
        let body = match spec.kind {
            IndexKind::Single | IndexKind::Composite => {
                IndexBody::Field(FieldIndex::new(spec.fields.clone(), false))
            }
            IndexKind::Unique => IndexBody::Field(FieldIndex::new(spec.fields.clone(), true)),
            IndexKind::Text => IndexBody::Text(TextIndex::default()),
        };
        Self { spec, body }
    }

    /// The index declaration.
    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    /// Fails if adding `doc` as `id` would violate this index.
    pub fn check(&self, id: u64, doc: &Value) -> CoreResult<()> {
        match &self.body {
            IndexBody::Field(index) => index.check(id, doc, &self.spec.name),
            IndexBody::Text(_) => Ok(()),
        }
    }

    /// Adds a document.
    pub fn insert(&mut self, id: u64, doc: &Value) {
        match &mut self.body {
            IndexBody::Field(index) => index.insert(id, doc),
            IndexBody::Text(index) => index.insert(id, &text_of(doc, &self.spec.fields)),
        }
    }

    /// Removes a document.
    pub fn remove(&mut self, id: u64, doc: &Value) {
        match &mut self.body {
            IndexBody::Field(index) => index.remove(id, doc),
            IndexBody::Text(index) => {
                index.remove(&id);
            }
        }
    }

    /// Candidate ids for `path == value`, if this index can answer.
    pub fn lookup(&self, path: &str, value: &Value) -> Option<BTreeSet<u64>> {
        match &self.body {
            IndexBody::Field(index) => index.lookup(path, value),
            IndexBody::Text(_) => None,
        }
    }

    /// Ranked ids for a text query. `None` for non-text indexes.
    pub fn text_search(&self, query: &str, limit: usize) -> Option<Vec<(u64, f64)>> {
        match &self.body {
            IndexBody::Text(index) => Some(index.search(query, limit)),
            IndexBody::Field(_) => None,
        }
    }
}

/// Concatenates the string content of `fields`.
fn text_of(doc: &Value, fields: &[String]) -> String {
    let mut parts = Vec::new();
    for field in fields {
        for value in lookup_all(doc, field) {
            match value {
                Value::String(s) => parts.push(s.as_str()),
                Value::Array(items) => parts.extend(items.iter().filter_map(Value::as_str)),
                _ => {}
            }
        }
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn names_follow_kind() {
        let names: Vec<String> = [
            (IndexKind::Single, vec!["age"]),
            (IndexKind::Unique, vec!["email"]),
            (IndexKind::Composite, vec!["last", "first"]),
            (IndexKind::Text, vec!["title", "body"]),
        ]
        .into_iter()
        .map(|(kind, fields)| {
            IndexSpec::new(kind, fields.into_iter().map(String::from).collect())
                .unwrap()
                .name
        })
        .collect();
        assert_eq!(
            names,
            vec!["idx_age", "uniq_email", "idx_last_first", "text_title_body"]
        );
    }

    #[test]
    fn spec_validation() {
        assert!(IndexSpec::new(IndexKind::Single, vec![]).is_err());
        assert!(IndexSpec::new(IndexKind::Unique, vec!["a".into(), "b".into()]).is_err());
        assert!(IndexSpec::new(IndexKind::Composite, vec!["a".into()]).is_err());
        assert!(IndexSpec::new(IndexKind::Composite, vec!["a".into(), "a".into()]).is_err());
        assert!(IndexSpec::new(IndexKind::Text, vec!["$x".into()]).is_err());
    }

    #[test]
    fn text_index_covers_string_arrays() {
        let spec = IndexSpec::new(IndexKind::Text, vec!["title".into(), "tags".into()]).unwrap();
        let mut index = Index::new(spec);
        index.insert(1, &json!({"title": "Rust notes", "tags": ["systems", 3]}));
        assert_eq!(index.text_search("systems", 10).unwrap().len(), 1);
        index.remove(1, &json!({}));
        assert!(index.text_search("systems", 10).unwrap().is_empty());
        assert!(index.lookup("title", &json!("Rust notes")).is_none());
    }
}

//! Ordered field index (single, unique and composite).

use crate::document::{get_path, lookup_all};
use crate::error::{CoreError, CoreResult};
use crate::value::OrdValue;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Ordered map from field values to document ids.
///
/// Single-field indexes are multikey: a document whose field holds an array
/// is indexed under the array and under each element, matching how equality
/// queries treat arrays.
#[derive(Debug, Clone)]
pub struct FieldIndex {
    fields: Vec<String>,
    unique: bool,
    entries: BTreeMap<Vec<OrdValue>, BTreeSet<u64>>,
}

impl FieldIndex {
    /// Creates an empty index over `fields`.
    pub fn new(fields: Vec<String>, unique: bool) -> Self {
        Self {
            fields,
            unique,
            entries: BTreeMap::new(),
        }
    }

    /// Keys under which `doc` is indexed.
    fn keys_for(&self, doc: &Value) -> Vec<Vec<OrdValue>> {
        let mut keys = BTreeSet::new();
        if let [field] = self.fields.as_slice() {
            let values = lookup_all(doc, field);
            if values.is_empty() && !self.unique {
                keys.insert(vec![OrdValue(Value::Null)]);
            }
            for value in values {
                if let Value::Array(items) = value {
                    for item in items {
                        keys.insert(vec![OrdValue(item.clone())]);
                    }
                }
                keys.insert(vec![OrdValue(value.clone())]);
            }
        } else {
            let key = self
                .fields
                .iter()
                .map(|f| OrdValue(get_path(doc, f).cloned().unwrap_or(Value::Null)))
                .collect();
            keys.insert(key);
        }
        keys.into_iter().collect()
    }

    /// Fails if indexing `doc` as `id` would break uniqueness.
    pub fn check(&self, id: u64, doc: &Value, index_name: &str) -> CoreResult<()> {
        if !self.unique {
            return Ok(());
        }
        for key in self.keys_for(doc) {
            if let Some(ids) = self.entries.get(&key) {
                if ids.iter().any(|&other| other != id) {
                    let shown: Vec<&Value> = key.iter().map(|k| &k.0).collect();
                    return Err(CoreError::constraint(format!(
                        "duplicate value {} for unique index '{index_name}'",
                        display_key(&shown)
                    )));
                }
            }
        }
        Ok(())
    }

    /// Adds `doc` under `id`.
    pub fn insert(&mut self, id: u64, doc: &Value) {
        for key in self.keys_for(doc) {
            self.entries.entry(key).or_default().insert(id);
        }
    }

    /// Removes `doc` from under `id`.
    pub fn remove(&mut self, id: u64, doc: &Value) {
        for key in self.keys_for(doc) {
            if let Some(ids) = self.entries.get_mut(&key) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
    }

    /// Ids of documents whose single indexed field equals `value`.
    ///
    /// `None` if this index cannot answer for `path`.
    pub fn lookup(&self, path: &str, value: &Value) -> Option<BTreeSet<u64>> {
        match self.fields.as_slice() {
            [field] if field == path && !value.is_null() => Some(
                self.entries
                    .get(&vec![OrdValue(value.clone())])
                    .cloned()
                    .unwrap_or_default(),
            ),
            _ => None,
        }
    }

    /// Number of distinct keys.
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }
}

fn display_key(values: &[&Value]) -> String {
    match values {
        [single] => single.to_string(),
        many => Value::Array(many.iter().map(|v| (*v).clone()).collect()).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn multikey_lookup() {
        let mut index = FieldIndex::new(vec!["tags".into()], false);
        index.insert(1, &json!({"tags": ["a", "b"]}));
        index.insert(2, &json!({"tags": "a"}));
        index.insert(3, &json!({}));

        let hits = index.lookup("tags", &json!("a")).unwrap();
        assert_eq!(hits.into_iter().collect::<Vec<_>>(), vec![1, 2]);
        assert!(index.lookup("other", &json!("a")).is_none());
        assert!(index.lookup("tags", &json!(null)).is_none());
    }

    #[test]
    fn unique_rejects_duplicates_but_not_missing() {
        let mut index = FieldIndex::new(vec!["email".into()], true);
        index.insert(1, &json!({"email": "a@x"}));
        assert!(index.check(2, &json!({"email": "a@x"}), "uniq_email").is_err());
        assert!(index.check(1, &json!({"email": "a@x"}), "uniq_email").is_ok());
        index.insert(2, &json!({}));
        assert!(index.check(3, &json!({}), "uniq_email").is_ok());
    }

    #[test]
    fn remove_cleans_keys() {
        let mut index = FieldIndex::new(vec!["a".into(), "b".into()], false);
        index.insert(1, &json!({"a": 1, "b": 2}));
        assert_eq!(index.key_count(), 1);
        index.remove(1, &json!({"a": 1, "b": 2}));
        assert_eq!(index.key_count(), 0);
    }
}

//! Document helpers: identity and dotted field paths.

use crate::error::{CoreError, CoreResult};
use serde_json::{Map, Value};

/// Name of the identity field.
pub const ID_FIELD: &str = "_id";

/// Reads the identity of a stored document.
pub fn doc_id(doc: &Value) -> Option<u64> {
    doc.get(ID_FIELD).and_then(Value::as_u64)
}

/// Validates a caller-supplied `_id` value.
pub fn parse_id(value: &Value) -> CoreResult<u64> {
    value.as_u64().ok_or_else(|| {
        CoreError::validation(format!(
            "{ID_FIELD} must be a non-negative integer, got {value}"
        ))
    })
}

/// Requires a JSON object.
pub fn expect_object<'a>(value: &'a Value, what: &str) -> CoreResult<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| CoreError::validation(format!("{what} must be a JSON object")))
}

/// Resolves a dotted path to a single value.
///
/// Numeric segments index into arrays.
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Resolves a dotted path, fanning out through arrays of sub-documents.
///
/// `tags.name` over `{"tags": [{"name": "a"}, {"name": "b"}]}` yields both
/// names.
pub fn lookup_all<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    collect_path(doc, &segments, &mut out);
    out
}

fn collect_path<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Value::Object(map) => {
            if let Some(next) = map.get(*head) {
                collect_path(next, rest, out);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(next) = items.get(index) {
                    collect_path(next, rest, out);
                }
            } else {
                for item in items {
                    if item.is_object() {
                        collect_path(item, segments, out);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Returns a mutable reference to the value at `path`, creating
/// intermediate objects as needed.
pub fn entry_path<'a>(doc: &'a mut Value, path: &str) -> CoreResult<&'a mut Value> {
    let mut current = doc;
    for segment in path.split('.') {
        if segment.is_empty() {
            return Err(CoreError::validation(format!("invalid field path '{path}'")));
        }
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map.entry(segment.to_string()).or_insert(Value::Null),
            Value::Array(items) => {
                let index = segment.parse::<usize>().map_err(|_| {
                    CoreError::validation(format!("cannot address '{segment}' inside an array"))
                })?;
                if index >= items.len() {
                    items.resize(index + 1, Value::Null);
                }
                &mut items[index]
            }
            _ => {
                return Err(CoreError::validation(format!(
                    "cannot create field '{segment}' in a non-object value"
                )))
            }
        };
    }
    Ok(current)
}

/// Sets the value at `path`.
pub fn set_path(doc: &mut Value, path: &str, value: Value) -> CoreResult<()> {
    *entry_path(doc, path)? = value;
    Ok(())
}

/// Removes and returns the value at `path`.
pub fn remove_path(doc: &mut Value, path: &str) -> Option<Value> {
    let (parent_path, last) = match path.rsplit_once('.') {
        Some((parent, last)) => (Some(parent), last),
        None => (None, path),
    };
    let parent = match parent_path {
        Some(parent_path) => get_path_mut(doc, parent_path)?,
        None => doc,
    };
    match parent {
        Value::Object(map) => map.remove(last),
        Value::Array(items) => {
            let index = last.parse::<usize>().ok()?;
            let slot = items.get_mut(index)?;
            Some(std::mem::take(slot))
        }
        _ => None,
    }
}

fn get_path_mut<'a>(doc: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get_mut(segment)?,
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Places `_id` first in the document.
pub fn with_id_first(id: u64, doc: Map<String, Value>) -> Value {
    let mut out = Map::with_capacity(doc.len() + 1);
    out.insert(ID_FIELD.to_string(), Value::from(id));
    for (k, v) in doc {
        if k != ID_FIELD {
            out.insert(k, v);
        }
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_lookup() {
        let doc = json!({"a": {"b": [10, {"c": 3}]}});
        assert_eq!(get_path(&doc, "a.b.0"), Some(&json!(10)));
        assert_eq!(get_path(&doc, "a.b.1.c"), Some(&json!(3)));
        assert_eq!(get_path(&doc, "a.x"), None);
    }

    #[test]
    fn fan_out_through_arrays() {
        let doc = json!({"tags": [{"name": "a"}, {"name": "b"}, 5]});
        let found = lookup_all(&doc, "tags.name");
        assert_eq!(found, vec![&json!("a"), &json!("b")]);
        assert_eq!(lookup_all(&doc, "tags").len(), 1);
        assert!(lookup_all(&doc, "missing").is_empty());
    }

    #[test]
    fn set_creates_intermediates() {
        let mut doc = json!({"a": 1});
        set_path(&mut doc, "b.c.d", json!(true)).unwrap();
        assert_eq!(doc, json!({"a": 1, "b": {"c": {"d": true}}}));
        assert!(set_path(&mut doc, "a.x", json!(1)).is_err());
    }

    #[test]
    fn remove_nested() {
        let mut doc = json!({"a": {"b": 1, "c": 2}});
        assert_eq!(remove_path(&mut doc, "a.b"), Some(json!(1)));
        assert_eq!(doc, json!({"a": {"c": 2}}));
        assert_eq!(remove_path(&mut doc, "z.y"), None);
    }

    #[test]
    fn ids() {
        assert_eq!(doc_id(&json!({"_id": 7})), Some(7));
        assert!(parse_id(&json!("7")).is_err());
        assert!(parse_id(&json!(-1)).is_err());
        let doc = with_id_first(3, json!({"x": 1, "_id": 9}).as_object().cloned().unwrap());
        assert_eq!(doc, json!({"_id": 3, "x": 1}));
    }
}

//! Update specifications.
//!
//! An update is a JSON object of operators, each mapping field paths to
//! arguments: `{"$set": {"a": 1}, "$inc": {"n": 2}}`.

use crate::document::{entry_path, get_path, remove_path, set_path, ID_FIELD};
use crate::error::{CoreError, CoreResult};
use crate::query::Predicate;
use crate::value::{compare_values, values_equal};
use serde_json::{Number, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Set,
    Unset,
    Inc,
    Mul,
    Min,
    Max,
    Rename,
    Push,
    Pull,
    AddToSet,
    Pop,
}

impl Op {
    fn from_name(name: &str) -> Option<Op> {
        Some(match name {
            "$set" => Op::Set,
            "$unset" => Op::Unset,
            "$inc" => Op::Inc,
            "$mul" => Op::Mul,
            "$min" => Op::Min,
            "$max" => Op::Max,
            "$rename" => Op::Rename,
            "$push" => Op::Push,
            "$pull" => Op::Pull,
            "$addToSet" => Op::AddToSet,
            "$pop" => Op::Pop,
            _ => return None,
        })
    }
}

/// A compiled update.
#[derive(Debug, Clone)]
pub struct Update {
    steps: Vec<(Op, String, Value)>,
}

fn check_path(path: &str) -> CoreResult<()> {
    if path.is_empty() {
        return Err(CoreError::validation("empty field path in update"));
    }
    if path == ID_FIELD || path.starts_with("_id.") {
        return Err(CoreError::validation(format!("{ID_FIELD} is immutable")));
    }
    Ok(())
}

impl Update {
    /// Compiles an update object.
    pub fn parse(update: &Value) -> CoreResult<Self> {
        let map = update
            .as_object()
            .ok_or_else(|| CoreError::validation("update must be a JSON object"))?;
        if map.is_empty() {
            return Err(CoreError::validation("update has no operators"));
        }

        let mut steps = Vec::new();
        for (name, fields) in map {
            let op = Op::from_name(name).ok_or_else(|| {
                if name.starts_with('$') {
                    CoreError::validation(format!("unknown update operator '{name}'"))
                } else {
                    CoreError::validation(format!(
                        "update must use operators such as $set; found field '{name}'"
                    ))
                }
            })?;
            let fields = fields
                .as_object()
                .ok_or_else(|| CoreError::validation(format!("{name} expects an object")))?;
            for (path, arg) in fields {
                check_path(path)?;
                match op {
                    Op::Inc | Op::Mul if !arg.is_number() => {
                        return Err(CoreError::validation(format!(
                            "{name} expects numeric arguments"
                        )))
                    }
                    Op::Rename => match arg.as_str() {
                        Some(target) => check_path(target)?,
                        None => {
                            return Err(CoreError::validation("$rename expects string targets"))
                        }
                    },
                    Op::Pop if !matches!(arg.as_i64(), Some(1) | Some(-1)) => {
                        return Err(CoreError::validation("$pop expects 1 or -1"))
                    }
                    Op::Pull => {
                        Predicate::parse(arg)?;
                    }
                    _ => {}
                }
                steps.push((op, path.clone(), arg.clone()));
            }
        }

        Ok(Self { steps })
    }

    /// Applies the update in place. Returns whether the document changed.
    ///
    /// On error the document may be partially updated; callers apply
    /// updates to a copy.
    pub fn apply(&self, doc: &mut Value) -> CoreResult<bool> {
        let before = doc.clone();
        for (op, path, arg) in &self.steps {
            apply_step(doc, *op, path, arg)?;
        }
        Ok(*doc != before)
    }
}

fn apply_step(doc: &mut Value, op: Op, path: &str, arg: &Value) -> CoreResult<()> {
    match op {
        Op::Set => set_path(doc, path, arg.clone()),
        Op::Unset => {
            remove_path(doc, path);
            Ok(())
        }
        Op::Inc => arithmetic(doc, path, arg, "$inc", |a, b| a.checked_add(b), |a, b| a + b),
        Op::Mul => arithmetic(doc, path, arg, "$mul", |a, b| a.checked_mul(b), |a, b| a * b),
        Op::Min | Op::Max => {
            let wanted = if op == Op::Min {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let replace = match get_path(doc, path) {
                None => true,
                Some(current) => compare_values(arg, current) == wanted,
            };
            if replace {
                set_path(doc, path, arg.clone())?;
            }
            Ok(())
        }
        Op::Rename => {
            if let Some(value) = remove_path(doc, path) {
                let target = arg.as_str().unwrap_or_default();
                set_path(doc, target, value)?;
            }
            Ok(())
        }
        Op::Push | Op::AddToSet => {
            let items = match arg.get("$each") {
                Some(Value::Array(items)) => items.clone(),
                Some(_) => return Err(CoreError::validation("$each expects an array")),
                None => vec![arg.clone()],
            };
            let array = array_at(doc, path, op_name(op))?;
            for item in items {
                if op == Op::Push || !array.iter().any(|v| values_equal(v, &item)) {
                    array.push(item);
                }
            }
            Ok(())
        }
        Op::Pull => {
            let predicate = Predicate::parse(arg)?;
            if let Some(Value::Array(_)) = get_path(doc, path) {
                let array = array_at(doc, path, "$pull")?;
                array.retain(|v| !predicate.matches_value(v));
            }
            Ok(())
        }
        Op::Pop => {
            if let Some(Value::Array(_)) = get_path(doc, path) {
                let array = array_at(doc, path, "$pop")?;
                if arg.as_i64() == Some(-1) {
                    if !array.is_empty() {
                        array.remove(0);
                    }
                } else {
                    array.pop();
                }
            }
            Ok(())
        }
    }
}

fn op_name(op: Op) -> &'static str {
    match op {
        Op::Push => "$push",
        _ => "$addToSet",
    }
}

fn array_at<'a>(doc: &'a mut Value, path: &str, name: &str) -> CoreResult<&'a mut Vec<Value>> {
    let slot = entry_path(doc, path)?;
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    match slot {
        Value::Array(items) => Ok(items),
        _ => Err(CoreError::validation(format!(
            "{name} target '{path}' is not an array"
        ))),
    }
}

fn arithmetic(
    doc: &mut Value,
    path: &str,
    arg: &Value,
    name: &str,
    int_op: impl Fn(i64, i64) -> Option<i64>,
    float_op: impl Fn(f64, f64) -> f64,
) -> CoreResult<()> {
    let current = match get_path(doc, path) {
        None | Some(Value::Null) if name == "$mul" => Value::from(0),
        None | Some(Value::Null) => {
            return set_path(doc, path, arg.clone());
        }
        Some(value) if value.is_number() => value.clone(),
        Some(_) => {
            return Err(CoreError::validation(format!(
                "{name} target '{path}' is not a number"
            )))
        }
    };

    let result = match (current.as_i64(), arg.as_i64()) {
        (Some(a), Some(b)) => int_op(a, b).map(Value::from),
        _ => None,
    };
    let result = match result {
        Some(value) => value,
        None => {
            let a = current.as_f64().unwrap_or_default();
            let b = arg.as_f64().unwrap_or_default();
            Number::from_f64(float_op(a, b))
                .map(Value::Number)
                .ok_or_else(|| CoreError::validation(format!("{name} produced a non-finite number")))?
        }
    };
    set_path(doc, path, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apply(update: Value, mut doc: Value) -> Value {
        Update::parse(&update).unwrap().apply(&mut doc).unwrap();
        doc
    }

    #[test]
    fn set_and_unset() {
        let doc = apply(
            json!({"$set": {"a.b": 2, "c": "x"}, "$unset": {"d": ""}}),
            json!({"_id": 1, "d": 4}),
        );
        assert_eq!(doc, json!({"_id": 1, "a": {"b": 2}, "c": "x"}));
    }

    #[test]
    fn arithmetic_ops() {
        let doc = apply(
            json!({"$inc": {"n": 2, "new": 5}, "$mul": {"m": 1.5, "z": 3}}),
            json!({"n": 1, "m": 2}),
        );
        assert_eq!(doc, json!({"n": 3, "new": 5, "m": 3.0, "z": 0}));
    }

    #[test]
    fn min_max() {
        let doc = apply(
            json!({"$min": {"lo": 1}, "$max": {"hi": 10, "fresh": 3}}),
            json!({"lo": 5, "hi": 20}),
        );
        assert_eq!(doc, json!({"lo": 1, "hi": 20, "fresh": 3}));
    }

    #[test]
    fn rename_moves_value() {
        let doc = apply(json!({"$rename": {"old": "new.name"}}), json!({"old": 1}));
        assert_eq!(doc, json!({"new": {"name": 1}}));
    }

    #[test]
    fn array_ops() {
        let doc = apply(
            json!({
                "$push": {"a": {"$each": [3, 4]}, "fresh": 1},
                "$addToSet": {"s": 1},
                "$pull": {"p": {"$gt": 2}},
                "$pop": {"q": -1}
            }),
            json!({"a": [1], "s": [1, 2], "p": [1, 2, 3, 4], "q": [9, 8]}),
        );
        assert_eq!(
            doc,
            json!({"a": [1, 3, 4], "fresh": [1], "s": [1, 2], "p": [1, 2], "q": [8]})
        );
    }

    #[test]
    fn reports_modification() {
        let update = Update::parse(&json!({"$set": {"a": 1}})).unwrap();
        let mut doc = json!({"a": 1});
        assert!(!update.apply(&mut doc).unwrap());
        let mut doc = json!({"a": 2});
        assert!(update.apply(&mut doc).unwrap());
    }

    #[test]
    fn rejects_bad_updates() {
        for update in [
            json!({}),
            json!({"name": "replacement"}),
            json!({"$setOnInsert": {"a": 1}}),
            json!({"$set": {"_id": 5}}),
            json!({"$rename": {"a": "_id"}}),
            json!({"$inc": {"a": "x"}}),
            json!({"$pop": {"a": 2}}),
            json!({"$set": 3}),
        ] {
            let err = Update::parse(&update).unwrap_err();
            assert_eq!(err.kind(), shoaldb_protocol::ErrorKind::Validation, "{update}");
        }
    }

    #[test]
    fn type_mismatch_fails_at_apply() {
        let update = Update::parse(&json!({"$inc": {"a": 1}})).unwrap();
        assert!(update.apply(&mut json!({"a": "text"})).is_err());
        let update = Update::parse(&json!({"$push": {"a": 1}})).unwrap();
        assert!(update.apply(&mut json!({"a": 1})).is_err());
    }
}

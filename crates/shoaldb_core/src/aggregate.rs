//! Aggregation pipelines.
//!
//! A pipeline is a JSON array of single-key stage objects applied in order:
//! `$match`, `$sort`, `$skip`, `$limit`, `$project`, `$unwind`, `$count`
//! and `$group`. Group accumulators are `$sum`, `$avg`, `$min`, `$max`,
//! `$first`, `$last` and `$push`. Expressions are either `"$field.path"`
//! references or literals.

use crate::document::{get_path, remove_path, set_path, ID_FIELD};
use crate::error::{CoreError, CoreResult};
use crate::query::Filter;
use crate::value::{compare_values, number_value, OrdValue};
use serde_json::{Map, Value};
use shoaldb_protocol::SortKey;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Runs `pipeline` over `docs`.
pub fn run(docs: Vec<Value>, pipeline: &Value) -> CoreResult<Vec<Value>> {
    let stages = pipeline
        .as_array()
        .ok_or_else(|| CoreError::validation("pipeline must be an array of stages"))?;

    let mut docs = docs;
    for stage in stages {
        let (name, spec) = match stage.as_object() {
            Some(map) if map.len() == 1 => map
                .iter()
                .next()
                .ok_or_else(|| CoreError::internal("empty stage"))?,
            _ => {
                return Err(CoreError::validation(
                    "each pipeline stage must be an object with exactly one operator",
                ))
            }
        };
        docs = match name.as_str() {
            "$match" => {
                let filter = Filter::parse(spec)?;
                docs.into_iter().filter(|d| filter.matches(d)).collect()
            }
            "$sort" => {
                let keys = SortKey::parse_spec(spec)?;
                sort_docs(&mut docs, &keys);
                docs
            }
            "$skip" => {
                let n = count_arg(name, spec)?;
                docs.into_iter().skip(n).collect()
            }
            "$limit" => {
                let n = count_arg(name, spec)?;
                docs.into_iter().take(n).collect()
            }
            "$project" => project(docs, spec)?,
            "$unwind" => unwind(docs, spec)?,
            "$count" => {
                let field = spec
                    .as_str()
                    .filter(|f| !f.is_empty() && !f.starts_with('$'))
                    .ok_or_else(|| CoreError::validation("$count expects a field name"))?;
                let mut out = Map::new();
                out.insert(field.to_string(), Value::from(docs.len()));
                vec![Value::Object(out)]
            }
            "$group" => group(docs, spec)?,
            other => {
                return Err(CoreError::validation(format!(
                    "unsupported pipeline stage '{other}'"
                )))
            }
        };
    }
    Ok(docs)
}

/// Sorts documents by `keys`; missing fields sort as null.
pub fn sort_docs(docs: &mut [Value], keys: &[SortKey]) {
    docs.sort_by(|a, b| {
        for key in keys {
            let left = get_path(a, &key.field).unwrap_or(&Value::Null);
            let right = get_path(b, &key.field).unwrap_or(&Value::Null);
            let mut ord = compare_values(left, right);
            if key.descending {
                ord = ord.reverse();
            }
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn count_arg(name: &str, spec: &Value) -> CoreResult<usize> {
    spec.as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| CoreError::validation(format!("{name} expects a non-negative integer")))
}

/// Evaluates an expression against a document.
fn eval(expr: &Value, doc: &Value) -> Value {
    match expr {
        Value::String(s) if s.starts_with('$') => {
            get_path(doc, &s[1..]).cloned().unwrap_or(Value::Null)
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), eval(v, doc)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn project(docs: Vec<Value>, spec: &Value) -> CoreResult<Vec<Value>> {
    let fields = spec
        .as_object()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| CoreError::validation("$project expects a non-empty object"))?;

    let flag = |v: &Value| match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        _ => None,
    };
    let exclusion = fields
        .iter()
        .filter(|(k, _)| k.as_str() != ID_FIELD)
        .all(|(_, v)| flag(v) == Some(false));
    let keep_id = fields.get(ID_FIELD).and_then(flag).unwrap_or(true);

    docs.into_iter()
        .map(|doc| {
            if exclusion {
                let mut out = doc;
                for (path, _) in fields.iter().filter(|(k, _)| k.as_str() != ID_FIELD) {
                    remove_path(&mut out, path);
                }
                if !keep_id {
                    remove_path(&mut out, ID_FIELD);
                }
                return Ok(out);
            }

            let mut out = Value::Object(Map::new());
            if keep_id {
                if let Some(id) = doc.get(ID_FIELD) {
                    set_path(&mut out, ID_FIELD, id.clone())?;
                }
            }
            for (path, rule) in fields {
                if path == ID_FIELD {
                    continue;
                }
                match flag(rule) {
                    Some(true) => {
                        if let Some(value) = get_path(&doc, path) {
                            set_path(&mut out, path, value.clone())?;
                        }
                    }
                    Some(false) => {
                        return Err(CoreError::validation(
                            "$project cannot mix inclusion and exclusion",
                        ))
                    }
                    None => set_path(&mut out, path, eval(rule, &doc))?,
                }
            }
            Ok(out)
        })
        .collect()
}

fn unwind(docs: Vec<Value>, spec: &Value) -> CoreResult<Vec<Value>> {
    let path = match spec {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("path").and_then(Value::as_str),
        _ => None,
    }
    .and_then(|p| p.strip_prefix('$'))
    .filter(|p| !p.is_empty())
    .ok_or_else(|| CoreError::validation("$unwind expects a \"$field\" path"))?;

    let mut out = Vec::new();
    for doc in docs {
        match get_path(&doc, path) {
            Some(Value::Array(items)) => {
                for item in items.clone() {
                    let mut copy = doc.clone();
                    set_path(&mut copy, path, item)?;
                    out.push(copy);
                }
            }
            None | Some(Value::Null) => {}
            Some(_) => out.push(doc),
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy)]
enum Accumulator {
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
    Push,
}

impl Accumulator {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "$sum" => Accumulator::Sum,
            "$avg" => Accumulator::Avg,
            "$min" => Accumulator::Min,
            "$max" => Accumulator::Max,
            "$first" => Accumulator::First,
            "$last" => Accumulator::Last,
            "$push" => Accumulator::Push,
            _ => return None,
        })
    }
}

#[derive(Debug, Default, Clone)]
struct GroupState {
    sum: f64,
    count: usize,
    values: Vec<Value>,
}

fn group(docs: Vec<Value>, spec: &Value) -> CoreResult<Vec<Value>> {
    let spec = spec
        .as_object()
        .ok_or_else(|| CoreError::validation("$group expects an object"))?;
    let key_expr = spec
        .get(ID_FIELD)
        .ok_or_else(|| CoreError::validation("$group requires an _id expression"))?;

    let mut outputs = Vec::new();
    for (field, acc) in spec.iter().filter(|(k, _)| k.as_str() != ID_FIELD) {
        let (op, expr) = acc
            .as_object()
            .filter(|m| m.len() == 1)
            .and_then(|m| m.iter().next())
            .ok_or_else(|| {
                CoreError::validation(format!("accumulator for '{field}' must be {{\"$op\": expr}}"))
            })?;
        let accumulator = Accumulator::parse(op).ok_or_else(|| {
            CoreError::validation(format!("unsupported accumulator '{op}'"))
        })?;
        outputs.push((field.clone(), accumulator, expr.clone()));
    }

    let mut order: Vec<OrdValue> = Vec::new();
    let mut groups: BTreeMap<OrdValue, Vec<GroupState>> = BTreeMap::new();
    for doc in &docs {
        let key = OrdValue(eval(key_expr, doc));
        let states = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            vec![GroupState::default(); outputs.len()]
        });
        for ((_, accumulator, expr), state) in outputs.iter().zip(states.iter_mut()) {
            let value = eval(expr, doc);
            match accumulator {
                Accumulator::Sum | Accumulator::Avg => {
                    if let Some(n) = value.as_f64() {
                        state.sum += n;
                        state.count += 1;
                    }
                }
                _ => {
                    if !value.is_null() || matches!(accumulator, Accumulator::Push) {
                        state.values.push(value);
                    }
                }
            }
        }
    }

    let mut out = Vec::with_capacity(order.len());
    for key in order {
        let states = groups.remove(&key).unwrap_or_default();
        let mut doc = Map::new();
        doc.insert(ID_FIELD.to_string(), key.0);
        for ((field, accumulator, _), state) in outputs.iter().zip(states) {
            let value = match accumulator {
                Accumulator::Sum => number_value(state.sum),
                Accumulator::Avg if state.count == 0 => Value::Null,
                Accumulator::Avg => number_value(state.sum / state.count as f64),
                Accumulator::Min => state
                    .values
                    .into_iter()
                    .min_by(compare_values)
                    .unwrap_or(Value::Null),
                Accumulator::Max => state
                    .values
                    .into_iter()
                    .max_by(compare_values)
                    .unwrap_or(Value::Null),
                Accumulator::First => state.values.into_iter().next().unwrap_or(Value::Null),
                Accumulator::Last => state.values.into_iter().last().unwrap_or(Value::Null),
                Accumulator::Push => Value::Array(state.values),
            };
            doc.insert(field.clone(), value);
        }
        out.push(Value::Object(doc));
    }
    Ok(out)
}

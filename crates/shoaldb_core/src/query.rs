//! Query predicates.
//!
//! A query is a JSON object. Plain field entries test equality; entries
//! whose value is an object of `$`-operators apply those operators:
//!
//! | Operator | Meaning |
//! |---|---|
//! | `$eq`, `$ne` | equal / not equal |
//! | `$gt`, `$gte`, `$lt`, `$lte` | ordered comparison within one type |
//! | `$in`, `$nin` | membership in a list |
//! | `$exists` | field presence |
//! | `$regex` (+ `$options`) | regular expression over strings |
//!
//! `$and`, `$or` and `$nor` combine sub-queries. Field names may be dotted
//! paths. A field holding an array matches when any element matches.

use crate::document::lookup_all;
use crate::error::{CoreError, CoreResult};
use crate::value::{compare_values, same_type, values_equal};
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::cmp::Ordering;

/// A compiled query.
#[derive(Debug, Clone)]
pub enum Filter {
    /// All sub-filters match.
    And(Vec<Filter>),
    /// At least one sub-filter matches.
    Or(Vec<Filter>),
    /// No sub-filter matches.
    Nor(Vec<Filter>),
    /// A predicate over one field.
    Field {
        /// Dotted field path.
        path: String,
        /// Predicate applied to the field.
        predicate: Predicate,
    },
}

/// Conditions applied to one value; all must hold.
#[derive(Debug, Clone)]
pub struct Predicate {
    conditions: Vec<Condition>,
}

#[derive(Debug, Clone)]
enum Condition {
    Eq(Value),
    Ne(Value),
    Cmp(Ordering, bool, Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex(Regex),
}

impl Filter {
    /// A filter matching every document.
    pub fn all() -> Self {
        Filter::And(Vec::new())
    }

    /// Compiles a query object.
    pub fn parse(query: &Value) -> CoreResult<Self> {
        let map = query
            .as_object()
            .ok_or_else(|| CoreError::validation("query must be a JSON object"))?;

        let mut filters = Vec::with_capacity(map.len());
        for (key, value) in map {
            match key.as_str() {
                "$and" => filters.push(Filter::And(parse_list(key, value)?)),
                "$or" => filters.push(Filter::Or(parse_list(key, value)?)),
                "$nor" => filters.push(Filter::Nor(parse_list(key, value)?)),
                op if op.starts_with('$') => {
                    return Err(CoreError::validation(format!(
                        "unknown top-level operator '{op}'"
                    )))
                }
                path => filters.push(Filter::Field {
                    path: path.to_string(),
                    predicate: Predicate::parse(value)?,
                }),
            }
        }

        Ok(if filters.len() == 1 {
            filters.remove(0)
        } else {
            Filter::And(filters)
        })
    }

    /// Tests a document.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
            Filter::Nor(filters) => !filters.iter().any(|f| f.matches(doc)),
            Filter::Field { path, predicate } => predicate.matches_field(&lookup_all(doc, path)),
        }
    }

    /// Returns `(path, value)` pairs that every match must equal.
    ///
    /// Used to pick an index for candidate selection.
    pub fn equalities(&self) -> Vec<(&str, &Value)> {
        match self {
            Filter::And(filters) => filters.iter().flat_map(Filter::equalities).collect(),
            Filter::Field { path, predicate } => predicate
                .conditions
                .iter()
                .filter_map(|c| match c {
                    Condition::Eq(value) if !value.is_null() => Some((path.as_str(), value)),
                    _ => None,
                })
                .collect(),
            Filter::Or(_) | Filter::Nor(_) => Vec::new(),
        }
    }
}

fn parse_list(op: &str, value: &Value) -> CoreResult<Vec<Filter>> {
    let items = value
        .as_array()
        .ok_or_else(|| CoreError::validation(format!("{op} expects an array of queries")))?;
    items.iter().map(Filter::parse).collect()
}

fn is_operator_object(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| !map.is_empty() && map.keys().all(|k| k.starts_with('$')))
}

impl Predicate {
    /// Compiles the right-hand side of a field entry.
    ///
    /// A non-operator value means equality.
    pub fn parse(value: &Value) -> CoreResult<Self> {
        if !is_operator_object(value) {
            if let Some(map) = value.as_object() {
                if map.keys().any(|k| k.starts_with('$')) {
                    return Err(CoreError::validation(
                        "cannot mix operators and fields in one condition",
                    ));
                }
            }
            return Ok(Self {
                conditions: vec![Condition::Eq(value.clone())],
            });
        }

        let map = value.as_object().into_iter().flatten();
        let options = value
            .get("$options")
            .map(|o| {
                o.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| CoreError::validation("$options must be a string"))
            })
            .transpose()?;

        let mut conditions = Vec::new();
        for (op, arg) in map {
            let condition = match op.as_str() {
                "$eq" => Condition::Eq(arg.clone()),
                "$ne" => Condition::Ne(arg.clone()),
                "$gt" => Condition::Cmp(Ordering::Greater, false, arg.clone()),
                "$gte" => Condition::Cmp(Ordering::Greater, true, arg.clone()),
                "$lt" => Condition::Cmp(Ordering::Less, false, arg.clone()),
                "$lte" => Condition::Cmp(Ordering::Less, true, arg.clone()),
                "$in" => Condition::In(expect_array(op, arg)?),
                "$nin" => Condition::Nin(expect_array(op, arg)?),
                "$exists" => Condition::Exists(arg.as_bool().ok_or_else(|| {
                    CoreError::validation("$exists expects a boolean")
                })?),
                "$regex" => Condition::Regex(compile_regex(arg, options.as_deref())?),
                "$options" => continue,
                other => {
                    return Err(CoreError::validation(format!(
                        "unknown query operator '{other}'"
                    )))
                }
            };
            conditions.push(condition);
        }

        if options.is_some() && !conditions.iter().any(|c| matches!(c, Condition::Regex(_))) {
            return Err(CoreError::validation("$options requires $regex"));
        }

        Ok(Self { conditions })
    }

    /// Tests one standalone value (array elements are not expanded).
    pub fn matches_value(&self, value: &Value) -> bool {
        self.matches_field(&[value])
    }

    /// Tests the values a field path resolved to.
    fn matches_field(&self, values: &[&Value]) -> bool {
        self.conditions.iter().all(|c| c.matches(values))
    }
}

impl Condition {
    fn matches(&self, values: &[&Value]) -> bool {
        match self {
            Condition::Eq(target) => field_equals(values, target),
            Condition::Ne(target) => !field_equals(values, target),
            Condition::Cmp(direction, inclusive, target) => candidates(values).any(|v| {
                if !same_type(v, target) {
                    return false;
                }
                let ord = compare_values(v, target);
                ord == *direction || (*inclusive && ord == Ordering::Equal)
            }),
            Condition::In(targets) => targets.iter().any(|t| field_equals(values, t)),
            Condition::Nin(targets) => !targets.iter().any(|t| field_equals(values, t)),
            Condition::Exists(expected) => !values.is_empty() == *expected,
            Condition::Regex(re) => {
                candidates(values).any(|v| v.as_str().is_some_and(|s| re.is_match(s)))
            }
        }
    }
}

/// Resolved values plus the elements of any arrays among them.
fn candidates<'a>(values: &'a [&'a Value]) -> impl Iterator<Item = &'a Value> + 'a {
    values.iter().flat_map(|v| {
        let elements: &[Value] = match v {
            Value::Array(items) => items.as_slice(),
            _ => &[],
        };
        std::iter::once(*v).chain(elements.iter())
    })
}

fn field_equals(values: &[&Value], target: &Value) -> bool {
    if target.is_null() && values.is_empty() {
        return true;
    }
    candidates(values).any(|v| values_equal(v, target))
}

fn expect_array(op: &str, value: &Value) -> CoreResult<Vec<Value>> {
    value
        .as_array()
        .cloned()
        .ok_or_else(|| CoreError::validation(format!("{op} expects an array")))
}

fn compile_regex(pattern: &Value, options: Option<&str>) -> CoreResult<Regex> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| CoreError::validation("$regex expects a string"))?;
    let mut builder = RegexBuilder::new(pattern);
    for flag in options.unwrap_or_default().chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => {
                return Err(CoreError::validation(format!(
                    "unsupported regex option '{other}'"
                )))
            }
        };
    }
    builder
        .build()
        .map_err(|e| CoreError::validation(format!("invalid regex: {e}")))
}

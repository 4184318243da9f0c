//! Collections command implementation.

use super::Target;
use serde_json::{json, Value};
use std::error::Error;

/// Lists collections, with document counts when `counts` is set.
pub fn run(target: &mut Target, counts: bool, format: &str) -> Result<(), Box<dyn Error>> {
    let payload = target.call(r#"{"op":"list_collections"}"#)?;
    let names: Vec<String> = serde_json::from_value(payload["collections"].clone())?;

    let mut rows = Vec::with_capacity(names.len());
    for name in names {
        let count = if counts {
            let command = json!({"op": "count", "collection": name}).to_string();
            Some(target.call(&command)?["count"].as_u64().unwrap_or(0))
        } else {
            None
        };
        rows.push((name, count));
    }

    match format {
        "json" => {
            let out: Vec<Value> = rows
                .iter()
                .map(|(name, count)| match count {
                    Some(count) => json!({"name": name, "count": count}),
                    None => json!({"name": name}),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        _ => {
            if rows.is_empty() {
                println!("(no collections)");
            }
            for (name, count) in rows {
                match count {
                    Some(count) => println!("{name:<32} {count:>10}"),
                    None => println!("{name}"),
                }
            }
        }
    }

    Ok(())
}

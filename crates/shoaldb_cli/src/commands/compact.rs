//! Compact command implementation.

use super::Target;
use serde_json::json;
use std::error::Error;
use tracing::info;

/// Compacts one collection and prints the size change.
pub fn run(target: &mut Target, collection: &str) -> Result<(), Box<dyn Error>> {
    info!(collection, "compacting");
    let command = json!({"op": "compact", "collection": collection}).to_string();
    let stats = target.call(&command)?;

    let docs = stats["docs"].as_u64().unwrap_or(0);
    let before = stats["old_size"].as_u64().unwrap_or(0);
    let after = stats["new_size"].as_u64().unwrap_or(0);

    info!(collection, docs, before, after, "compaction finished");
    println!("Compacted '{collection}'");
    println!("  Documents:   {docs}");
    println!("  Size before: {before} bytes");
    println!("  Size after:  {after} bytes");
    println!(
        "  Space saved: {} bytes ({:.1}%)",
        before.saturating_sub(after),
        if before > 0 {
            (before.saturating_sub(after) as f64 / before as f64) * 100.0
        } else {
            0.0
        }
    );

    Ok(())
}

//! Exec command implementation.

use super::Target;
use serde_json::Value;
use std::error::Error;
use tracing::debug;

/// Runs one JSON command and prints the response envelope.
///
/// Returns an error (non-zero exit) when the envelope reports a failure.
pub fn run(target: &mut Target, command: &str, pretty: bool) -> Result<(), Box<dyn Error>> {
    let response = target.execute(command)?;
    debug!(bytes = response.len(), "response received");
    let value: Value = serde_json::from_str(&response)?;

    if pretty {
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{response}");
    }

    if value["ok"] == Value::Bool(true) {
        Ok(())
    } else {
        Err(format!("command failed ({})", value["error"]["kind"].as_str().unwrap_or("unknown")).into())
    }
}

//! Ping command implementation.

use super::Target;
use std::error::Error;
use std::time::Instant;
use tracing::debug;

/// Sends a ping and prints the round trip time.
pub fn run(target: &mut Target) -> Result<(), Box<dyn Error>> {
    let started = Instant::now();
    target.call(r#"{"op":"ping"}"#)?;
    let elapsed = started.elapsed();
    debug!(?elapsed, "pong");
    println!("pong ({:.3} ms)", elapsed.as_secs_f64() * 1000.0);
    Ok(())
}

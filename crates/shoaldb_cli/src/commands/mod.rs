//! CLI command implementations.

pub mod collections;
pub mod compact;
pub mod exec;
pub mod ping;

use serde_json::Value;
use shoaldb_client::{ClientConfig, Connection};
use shoaldb_core::{Config, Database, Session};
use shoaldb_protocol::ParsedEnvelope;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Where commands are sent: an embedded directory or a remote server.
pub enum Target {
    /// A database opened in this process.
    Embedded(Session),
    /// A connection to `shoaldb-server`.
    Remote(Connection),
}

impl Target {
    /// Opens the target named on the command line.
    pub fn open(
        path: Option<&Path>,
        remote: Option<&str>,
        key_file: Option<&Path>,
    ) -> Result<Self, Box<dyn Error>> {
        match (path, remote) {
            (Some(_), Some(_)) => Err("use either --path or --remote, not both".into()),
            (None, None) => Err("database path (--path) or server (--remote) required".into()),
            (Some(path), None) => {
                let config = Config::default().create_if_missing(false);
                let db = match key_file {
                    Some(key_file) => Database::open_encrypted(path, key_file, config)?,
                    None => Database::open(path, config)?,
                };
                info!(path = %path.display(), "opened database");
                Ok(Target::Embedded(Session::new(Arc::new(db))))
            }
            (None, Some(addr)) => {
                if key_file.is_some() {
                    return Err("--key-file only applies to --path".into());
                }
                let (host, port) = parse_remote(addr)?;
                let conn = Connection::connect(host, port, ClientConfig::default())?;
                info!(peer = %conn.peer_addr(), "connected");
                Ok(Target::Remote(conn))
            }
        }
    }

    /// Logs the session in. Embedded sessions accept any login.
    pub fn login(&mut self, user: &str, password: &str) -> Result<(), Box<dyn Error>> {
        let command = serde_json::json!({"op": "auth", "user": user, "password": password});
        self.call(&command.to_string())?;
        info!(user, "logged in");
        Ok(())
    }

    /// Sends one command and returns the response envelope text.
    pub fn execute(&mut self, command: &str) -> Result<String, Box<dyn Error>> {
        match self {
            Target::Embedded(session) => Ok(session.execute(command)),
            Target::Remote(conn) => Ok(conn.execute(command)?),
        }
    }

    /// Sends one command and returns the payload of a success envelope.
    ///
    /// An error envelope becomes an `Err` carrying its kind and message.
    pub fn call(&mut self, command: &str) -> Result<Value, Box<dyn Error>> {
        let response = self.execute(command)?;
        match ParsedEnvelope::parse(response.as_bytes())? {
            ParsedEnvelope::Ok(map) => Ok(Value::Object(map)),
            ParsedEnvelope::Err(body) => Err(format!("{}: {}", body.kind, body.message).into()),
        }
    }
}

/// Splits `host:port`. IPv6 hosts may be bracketed: `[::1]:5433`.
pub fn parse_remote(addr: &str) -> Result<(&str, u16), Box<dyn Error>> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| format!("expected host:port, got '{addr}'"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(format!("missing host in '{addr}'").into());
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| format!("invalid port in '{addr}'"))?;
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_addresses() {
        assert_eq!(parse_remote("127.0.0.1:5433").unwrap(), ("127.0.0.1", 5433));
        assert_eq!(parse_remote("[::1]:7000").unwrap(), ("::1", 7000));
        assert!(parse_remote("localhost").is_err());
        assert!(parse_remote(":5433").is_err());
        assert!(parse_remote("host:99999").is_err());
    }

    #[test]
    fn embedded_target_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        drop(Database::open(temp.path(), Config::default()).unwrap());

        let mut target = Target::open(Some(temp.path()), None, None).unwrap();
        let payload = target.call(r#"{"op":"create_collection","collection":"c"}"#).unwrap();
        assert_eq!(payload["existed"], false);

        let err = target.call(r#"{"op":"nope"}"#).unwrap_err();
        assert!(err.to_string().starts_with("unsupported"));

        target.login("ada", "anything").unwrap();
    }

    #[test]
    fn target_selection_errors() {
        assert!(Target::open(None, None, None).is_err());
        let path = Path::new("/nonexistent");
        assert!(Target::open(Some(path), Some("h:1"), None).is_err());
    }
}

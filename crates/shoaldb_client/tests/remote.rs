//! Client against a live server.

use serde_json::Value;
use shoaldb_client::{ClientConfig, ClientError, Connection, ConnectionState};
use shoaldb_core::{Config, Credentials, Database};
use shoaldb_server::{ServerConfig, ServerHandle};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

fn start() -> (TempDir, ServerHandle) {
    let temp = tempdir().unwrap();
    let db = Database::open(temp.path(), Config::default().sync_writes(false)).unwrap();
    let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
    let server = ServerHandle::start(config, Arc::new(db)).unwrap();
    (temp, server)
}

fn connect(server: &ServerHandle) -> Connection {
    let addr = server.addr();
    Connection::connect("127.0.0.1", addr.port(), ClientConfig::default()).unwrap()
}

fn json(text: String) -> Value {
    serde_json::from_str(&text).unwrap()
}

#[test]
fn ping_round_trip() {
    let (_temp, server) = start();
    let mut conn = connect(&server);
    assert_eq!(conn.ping().unwrap(), r#"{"ok":true,"pong":true}"#);
}

#[test]
fn login_before_use() {
    let temp = tempdir().unwrap();
    let db = Database::open(temp.path(), Config::default().sync_writes(false)).unwrap();
    let mut credentials = Credentials::new();
    credentials.add_user("ada", "lovelace").unwrap();
    let config = ServerConfig::new("127.0.0.1:0".parse().unwrap()).with_credentials(credentials);
    let server = ServerHandle::start(config, Arc::new(db)).unwrap();
    let mut conn = connect(&server);

    let refused = json(conn.insert("users", "{}").unwrap());
    assert_eq!(refused["error"]["kind"], "auth");
    let wrong = json(conn.auth("ada", "babbage").unwrap());
    assert_eq!(wrong["error"]["kind"], "auth");
    assert_eq!(conn.state(), ConnectionState::Ready);

    let login = json(conn.auth("ada", "lovelace").unwrap());
    assert_eq!(login["user"], "ada");
    let inserted = json(conn.insert("users", "{}").unwrap());
    assert_eq!(inserted["id"], 1);
}

#[test]
fn insert_find_count() {
    let (_temp, server) = start();
    let mut conn = connect(&server);

    let inserted = json(conn.insert("users", r#"{"name":"Ada"}"#).unwrap());
    let id = inserted["id"].as_u64().unwrap();

    let count = json(conn.count("users").unwrap());
    assert_eq!(count["count"], 1);

    let found = json(conn.find("users", r#"{"name":"Ada"}"#).unwrap());
    assert_eq!(found["docs"], serde_json::json!([{"_id": id, "name": "Ada"}]));

    let one = json(conn.find_one("users", &format!(r#"{{"_id":{id}}}"#)).unwrap());
    assert_eq!(one["doc"]["name"], "Ada");
}

#[test]
fn oversized_result_is_a_validation_error() {
    let temp = tempdir().unwrap();
    let db = Database::open(temp.path(), Config::default().sync_writes(false)).unwrap();
    let config = ServerConfig::new("127.0.0.1:0".parse().unwrap()).with_max_frame_size(256);
    let server = ServerHandle::start(config, Arc::new(db)).unwrap();
    let client = ClientConfig::default().with_max_frame_size(256);
    let mut conn = Connection::connect("127.0.0.1", server.addr().port(), client).unwrap();

    let doc = format!(r#"{{"text":"{}"}}"#, "x".repeat(60));
    for _ in 0..5 {
        conn.insert("big", &doc).unwrap();
    }
    let found = json(conn.find("big", "{}").unwrap());
    assert_eq!(found["error"]["kind"], "validation");
    assert_eq!(conn.state(), ConnectionState::Ready);
    assert_eq!(conn.ping().unwrap(), r#"{"ok":true,"pong":true}"#);
}

#[test]
fn malformed_fragment_is_a_parse_error() {
    let (_temp, server) = start();
    let mut conn = connect(&server);

    let response = json(conn.insert("users", r#"{"name":"#).unwrap());
    assert_eq!(response["error"]["kind"], "parse");
    assert_eq!(conn.state(), ConnectionState::Ready);
}

#[test]
fn unique_index_rejects_duplicates() {
    let (_temp, server) = start();
    let mut conn = connect(&server);

    let created = json(conn.create_unique_index("users", "name").unwrap());
    assert_eq!(created["index"], "uniq_name");
    conn.insert("users", r#"{"name":"Ada"}"#).unwrap();
    let dup = json(conn.insert("users", r#"{"name":"Ada"}"#).unwrap());
    assert_eq!(dup["error"]["kind"], "constraint");

    let indexes = json(conn.list_indexes("users").unwrap());
    assert_eq!(indexes["indexes"][0]["kind"], "unique");
}

#[test]
fn text_search_finds_document() {
    let (_temp, server) = start();
    let mut conn = connect(&server);

    conn.create_text_index("docs", r#"["title"]"#).unwrap();
    conn.insert("docs", r#"{"title":"the quick brown fox"}"#).unwrap();
    conn.insert("docs", r#"{"title":"lazy dogs sleep"}"#).unwrap();

    let hits = json(conn.text_search("docs", "quick", 10).unwrap());
    assert_eq!(hits["hits"].as_array().unwrap().len(), 1);
}

#[test]
fn transaction_rollback_and_isolation() {
    let (_temp, server) = start();
    let mut conn = connect(&server);
    let mut other = connect(&server);

    conn.begin_tx().unwrap();
    assert_eq!(conn.state(), ConnectionState::InTx);
    conn.insert("t", r#"{"x":1}"#).unwrap();

    let inside = json(conn.count("t").unwrap());
    assert_eq!(inside["count"], 1);
    let outside = json(other.count("t").unwrap());
    assert_eq!(outside["count"], 0);

    let nested = json(conn.begin_tx().unwrap());
    assert_eq!(nested["error"]["kind"], "validation");
    assert_eq!(conn.state(), ConnectionState::InTx);

    let rolled = json(conn.rollback_tx().unwrap());
    assert_eq!(rolled["rolled_back"], true);
    assert_eq!(conn.state(), ConnectionState::Ready);

    let after = json(conn.count("t").unwrap());
    assert_eq!(after["count"], 0);
}

#[test]
fn conflicting_commit_returns_to_ready() {
    let (_temp, server) = start();
    let mut conn = connect(&server);
    let mut other = connect(&server);

    conn.insert("acct", r#"{"owner":"a","balance":10}"#).unwrap();

    conn.begin_tx().unwrap();
    conn.update("acct", r#"{"owner":"a"}"#, r#"{"$inc":{"balance":5}}"#)
        .unwrap();
    other
        .update("acct", r#"{"owner":"a"}"#, r#"{"$inc":{"balance":1}}"#)
        .unwrap();

    let commit = json(conn.commit_tx().unwrap());
    assert_eq!(commit["error"]["kind"], "conflict");
    assert_eq!(conn.state(), ConnectionState::Ready);

    let doc = json(conn.find_one("acct", "{}").unwrap());
    assert_eq!(doc["doc"]["balance"], 11);
}

#[test]
fn blob_round_trip() {
    let (_temp, server) = start();
    let mut conn = connect(&server);

    let put = json(
        conn.put_object(
            "files",
            "notes/a.txt",
            "aGVsbG8gd29ybGQ=",
            Some("text/plain"),
            Some(r#"{"author":"ada"}"#),
        )
        .unwrap(),
    );
    assert_eq!(put["object"]["size"], 11);

    let got = json(conn.get_object("files", "notes/a.txt").unwrap());
    assert_eq!(got["data"], "aGVsbG8gd29ybGQ=");
    assert_eq!(got["metadata"]["author"], "ada");

    let listed = json(conn.list_objects("files", Some("notes/"), 0).unwrap());
    assert_eq!(listed["objects"].as_array().unwrap().len(), 1);

    let hits = json(conn.search("hello", None, 0).unwrap());
    assert_eq!(hits["hits"][0]["key"], "notes/a.txt");

    let bad = json(conn.put_object("files", "x", "***", None, None).unwrap());
    assert_eq!(bad["error"]["kind"], "parse");
}

#[test]
fn execute_tracks_transaction_state() {
    let (_temp, server) = start();
    let mut conn = connect(&server);

    conn.execute(r#"{"op":"begin_tx"}"#).unwrap();
    assert_eq!(conn.state(), ConnectionState::InTx);
    conn.execute(r#"{"op":"commit_tx"}"#).unwrap();
    assert_eq!(conn.state(), ConnectionState::Ready);
}

#[test]
fn interrupt_breaks_connection() {
    let (_temp, server) = start();
    let mut conn = connect(&server);
    let handle = conn.interrupt_handle();

    conn.ping().unwrap();
    handle.interrupt();
    assert!(conn.ping().is_err());
    assert_eq!(conn.state(), ConnectionState::Broken);
    assert!(matches!(conn.ping(), Err(ClientError::Broken)));
}

#[test]
fn server_shutdown_breaks_connection() {
    let (_temp, server) = start();
    let mut conn = connect(&server);
    conn.ping().unwrap();

    server.stop().unwrap();
    thread::sleep(Duration::from_millis(100));
    assert!(conn.ping().is_err());
    assert_eq!(conn.state(), ConnectionState::Broken);
}

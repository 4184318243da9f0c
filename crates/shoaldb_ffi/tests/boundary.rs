//! The C boundary driven end to end.

use serde_json::Value;
use shoaldb_core::{Config, Credentials, Database};
use shoaldb_ffi::*;
use shoaldb_server::{ServerConfig, ServerHandle};
use std::ffi::{c_char, CStr, CString};
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

fn c(text: &str) -> CString {
    CString::new(text).unwrap()
}

/// Takes ownership of a returned string and parses it.
fn take(ptr: *mut c_char) -> Value {
    assert!(!ptr.is_null(), "boundary returned null");
    let text = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_owned();
    unsafe { shoaldb_free_string(ptr) };
    let value: Value = serde_json::from_str(&text).unwrap();
    assert!(value["ok"].is_boolean());
    value
}

type Verb1 = unsafe extern "C" fn(*mut ShoalConnection, *const c_char) -> *mut c_char;
type Verb2 =
    unsafe extern "C" fn(*mut ShoalConnection, *const c_char, *const c_char) -> *mut c_char;

fn call1(f: Verb1, conn: *mut ShoalConnection, a: &str) -> Value {
    let a = c(a);
    take(unsafe { f(conn, a.as_ptr()) })
}

fn call2(f: Verb2, conn: *mut ShoalConnection, a: &str, b: &str) -> Value {
    let (a, b) = (c(a), c(b));
    take(unsafe { f(conn, a.as_ptr(), b.as_ptr()) })
}

fn start() -> (TempDir, ServerHandle) {
    let temp = tempdir().unwrap();
    let db = Database::open(temp.path(), Config::default().sync_writes(false)).unwrap();
    let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
    let server = ServerHandle::start(config, Arc::new(db)).unwrap();
    (temp, server)
}

fn connect(server: &ServerHandle) -> *mut ShoalConnection {
    let host = c("127.0.0.1");
    let conn = unsafe { shoaldb_connect(host.as_ptr(), server.addr().port()) };
    assert!(!conn.is_null());
    conn
}

#[test]
fn remote_crud_scenario() {
    let (_temp, server) = start();
    let conn = connect(&server);

    let pong = take(shoaldb_ping(conn));
    assert_eq!(pong, serde_json::json!({"ok": true, "pong": true}));

    let inserted = call2(shoaldb_insert, conn, "users", r#"{"name":"Ada"}"#);
    let id = inserted["id"].as_u64().unwrap();

    let count = call1(shoaldb_count, conn, "users");
    assert_eq!(count["count"], 1);

    let found = call2(shoaldb_find_one, conn, "users", &format!(r#"{{"_id":{id}}}"#));
    assert_eq!(found["doc"]["name"], "Ada");

    let (users, all, set) = (c("users"), c("{}"), c(r#"{"$set":{"lang":"en"}}"#));
    let updated =
        take(unsafe { shoaldb_update_one(conn, users.as_ptr(), all.as_ptr(), set.as_ptr()) });
    assert_eq!(updated["matched"], 1);
    assert_eq!(updated["modified"], 1);

    let first = call1(shoaldb_create_collection, conn, "extra");
    let second = call1(shoaldb_create_collection, conn, "extra");
    assert_eq!(first["existed"], false);
    assert_eq!(second["existed"], true);

    call1(shoaldb_drop_collection, conn, "extra");
    let listed = take(shoaldb_list_collections(conn));
    assert_eq!(listed["collections"], serde_json::json!(["users"]));

    let deleted = call2(shoaldb_delete_one, conn, "users", "{}");
    assert_eq!(deleted["deleted"], 1);

    shoaldb_disconnect(conn);
    assert!(shoaldb_ping(conn).is_null());
    shoaldb_disconnect(conn);
}

#[test]
fn remote_indexes_and_search() {
    let (_temp, server) = start();
    let conn = connect(&server);

    call2(shoaldb_create_unique_index, conn, "docs", "slug");
    call2(shoaldb_create_text_index, conn, "docs", r#"["title"]"#);
    call2(shoaldb_create_composite_index, conn, "docs", r#"["a","b"]"#);

    let doc = r#"{"slug":"fox","title":"the quick brown fox"}"#;
    call2(shoaldb_insert, conn, "docs", doc);
    let dup = call2(shoaldb_insert, conn, "docs", doc);
    assert_eq!(dup["error"]["kind"], "constraint");

    let (docs, quick) = (c("docs"), c("quick"));
    let hits = take(unsafe { shoaldb_text_search(conn, docs.as_ptr(), quick.as_ptr(), 10) });
    assert_eq!(hits["hits"].as_array().unwrap().len(), 1);

    let indexes = call1(shoaldb_list_indexes, conn, "docs");
    assert_eq!(indexes["indexes"].as_array().unwrap().len(), 3);

    let dropped = call2(shoaldb_drop_index, conn, "docs", "idx_a_b");
    assert_eq!(dropped["dropped"], true);
    let missing = call2(shoaldb_drop_index, conn, "docs", "idx_a_b");
    assert_eq!(missing["error"]["kind"], "not_found");

    let agg = call2(shoaldb_aggregate, conn, "docs", r#"[{"$count":"n"}]"#);
    assert_eq!(agg["docs"][0]["n"], 1);

    let compacted = call1(shoaldb_compact, conn, "docs");
    assert_eq!(compacted["docs"], 1);

    shoaldb_disconnect(conn);
}

#[test]
fn remote_blobs() {
    let (_temp, server) = start();
    let conn = connect(&server);
    let (bucket, key, data, content_type) =
        (c("files"), c("a.txt"), c("aGVsbG8="), c("text/plain"));

    let put = take(unsafe {
        shoaldb_put_object(
            conn,
            bucket.as_ptr(),
            key.as_ptr(),
            data.as_ptr(),
            content_type.as_ptr(),
            std::ptr::null(),
        )
    });
    assert_eq!(put["object"]["size"], 5);

    let head = call2(shoaldb_head_object, conn, "files", "a.txt");
    assert!(head.get("data").is_none());
    let got = call2(shoaldb_get_object, conn, "files", "a.txt");
    assert_eq!(got["data"], "aGVsbG8=");

    let hello = c("hello");
    let hits = take(unsafe { shoaldb_search(conn, hello.as_ptr(), std::ptr::null(), 0) });
    assert_eq!(hits["hits"][0]["bucket"], "files");

    let listed = take(unsafe { shoaldb_list_objects(conn, bucket.as_ptr(), std::ptr::null(), 0) });
    assert_eq!(listed["objects"].as_array().unwrap().len(), 1);

    let first = call2(shoaldb_delete_object, conn, "files", "a.txt");
    let again = call2(shoaldb_delete_object, conn, "files", "a.txt");
    assert_eq!(first["existed"], true);
    assert_eq!(again["existed"], false);

    call1(shoaldb_create_bucket, conn, "other");
    let buckets = take(shoaldb_list_buckets(conn));
    assert_eq!(buckets["buckets"], serde_json::json!(["files", "other"]));
    call1(shoaldb_delete_bucket, conn, "other");

    shoaldb_disconnect(conn);
}

#[test]
fn remote_login() {
    let temp = tempdir().unwrap();
    let db = Database::open(temp.path(), Config::default().sync_writes(false)).unwrap();
    let mut credentials = Credentials::new();
    credentials.add_user("ada", "lovelace").unwrap();
    let config = ServerConfig::new("127.0.0.1:0".parse().unwrap()).with_credentials(credentials);
    let server = ServerHandle::start(config, Arc::new(db)).unwrap();
    let conn = connect(&server);

    let refused = call1(shoaldb_count, conn, "users");
    assert_eq!(refused["error"]["kind"], "auth");
    let wrong = call2(shoaldb_auth, conn, "ada", "babbage");
    assert_eq!(wrong["error"]["kind"], "auth");
    let login = call2(shoaldb_auth, conn, "ada", "lovelace");
    assert_eq!(login["user"], "ada");
    assert_eq!(call1(shoaldb_count, conn, "users")["count"], 0);
    shoaldb_disconnect(conn);
}

#[test]
fn remote_transaction_rollback() {
    let (_temp, server) = start();
    let conn = connect(&server);
    let other = connect(&server);

    take(shoaldb_begin_tx(conn));
    call2(shoaldb_insert, conn, "t", r#"{"x":1}"#);
    let hidden = call1(shoaldb_count, other, "t");
    assert_eq!(hidden["count"], 0);
    let visible = call1(shoaldb_count, conn, "t");
    assert_eq!(visible["count"], 1);

    take(shoaldb_rollback_tx(conn));
    let after = call1(shoaldb_count, conn, "t");
    assert_eq!(after["count"], 0);

    take(shoaldb_begin_tx(conn));
    call2(shoaldb_insert, conn, "t", r#"{"x":2}"#);
    let committed = take(shoaldb_commit_tx(conn));
    assert_eq!(committed["committed"], 1);
    let seen = call1(shoaldb_count, other, "t");
    assert_eq!(seen["count"], 1);

    shoaldb_disconnect(conn);
    shoaldb_disconnect(other);
}

#[test]
fn invalid_arguments_keep_connection_usable() {
    let (_temp, server) = start();
    let conn = connect(&server);

    let doc = c("{}");
    let bad = take(unsafe { shoaldb_insert(conn, std::ptr::null(), doc.as_ptr()) });
    assert_eq!(bad["error"]["kind"], "validation");

    let malformed = call2(shoaldb_find, conn, "c", "{oops");
    assert_eq!(malformed["error"]["kind"], "parse");

    let pong = take(shoaldb_ping(conn));
    assert_eq!(pong["pong"], true);
    shoaldb_disconnect(conn);
}

#[test]
fn broken_connection_stays_null() {
    let (_temp, server) = start();
    let conn = connect(&server);
    take(shoaldb_ping(conn));

    server.stop().unwrap();
    thread::sleep(Duration::from_millis(100));

    assert!(shoaldb_ping(conn).is_null());
    assert!(!shoaldb_last_error().is_null());
    // Broken is terminal, even for calls with bad arguments.
    assert!(unsafe { shoaldb_count(conn, std::ptr::null()) }.is_null());
    shoaldb_disconnect(conn);
}

#[test]
fn read_timeout_breaks_connection() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let silent = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_secs(1));
        drop(stream);
    });

    let host = c("127.0.0.1");
    let conn = unsafe { shoaldb_connect_with_timeouts(host.as_ptr(), port, 0, 200, 0) };
    assert!(!conn.is_null());

    assert!(shoaldb_ping(conn).is_null());
    let error = shoaldb_last_error();
    assert!(!error.is_null());
    let message = unsafe { CStr::from_ptr(error) }.to_str().unwrap().to_owned();
    assert!(!message.is_empty());

    let users = c("users");
    assert!(unsafe { shoaldb_count(conn, users.as_ptr()) }.is_null());
    assert!(shoaldb_ping(conn).is_null());
    shoaldb_disconnect(conn);
    silent.join().unwrap();
}

#[test]
fn disconnect_aborts_call_in_flight() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let silent = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_secs(2));
        drop(stream);
    });

    let host = c("127.0.0.1");
    let conn = unsafe { shoaldb_connect_with_timeouts(host.as_ptr(), port, 0, 10_000, 0) };
    assert!(!conn.is_null());
    let token = conn as usize;

    let caller = thread::spawn(move || shoaldb_ping(token as *mut ShoalConnection).is_null());
    thread::sleep(Duration::from_millis(200));
    shoaldb_disconnect(conn);

    assert!(caller.join().unwrap());
    silent.join().unwrap();
}

#[test]
fn embedded_encrypted_open() {
    let temp = tempdir().unwrap();
    let db_path = temp.path().join("db");
    let short_key = temp.path().join("short.key");
    let key = temp.path().join("good.key");
    fs::write(&short_key, [7u8; 31]).unwrap();
    fs::write(&key, [7u8; 32]).unwrap();

    let path = c(db_path.to_str().unwrap());
    let short = c(short_key.to_str().unwrap());
    let good = c(key.to_str().unwrap());

    let engine = unsafe { shoaldb_open_encrypted(path.as_ptr(), short.as_ptr()) };
    assert!(engine.is_null());
    assert!(!shoaldb_last_error().is_null());
    assert!(!db_path.exists());

    let engine = unsafe { shoaldb_open_encrypted(path.as_ptr(), good.as_ptr()) };
    assert!(!engine.is_null());
    let insert = c(r#"{"op":"insert","collection":"secrets","doc":{"v":42}}"#);
    take(unsafe { shoaldb_execute(engine, insert.as_ptr()) });
    shoaldb_close(engine);

    let engine = unsafe { shoaldb_open_encrypted(path.as_ptr(), good.as_ptr()) };
    assert!(!engine.is_null());
    let find = c(r#"{"op":"find","collection":"secrets","query":{}}"#);
    let found = take(unsafe { shoaldb_execute(engine, find.as_ptr()) });
    assert_eq!(found["docs"][0]["v"], 42);
    shoaldb_close(engine);
    shoaldb_close(std::ptr::null_mut());
}

#[test]
fn embedded_transactions() {
    let temp = tempdir().unwrap();
    let path = c(temp.path().to_str().unwrap());
    let engine = unsafe { shoaldb_open(path.as_ptr()) };

    let run = |cmd: &str| {
        let cmd = c(cmd);
        take(unsafe { shoaldb_execute(engine, cmd.as_ptr()) })
    };
    run(r#"{"op":"begin_tx"}"#);
    run(r#"{"op":"insert","collection":"t","doc":{"x":1}}"#);
    let rolled = run(r#"{"op":"rollback_tx"}"#);
    assert_eq!(rolled["rolled_back"], true);
    let count = run(r#"{"op":"count","collection":"t"}"#);
    assert_eq!(count["count"], 0);

    run(r#"{"op":"begin_tx"}"#);
    let nested = run(r#"{"op":"begin_tx"}"#);
    assert_eq!(nested["error"]["kind"], "validation");

    shoaldb_close(engine);
}

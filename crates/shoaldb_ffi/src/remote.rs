//! Remote connection entry points.
//!
//! Every verb function returns a heap-owned JSON envelope, or null when the
//! connection handle is unknown, closed or broken. Invalid arguments (null
//! or non-UTF-8 strings) are reported as a `validation` envelope and leave
//! the connection usable.

use crate::error::{clear_last_error, set_last_error};
use crate::registry::{handle_to_token, token_to_handle, Registry};
use crate::strings::{borrow_opt_str, borrow_str, into_raw};
use parking_lot::Mutex;
use shoaldb_client::{ClientConfig, ClientResult, Connection, InterruptHandle};
use shoaldb_protocol::{error_response, ErrorKind};
use std::ffi::c_char;
use std::time::Duration;

/// An opaque connection handle.
///
/// Never dereference it; it is a registry token, not a pointer.
#[repr(C)]
pub struct ShoalConnection {
    _private: [u8; 0],
}

struct Remote {
    conn: Mutex<Connection>,
    interrupt: InterruptHandle,
}

static CONNECTIONS: Registry<Remote> = Registry::new();

/// Resolves the handle, checks the connection is usable, validates the
/// arguments and runs one verb.
fn dispatch<A>(
    handle: *mut ShoalConnection,
    args: Result<A, String>,
    op: impl FnOnce(&mut Connection, A) -> ClientResult<String>,
) -> *mut c_char {
    clear_last_error();
    let Some(remote) = handle_to_token(handle).and_then(|token| CONNECTIONS.get(token)) else {
        set_last_error("invalid or closed connection handle");
        return std::ptr::null_mut();
    };

    let mut conn = remote.conn.lock();
    if !conn.state().is_usable() {
        set_last_error(format!("connection is {:?}", conn.state()).to_lowercase());
        return std::ptr::null_mut();
    }
    let args = match args {
        Ok(args) => args,
        Err(message) => return into_raw(error_response(ErrorKind::Validation, message)),
    };

    match op(&mut conn, args) {
        Ok(response) => into_raw(response),
        Err(e) => {
            set_last_error(e.to_string());
            std::ptr::null_mut()
        }
    }
}

unsafe fn connect_with(host: *const c_char, port: u16, config: ClientConfig) -> *mut ShoalConnection {
    clear_last_error();
    let host = match borrow_str(host, "host") {
        Ok(host) => host,
        Err(message) => {
            set_last_error(message);
            return std::ptr::null_mut();
        }
    };
    match Connection::connect(host, port, config) {
        Ok(conn) => {
            let interrupt = conn.interrupt_handle();
            let token = CONNECTIONS.insert(Remote {
                conn: Mutex::new(conn),
                interrupt,
            });
            token_to_handle(token)
        }
        Err(e) => {
            set_last_error(e.to_string());
            std::ptr::null_mut()
        }
    }
}

fn millis_or(ms: u64, default: Duration) -> Duration {
    if ms == 0 {
        default
    } else {
        Duration::from_millis(ms)
    }
}

/// Connects to a server. Returns null on failure.
///
/// # Safety
///
/// `host` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_connect(host: *const c_char, port: u16) -> *mut ShoalConnection {
    connect_with(host, port, ClientConfig::default())
}

/// Connects with explicit timeouts in milliseconds (`0` keeps the default).
///
/// # Safety
///
/// `host` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_connect_with_timeouts(
    host: *const c_char,
    port: u16,
    connect_ms: u64,
    read_ms: u64,
    write_ms: u64,
) -> *mut ShoalConnection {
    let defaults = ClientConfig::default();
    let config = ClientConfig::default()
        .with_connect_timeout(millis_or(connect_ms, defaults.connect_timeout))
        .with_read_timeout(millis_or(read_ms, defaults.read_timeout))
        .with_write_timeout(millis_or(write_ms, defaults.write_timeout));
    connect_with(host, port, config)
}

/// Closes a connection and invalidates its handle. Null is a no-op.
///
/// A call in flight on another thread is aborted and returns null.
#[no_mangle]
pub extern "C" fn shoaldb_disconnect(conn: *mut ShoalConnection) {
    let Some(token) = handle_to_token(conn) else {
        return;
    };
    let Some(remote) = CONNECTIONS.remove(token) else {
        tracing::debug!(token, "disconnect of an unknown handle ignored");
        return;
    };
    remote.interrupt.interrupt();
    remote.conn.lock().close();
}

/// Health check.
#[no_mangle]
pub extern "C" fn shoaldb_ping(conn: *mut ShoalConnection) -> *mut c_char {
    dispatch(conn, Ok(()), |c, ()| c.ping())
}

/// Logs the server session in.
///
/// # Safety
///
/// String arguments must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_auth(
    conn: *mut ShoalConnection,
    user: *const c_char,
    password: *const c_char,
) -> *mut c_char {
    let args = borrow_str(user, "user")
        .and_then(|user| Ok((user, borrow_str(password, "password")?)));
    dispatch(conn, args, |c, (user, password)| c.auth(user, password))
}

/// Inserts one document.
///
/// # Safety
///
/// String arguments must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_insert(
    conn: *mut ShoalConnection,
    collection: *const c_char,
    doc_json: *const c_char,
) -> *mut c_char {
    let args = borrow_str(collection, "collection")
        .and_then(|coll| Ok((coll, borrow_str(doc_json, "doc_json")?)));
    dispatch(conn, args, |c, (coll, doc)| c.insert(coll, doc))
}

/// Inserts a JSON array of documents.
///
/// # Safety
///
/// String arguments must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_insert_many(
    conn: *mut ShoalConnection,
    collection: *const c_char,
    docs_json: *const c_char,
) -> *mut c_char {
    let args = borrow_str(collection, "collection")
        .and_then(|coll| Ok((coll, borrow_str(docs_json, "docs_json")?)));
    dispatch(conn, args, |c, (coll, docs)| c.insert_many(coll, docs))
}

/// Finds all matching documents.
///
/// # Safety
///
/// String arguments must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_find(
    conn: *mut ShoalConnection,
    collection: *const c_char,
    query_json: *const c_char,
) -> *mut c_char {
    let args = collection_and_query(collection, query_json);
    dispatch(conn, args, |c, (coll, query)| c.find(coll, query))
}

/// Finds the first matching document.
///
/// # Safety
///
/// String arguments must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_find_one(
    conn: *mut ShoalConnection,
    collection: *const c_char,
    query_json: *const c_char,
) -> *mut c_char {
    let args = collection_and_query(collection, query_json);
    dispatch(conn, args, |c, (coll, query)| c.find_one(coll, query))
}

/// Updates all matching documents.
///
/// # Safety
///
/// String arguments must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_update(
    conn: *mut ShoalConnection,
    collection: *const c_char,
    query_json: *const c_char,
    update_json: *const c_char,
) -> *mut c_char {
    let args = collection_query_update(collection, query_json, update_json);
    dispatch(conn, args, |c, (coll, query, update)| c.update(coll, query, update))
}

/// Updates the first matching document.
///
/// # Safety
///
/// String arguments must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_update_one(
    conn: *mut ShoalConnection,
    collection: *const c_char,
    query_json: *const c_char,
    update_json: *const c_char,
) -> *mut c_char {
    let args = collection_query_update(collection, query_json, update_json);
    dispatch(conn, args, |c, (coll, query, update)| {
        c.update_one(coll, query, update)
    })
}

/// Deletes all matching documents.
///
/// # Safety
///
/// String arguments must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_delete(
    conn: *mut ShoalConnection,
    collection: *const c_char,
    query_json: *const c_char,
) -> *mut c_char {
    let args = collection_and_query(collection, query_json);
    dispatch(conn, args, |c, (coll, query)| c.delete(coll, query))
}

/// Deletes the first matching document.
///
/// # Safety
///
/// String arguments must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_delete_one(
    conn: *mut ShoalConnection,
    collection: *const c_char,
    query_json: *const c_char,
) -> *mut c_char {
    let args = collection_and_query(collection, query_json);
    dispatch(conn, args, |c, (coll, query)| c.delete_one(coll, query))
}

/// Counts the documents of a collection.
///
/// # Safety
///
/// `collection` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_count(
    conn: *mut ShoalConnection,
    collection: *const c_char,
) -> *mut c_char {
    let args = borrow_str(collection, "collection");
    dispatch(conn, args, |c, coll| c.count(coll))
}

/// Creates a collection.
///
/// # Safety
///
/// `collection` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_create_collection(
    conn: *mut ShoalConnection,
    collection: *const c_char,
) -> *mut c_char {
    let args = borrow_str(collection, "collection");
    dispatch(conn, args, |c, coll| c.create_collection(coll))
}

/// Lists collection names.
#[no_mangle]
pub extern "C" fn shoaldb_list_collections(conn: *mut ShoalConnection) -> *mut c_char {
    dispatch(conn, Ok(()), |c, ()| c.list_collections())
}

/// Drops a collection.
///
/// # Safety
///
/// `collection` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_drop_collection(
    conn: *mut ShoalConnection,
    collection: *const c_char,
) -> *mut c_char {
    let args = borrow_str(collection, "collection");
    dispatch(conn, args, |c, coll| c.drop_collection(coll))
}

/// Compacts a collection.
///
/// # Safety
///
/// `collection` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_compact(
    conn: *mut ShoalConnection,
    collection: *const c_char,
) -> *mut c_char {
    let args = borrow_str(collection, "collection");
    dispatch(conn, args, |c, coll| c.compact(coll))
}

/// Runs an aggregation pipeline.
///
/// # Safety
///
/// String arguments must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_aggregate(
    conn: *mut ShoalConnection,
    collection: *const c_char,
    pipeline_json: *const c_char,
) -> *mut c_char {
    let args = borrow_str(collection, "collection")
        .and_then(|coll| Ok((coll, borrow_str(pipeline_json, "pipeline_json")?)));
    dispatch(conn, args, |c, (coll, pipeline)| c.aggregate(coll, pipeline))
}

/// Creates a single-field index.
///
/// # Safety
///
/// String arguments must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_create_index(
    conn: *mut ShoalConnection,
    collection: *const c_char,
    field: *const c_char,
) -> *mut c_char {
    let args = collection_and(collection, field, "field");
    dispatch(conn, args, |c, (coll, field)| c.create_index(coll, field))
}

/// Creates a single-field unique index.
///
/// # Safety
///
/// String arguments must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_create_unique_index(
    conn: *mut ShoalConnection,
    collection: *const c_char,
    field: *const c_char,
) -> *mut c_char {
    let args = collection_and(collection, field, "field");
    dispatch(conn, args, |c, (coll, field)| c.create_unique_index(coll, field))
}

/// Creates a composite index over a JSON array of field names.
///
/// # Safety
///
/// String arguments must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_create_composite_index(
    conn: *mut ShoalConnection,
    collection: *const c_char,
    fields_json: *const c_char,
) -> *mut c_char {
    let args = collection_and(collection, fields_json, "fields_json");
    dispatch(conn, args, |c, (coll, fields)| {
        c.create_composite_index(coll, fields)
    })
}

/// Creates a text index over a JSON array of field names.
///
/// # Safety
///
/// String arguments must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_create_text_index(
    conn: *mut ShoalConnection,
    collection: *const c_char,
    fields_json: *const c_char,
) -> *mut c_char {
    let args = collection_and(collection, fields_json, "fields_json");
    dispatch(conn, args, |c, (coll, fields)| c.create_text_index(coll, fields))
}

/// Lists the indexes of a collection.
///
/// # Safety
///
/// `collection` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_list_indexes(
    conn: *mut ShoalConnection,
    collection: *const c_char,
) -> *mut c_char {
    let args = borrow_str(collection, "collection");
    dispatch(conn, args, |c, coll| c.list_indexes(coll))
}

/// Drops an index by name.
///
/// # Safety
///
/// String arguments must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_drop_index(
    conn: *mut ShoalConnection,
    collection: *const c_char,
    index: *const c_char,
) -> *mut c_char {
    let args = collection_and(collection, index, "index");
    dispatch(conn, args, |c, (coll, index)| c.drop_index(coll, index))
}

/// Ranked text search within a collection (`limit <= 0` uses the default).
///
/// # Safety
///
/// String arguments must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_text_search(
    conn: *mut ShoalConnection,
    collection: *const c_char,
    query: *const c_char,
    limit: i32,
) -> *mut c_char {
    let args = collection_and(collection, query, "query");
    dispatch(conn, args, |c, (coll, query)| {
        c.text_search(coll, query, i64::from(limit))
    })
}

/// Ranked search over blob objects. `bucket` may be null.
///
/// # Safety
///
/// String arguments must be null (where allowed) or valid NUL-terminated
/// strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_search(
    conn: *mut ShoalConnection,
    query: *const c_char,
    bucket: *const c_char,
    limit: i32,
) -> *mut c_char {
    let args = borrow_str(query, "query")
        .and_then(|query| Ok((query, borrow_opt_str(bucket, "bucket")?)));
    dispatch(conn, args, |c, (query, bucket)| {
        c.search(query, bucket, i64::from(limit))
    })
}

/// Creates a bucket.
///
/// # Safety
///
/// `bucket` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_create_bucket(
    conn: *mut ShoalConnection,
    bucket: *const c_char,
) -> *mut c_char {
    let args = borrow_str(bucket, "bucket");
    dispatch(conn, args, |c, bucket| c.create_bucket(bucket))
}

/// Lists buckets.
#[no_mangle]
pub extern "C" fn shoaldb_list_buckets(conn: *mut ShoalConnection) -> *mut c_char {
    dispatch(conn, Ok(()), |c, ()| c.list_buckets())
}

/// Deletes a bucket and its objects.
///
/// # Safety
///
/// `bucket` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_delete_bucket(
    conn: *mut ShoalConnection,
    bucket: *const c_char,
) -> *mut c_char {
    let args = borrow_str(bucket, "bucket");
    dispatch(conn, args, |c, bucket| c.delete_bucket(bucket))
}

/// Stores an object. `content_type` and `metadata_json` may be null.
///
/// # Safety
///
/// String arguments must be null (where allowed) or valid NUL-terminated
/// strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_put_object(
    conn: *mut ShoalConnection,
    bucket: *const c_char,
    key: *const c_char,
    data_b64: *const c_char,
    content_type: *const c_char,
    metadata_json: *const c_char,
) -> *mut c_char {
    let args = (|| {
        Ok::<_, String>((
            borrow_str(bucket, "bucket")?,
            borrow_str(key, "key")?,
            borrow_str(data_b64, "data_b64")?,
            borrow_opt_str(content_type, "content_type")?,
            borrow_opt_str(metadata_json, "metadata_json")?,
        ))
    })();
    dispatch(conn, args, |c, (bucket, key, data, content_type, metadata)| {
        c.put_object(bucket, key, data, content_type, metadata)
    })
}

/// Fetches an object with its payload.
///
/// # Safety
///
/// String arguments must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_get_object(
    conn: *mut ShoalConnection,
    bucket: *const c_char,
    key: *const c_char,
) -> *mut c_char {
    let args = bucket_and_key(bucket, key);
    dispatch(conn, args, |c, (bucket, key)| c.get_object(bucket, key))
}

/// Fetches object metadata.
///
/// # Safety
///
/// String arguments must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_head_object(
    conn: *mut ShoalConnection,
    bucket: *const c_char,
    key: *const c_char,
) -> *mut c_char {
    let args = bucket_and_key(bucket, key);
    dispatch(conn, args, |c, (bucket, key)| c.head_object(bucket, key))
}

/// Deletes an object.
///
/// # Safety
///
/// String arguments must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_delete_object(
    conn: *mut ShoalConnection,
    bucket: *const c_char,
    key: *const c_char,
) -> *mut c_char {
    let args = bucket_and_key(bucket, key);
    dispatch(conn, args, |c, (bucket, key)| c.delete_object(bucket, key))
}

/// Lists objects by key. `prefix` may be null; `limit <= 0` uses the default.
///
/// # Safety
///
/// String arguments must be null (where allowed) or valid NUL-terminated
/// strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_list_objects(
    conn: *mut ShoalConnection,
    bucket: *const c_char,
    prefix: *const c_char,
    limit: i32,
) -> *mut c_char {
    let args = borrow_str(bucket, "bucket")
        .and_then(|bucket| Ok((bucket, borrow_opt_str(prefix, "prefix")?)));
    dispatch(conn, args, |c, (bucket, prefix)| {
        c.list_objects(bucket, prefix, i64::from(limit))
    })
}

/// Opens a transaction on the connection.
#[no_mangle]
pub extern "C" fn shoaldb_begin_tx(conn: *mut ShoalConnection) -> *mut c_char {
    dispatch(conn, Ok(()), |c, ()| c.begin_tx())
}

/// Commits the open transaction.
#[no_mangle]
pub extern "C" fn shoaldb_commit_tx(conn: *mut ShoalConnection) -> *mut c_char {
    dispatch(conn, Ok(()), |c, ()| c.commit_tx())
}

/// Discards the open transaction.
#[no_mangle]
pub extern "C" fn shoaldb_rollback_tx(conn: *mut ShoalConnection) -> *mut c_char {
    dispatch(conn, Ok(()), |c, ()| c.rollback_tx())
}

unsafe fn collection_and<'a>(
    collection: *const c_char,
    other: *const c_char,
    other_name: &str,
) -> Result<(&'a str, &'a str), String> {
    Ok((
        borrow_str(collection, "collection")?,
        borrow_str(other, other_name)?,
    ))
}

unsafe fn collection_and_query<'a>(
    collection: *const c_char,
    query_json: *const c_char,
) -> Result<(&'a str, &'a str), String> {
    collection_and(collection, query_json, "query_json")
}

unsafe fn collection_query_update<'a>(
    collection: *const c_char,
    query_json: *const c_char,
    update_json: *const c_char,
) -> Result<(&'a str, &'a str, &'a str), String> {
    Ok((
        borrow_str(collection, "collection")?,
        borrow_str(query_json, "query_json")?,
        borrow_str(update_json, "update_json")?,
    ))
}

unsafe fn bucket_and_key<'a>(
    bucket: *const c_char,
    key: *const c_char,
) -> Result<(&'a str, &'a str), String> {
    Ok((borrow_str(bucket, "bucket")?, borrow_str(key, "key")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_handle_returns_null() {
        let handle: *mut ShoalConnection = token_to_handle(u64::MAX);
        assert!(shoaldb_ping(handle).is_null());
        assert!(!crate::error::shoaldb_last_error().is_null());
        assert!(shoaldb_ping(std::ptr::null_mut()).is_null());
    }

    #[test]
    fn disconnect_null_and_unknown_are_noops() {
        shoaldb_disconnect(std::ptr::null_mut());
        shoaldb_disconnect(token_to_handle(u64::MAX - 1));
    }

    #[test]
    fn connect_to_closed_port_returns_null() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let host = std::ffi::CString::new("127.0.0.1").unwrap();
        let conn = unsafe { shoaldb_connect_with_timeouts(host.as_ptr(), port, 200, 0, 0) };
        assert!(conn.is_null());
        assert!(!crate::error::shoaldb_last_error().is_null());
    }

    #[test]
    fn connect_with_null_host_returns_null() {
        assert!(unsafe { shoaldb_connect(std::ptr::null(), 5433) }.is_null());
    }
}

//! Embedded engine entry points.
//!
//! An engine handle owns one database directory and one command session.
//! `shoaldb_execute` speaks the same verb catalog as the server, including
//! the transaction verbs, which are scoped to the handle.

use crate::error::{clear_last_error, set_last_error};
use crate::registry::{handle_to_token, token_to_handle, Registry};
use crate::strings::{borrow_str, into_raw};
use parking_lot::Mutex;
use shoaldb_core::{Config, CoreResult, Database, Session};
use shoaldb_protocol::{error_response, ErrorKind};
use std::ffi::c_char;
use std::sync::Arc;

/// An opaque engine handle.
///
/// Never dereference it; it is a registry token, not a pointer.
#[repr(C)]
pub struct ShoalEngine {
    _private: [u8; 0],
}

struct Engine {
    session: Mutex<Option<Session>>,
}

static ENGINES: Registry<Engine> = Registry::new();

fn register(opened: CoreResult<Database>) -> *mut ShoalEngine {
    match opened {
        Ok(db) => {
            let session = Session::new(Arc::new(db));
            let token = ENGINES.insert(Engine {
                session: Mutex::new(Some(session)),
            });
            token_to_handle(token)
        }
        Err(e) => {
            set_last_error(e.to_string());
            std::ptr::null_mut()
        }
    }
}

/// Opens or creates a database directory. Returns null on failure.
///
/// # Safety
///
/// `path` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_open(path: *const c_char) -> *mut ShoalEngine {
    clear_last_error();
    match borrow_str(path, "path") {
        Ok(path) => register(Database::open(path, Config::default())),
        Err(message) => {
            set_last_error(message);
            std::ptr::null_mut()
        }
    }
}

/// Opens or creates an encrypted database directory.
///
/// `key_path` must name a file of exactly 32 raw bytes. On any key problem
/// the call returns null and nothing is created under `path`.
///
/// # Safety
///
/// `path` and `key_path` must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_open_encrypted(
    path: *const c_char,
    key_path: *const c_char,
) -> *mut ShoalEngine {
    clear_last_error();
    let args = borrow_str(path, "path").and_then(|path| Ok((path, borrow_str(key_path, "key_path")?)));
    match args {
        Ok((path, key_path)) => register(Database::open_encrypted(path, key_path, Config::default())),
        Err(message) => {
            set_last_error(message);
            std::ptr::null_mut()
        }
    }
}

/// Closes an engine and invalidates its handle. Null is a no-op.
///
/// An open transaction is rolled back. Teardown errors are logged only.
#[no_mangle]
pub extern "C" fn shoaldb_close(engine: *mut ShoalEngine) {
    let Some(token) = handle_to_token(engine) else {
        return;
    };
    let Some(engine) = ENGINES.remove(token) else {
        tracing::debug!(token, "close of an unknown handle ignored");
        return;
    };
    let Some(session) = engine.session.lock().take() else {
        return;
    };

    let db = Arc::clone(session.database());
    drop(session);
    match Arc::try_unwrap(db) {
        Ok(db) => {
            if let Err(e) = db.close() {
                tracing::warn!(token, error = %e, "error while closing database");
            }
        }
        Err(_) => tracing::debug!(token, "database still shared, skipping final snapshot"),
    }
}

/// Executes one JSON command and returns the response envelope.
///
/// Returns null only if the handle is unknown or closed.
///
/// # Safety
///
/// `cmd_json` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_execute(
    engine: *mut ShoalEngine,
    cmd_json: *const c_char,
) -> *mut c_char {
    clear_last_error();
    let Some(engine) = handle_to_token(engine).and_then(|token| ENGINES.get(token)) else {
        set_last_error("invalid or closed engine handle");
        return std::ptr::null_mut();
    };

    let mut slot = engine.session.lock();
    let Some(session) = slot.as_mut() else {
        set_last_error("engine is closed");
        return std::ptr::null_mut();
    };

    let response = match borrow_str(cmd_json, "cmd_json") {
        Ok(command) => session.execute(command),
        Err(message) => error_response(ErrorKind::Validation, message),
    };
    into_raw(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::{CStr, CString};

    fn execute(engine: *mut ShoalEngine, cmd: &str) -> String {
        let cmd = CString::new(cmd).unwrap();
        let ptr = unsafe { shoaldb_execute(engine, cmd.as_ptr()) };
        assert!(!ptr.is_null());
        let text = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_owned();
        unsafe { crate::strings::shoaldb_free_string(ptr) };
        text
    }

    #[test]
    fn open_execute_close() {
        let temp = tempfile::tempdir().unwrap();
        let path = CString::new(temp.path().to_str().unwrap()).unwrap();
        let engine = unsafe { shoaldb_open(path.as_ptr()) };
        assert!(!engine.is_null());

        assert_eq!(execute(engine, r#"{"op":"ping"}"#), r#"{"ok":true,"pong":true}"#);
        let response = execute(engine, r#"{"op":"insert","collection":"c","doc":{}}"#);
        assert_eq!(response, r#"{"id":1,"ok":true}"#);

        shoaldb_close(engine);
        let cmd = CString::new(r#"{"op":"ping"}"#).unwrap();
        assert!(unsafe { shoaldb_execute(engine, cmd.as_ptr()) }.is_null());
        shoaldb_close(engine);
    }

    #[test]
    fn null_command_is_validation_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = CString::new(temp.path().to_str().unwrap()).unwrap();
        let engine = unsafe { shoaldb_open(path.as_ptr()) };

        let ptr = unsafe { shoaldb_execute(engine, std::ptr::null()) };
        let text = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_owned();
        unsafe { crate::strings::shoaldb_free_string(ptr) };
        assert!(text.contains(r#""kind":"validation""#));

        shoaldb_close(engine);
    }

    #[test]
    fn close_null_is_noop() {
        shoaldb_close(std::ptr::null_mut());
        assert!(unsafe { shoaldb_open(std::ptr::null()) }.is_null());
    }

    #[test]
    fn registry_drops_closed_engines() {
        let temp = tempfile::tempdir().unwrap();
        let path = CString::new(temp.path().to_str().unwrap()).unwrap();
        let engine = unsafe { shoaldb_open(path.as_ptr()) };
        let token = handle_to_token(engine).unwrap();
        assert!(ENGINES.get(token).is_some());
        shoaldb_close(engine);
        assert!(ENGINES.get(token).is_none());
    }
}

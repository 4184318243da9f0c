//! Ownership of response strings handed across the boundary.
//!
//! Every string returned to a caller is a `CString` turned into a raw
//! pointer and recorded in a process-wide ledger. `shoaldb_free_string` is
//! the only way back: it checks the ledger before reclaiming the buffer, so
//! a double free or a foreign pointer is caught instead of corrupting the
//! allocator.

use crate::error::set_last_error;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr, CString};

static LEDGER: Mutex<BTreeSet<usize>> = Mutex::new(BTreeSet::new());

/// Hands `text` to the caller as a NUL-terminated heap string.
///
/// Returns null (with the last error set) if `text` contains a NUL byte.
pub(crate) fn into_raw(text: String) -> *mut c_char {
    match CString::new(text) {
        Ok(cstring) => {
            let ptr = cstring.into_raw();
            LEDGER.lock().insert(ptr as usize);
            ptr
        }
        Err(_) => {
            set_last_error("response contains an interior NUL byte");
            std::ptr::null_mut()
        }
    }
}

/// Borrows a caller-supplied C string as UTF-8.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that outlives
/// the returned borrow.
pub(crate) unsafe fn borrow_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, String> {
    if ptr.is_null() {
        return Err(format!("{what} is null"));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| format!("{what} is not valid UTF-8"))
}

/// Borrows an optional caller-supplied C string; null means absent.
///
/// # Safety
///
/// Same as [`borrow_str`].
pub(crate) unsafe fn borrow_opt_str<'a>(
    ptr: *const c_char,
    what: &str,
) -> Result<Option<&'a str>, String> {
    if ptr.is_null() {
        return Ok(None);
    }
    borrow_str(ptr, what).map(Some)
}

/// Releases a string returned by any `shoaldb_*` function.
///
/// Null is a no-op. Releasing a pointer twice, or one that did not come
/// from this library, aborts the process.
///
/// # Safety
///
/// `ptr` must not be used after this call.
#[no_mangle]
pub unsafe extern "C" fn shoaldb_free_string(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }
    if !LEDGER.lock().remove(&(ptr as usize)) {
        tracing::error!(
            ptr = ptr as usize,
            "shoaldb_free_string called with an unknown or already released pointer"
        );
        std::process::abort();
    }
    drop(CString::from_raw(ptr));
}

/// Number of returned strings not yet released.
#[no_mangle]
pub extern "C" fn shoaldb_live_strings() -> usize {
    LEDGER.lock().len()
}

//! Thread-local description of the last boundary failure.

use std::cell::RefCell;
use std::ffi::{c_char, CString};

// Thread-local storage for last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Sets the last error message.
pub(crate) fn set_last_error(message: impl Into<String>) {
    let mut msg = message.into();
    msg.retain(|c| c != '\0');
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clears the last error.
pub(crate) fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Returns the last boundary failure on this thread, or null.
///
/// Only calls that return null set this. The pointer is owned by the
/// library; do not free it. It stays valid until the next `shoaldb_*` call
/// on the same thread.
#[no_mangle]
pub extern "C" fn shoaldb_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match e.borrow().as_ref() {
        Some(cstr) => cstr.as_ptr(),
        None => std::ptr::null(),
    })
}

/// Clears the last error message.
#[no_mangle]
pub extern "C" fn shoaldb_clear_error() {
    clear_last_error();
}

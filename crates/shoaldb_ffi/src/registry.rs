//! Token → object registry for boundary handles.
//!
//! Callers never see a Rust pointer. A handle is a `u64` id disguised as an
//! opaque pointer; the registry maps it back to a shared object. Ids come
//! from one process-wide counter and are never reissued, so a destroyed
//! handle can only ever miss.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// A thread-safe map from token to object.
pub(crate) struct Registry<T> {
    slots: Mutex<BTreeMap<u64, Arc<T>>>,
}

impl<T> Registry<T> {
    /// Creates an empty registry.
    pub(crate) const fn new() -> Self {
        Self {
            slots: Mutex::new(BTreeMap::new()),
        }
    }

    /// Registers `value` and returns its fresh token.
    pub(crate) fn insert(&self, value: T) -> u64 {
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        self.slots.lock().insert(token, Arc::new(value));
        token
    }

    /// Looks up a live token.
    pub(crate) fn get(&self, token: u64) -> Option<Arc<T>> {
        self.slots.lock().get(&token).cloned()
    }

    /// Unregisters a token. Later lookups of it fail.
    pub(crate) fn remove(&self, token: u64) -> Option<Arc<T>> {
        self.slots.lock().remove(&token)
    }

    /// Number of live handles.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

/// Converts a token into the opaque pointer handed to callers.
pub(crate) fn token_to_handle<H>(token: u64) -> *mut H {
    token as usize as *mut H
}

/// Recovers the token from a caller-supplied handle.
pub(crate) fn handle_to_token<H>(handle: *mut H) -> Option<u64> {
    if handle.is_null() {
        None
    } else {
        Some(handle as usize as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_never_reused() {
        let registry = Registry::new();
        let a = registry.insert("a");
        let b = registry.insert("b");
        assert_ne!(a, b);

        assert_eq!(*registry.remove(a).unwrap(), "a");
        assert!(registry.get(a).is_none());
        assert!(registry.remove(a).is_none());

        let c = registry.insert("c");
        assert!(c > b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn tokens_are_unique_across_registries() {
        let left: Registry<u8> = Registry::new();
        let right: Registry<u8> = Registry::new();
        let a = left.insert(1);
        let b = right.insert(2);
        assert_ne!(a, b);
        assert!(left.get(b).is_none());
    }

    #[test]
    fn handle_conversion() {
        struct Opaque;
        let handle: *mut Opaque = token_to_handle(42);
        assert_eq!(handle_to_token(handle), Some(42));
        assert_eq!(handle_to_token::<Opaque>(std::ptr::null_mut()), None);
    }
}

//! Shared key/value store visible to all callbacks.
//!
//! One mutex guards the whole map, and callback delivery holds it for the
//! entire callback body, so callbacks can compose reads and writes without
//! torn updates. Values are free-form JSON.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

/// The map type handed to callbacks through
/// [`Context::store`](crate::Context::store).
pub type StoreMap = HashMap<String, Value>;

/// Mutex-guarded store shared by every controller.
#[derive(Debug, Default)]
pub(crate) struct Store {
    map: Mutex<StoreMap>,
}

impl Store {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Read a value by key, cloning it out of the map.
    pub(crate) fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// Insert or replace a value.
    pub(crate) fn set(&self, key: impl Into<String>, value: Value) {
        self.lock().insert(key.into(), value);
    }

    /// Take the store lock. A callback that panicked while holding the
    /// guard poisons it; delivery must keep working afterwards, so the
    /// poison is stripped.
    pub(crate) fn lock(&self) -> MutexGuard<'_, StoreMap> {
        self.map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_set() {
        let store = Store::new();
        assert!(store.get("missing").is_none());

        store.set("count", json!(3));
        assert_eq!(store.get("count"), Some(json!(3)));

        store.set("count", json!(4));
        assert_eq!(store.get("count"), Some(json!(4)));
    }

    #[test]
    fn test_survives_poison() {
        let store = std::sync::Arc::new(Store::new());
        store.set("k", json!("v"));

        let poisoner = std::sync::Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock();
            panic!("poison the store");
        })
        .join();

        assert_eq!(store.get("k"), Some(json!("v")));
    }
}

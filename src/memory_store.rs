//! In-peer key/value memory store.
//!
//! Single lock, last-write-wins. Remote `SET_MEM`/`GET_MEM` is just this
//! store proxied through another peer's request handler ("remote
//! memory") — there is no cross-peer transaction here.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: String, value: serde_json::Value) {
        self.inner.lock().unwrap().insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.lock().unwrap().get(key).cloned()
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().unwrap().remove(key).is_some()
    }

    pub fn list_keys(&self) -> Vec<String> {
        self.inner.lock().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_round_trips() {
        let store = MemoryStore::new();
        store.set("k".into(), json!("v"));
        assert_eq!(store.get("k"), Some(json!("v")));
    }

    #[test]
    fn overwrite_is_last_write_wins() {
        let store = MemoryStore::new();
        store.set("k".into(), json!("v1"));
        store.set("k".into(), json!("v2"));
        assert_eq!(store.get("k"), Some(json!("v2")));
    }

    #[test]
    fn delete_removes_the_key() {
        let store = MemoryStore::new();
        store.set("k".into(), json!(1));
        assert!(store.delete("k"));
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn unknown_key_reads_as_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing"), None);
    }
}

//! Session-scoped key-value store for client state.
//!
//! One store backs one browsing session. The feed cache, scroll anchors and
//! navigation flags all live here under `<namespace>:<page>` keys, with JSON
//! values. Nothing is written to disk and nothing is shared across sessions.
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Namespace for cached page snapshots.
pub const FEED_CACHE_NAMESPACE: &str = "feed-cache";
/// Namespace for per-page scroll offsets.
pub const SCROLL_NAMESPACE: &str = "scroll";
/// Namespace for pending backward-navigation flags.
pub const NAV_BACKWARD_NAMESPACE: &str = "nav-backward";

/// Build the key for `page` under `namespace`, e.g. `feed-cache:3`.
pub fn page_key(namespace: &str, page: u32) -> String {
    format!("{namespace}:{page}")
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to encode session value for '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Handle to a session's key-value store.
///
/// Cloning yields another handle to the same session; the components that
/// share a session each hold one.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        // State is plain strings; a panic mid-insert cannot leave it torn.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get_raw(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    pub fn set_raw(&self, key: &str, value: String) {
        self.entries().insert(key.to_string(), value);
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.entries().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    /// Decode the JSON value at `key`.
    ///
    /// An entry that no longer decodes is treated as absent and logged.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key)?;
        decode(key, &raw)
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.set_raw(key, raw);
        Ok(())
    }

    /// Remove the entry at `key` and decode it.
    pub fn take_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.remove(key)?;
        decode(key, &raw)
    }

    /// Keys under `namespace`, sorted.
    pub fn keys_in(&self, namespace: &str) -> Vec<String> {
        let prefix = format!("{namespace}:");
        let mut keys: Vec<String> = self
            .entries()
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Discarding undecodable session entry");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_key_shape() {
        assert_eq!(page_key(FEED_CACHE_NAMESPACE, 3), "feed-cache:3");
        assert_eq!(page_key(SCROLL_NAMESPACE, 1), "scroll:1");
        assert_eq!(page_key(NAV_BACKWARD_NAMESPACE, 12), "nav-backward:12");
    }

    #[test]
    fn test_clones_share_entries() {
        let store = SessionStore::new();
        let other = store.clone();
        store.set_raw("a", "1".to_string());
        assert_eq!(other.get_raw("a").as_deref(), Some("1"));
    }

    #[test]
    fn test_json_round_trip_and_take() {
        let store = SessionStore::new();
        store.set_json("scroll:2", &420.5_f64).unwrap();
        assert_eq!(store.get_json::<f64>("scroll:2"), Some(420.5));
        assert_eq!(store.take_json::<f64>("scroll:2"), Some(420.5));
        assert!(!store.contains("scroll:2"));
    }

    #[test]
    fn test_undecodable_entry_reads_as_absent() {
        let store = SessionStore::new();
        store.set_raw("scroll:1", "not json".to_string());
        assert_eq!(store.get_json::<f64>("scroll:1"), None);
    }

    #[test]
    fn test_keys_in_namespace_no_false_matches() {
        let store = SessionStore::new();
        store.set_raw("scroll:2", "0".to_string());
        store.set_raw("scroll:1", "0".to_string());
        store.set_raw("scrollbar:1", "0".to_string());
        store.set_raw("feed-cache:1", "{}".to_string());

        assert_eq!(store.keys_in(SCROLL_NAMESPACE), vec!["scroll:1", "scroll:2"]);
        assert_eq!(store.len(), 4);
    }
}

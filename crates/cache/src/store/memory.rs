//! In-process store backend.
//!
//! A single-node implementation of [`StoreBackend`] with the same
//! observable semantics as the networked store: TTL-based lazy expiry,
//! atomic set-if-absent, and set-valued keys. Used by the test suites and
//! by single-node deployments that do not need a shared store.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{CacheError, Result};
use crate::store::StoreBackend;

#[derive(Debug, Clone)]
enum StoredValue {
    Raw(String),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// In-memory keyspace with TTL support.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries under `key` before reading, mirroring the
    /// networked store's lazy expiry.
    fn live_entry<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a mut Entry> {
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }

    fn wrong_type(key: &str) -> CacheError {
        CacheError::InvalidRequest(format!("wrong value type at key {key}"))
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        match Self::live_entry(&mut entries, key, Instant::now()) {
            Some(entry) => match &entry.value {
                StoredValue::Raw(raw) => Ok(Some(raw.clone())),
                StoredValue::Set(_) => Err(Self::wrong_type(key)),
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: StoredValue::Raw(value),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let existed = Self::live_entry(&mut entries, key, now).is_some();
        entries.remove(key);
        Ok(existed)
    }

    async fn set_if_absent(&self, key: &str, value: String, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if Self::live_entry(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: StoredValue::Raw(value),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match Self::live_entry(&mut entries, key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(Self::live_entry(&mut entries, key, now)
            .and_then(|entry| entry.expires_at)
            .map(|deadline| deadline.saturating_duration_since(now)))
    }

    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, String>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let mut out = HashMap::new();
        for key in keys {
            if let Some(entry) = Self::live_entry(&mut entries, key, now)
                && let StoredValue::Raw(raw) = &entry.value
            {
                out.insert(key.clone(), raw.clone());
            }
        }
        Ok(out)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match Self::live_entry(&mut entries, key, now) {
            Some(entry) => match &mut entry.value {
                StoredValue::Set(members) => {
                    members.insert(member.to_string());
                    entry.expires_at = Some(now + ttl);
                    Ok(())
                }
                StoredValue::Raw(_) => Err(Self::wrong_type(key)),
            },
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: StoredValue::Set(BTreeSet::from([member.to_string()])),
                        expires_at: Some(now + ttl),
                    },
                );
                Ok(())
            }
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if let Some(entry) = Self::live_entry(&mut entries, key, now) {
            match &mut entry.value {
                StoredValue::Set(members) => {
                    members.remove(member);
                }
                StoredValue::Raw(_) => return Err(Self::wrong_type(key)),
            }
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut entries = self.entries.lock().await;
        match Self::live_entry(&mut entries, key, Instant::now()) {
            Some(entry) => match &entry.value {
                StoredValue::Set(members) => Ok(members.iter().cloned().collect()),
                StoredValue::Raw(_) => Err(Self::wrong_type(key)),
            },
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store.set("k", "v".to_string(), None).await.expect("set");
        assert_eq!(store.get("k").await.expect("get"), Some("v".to_string()));
        assert!(store.delete("k").await.expect("delete"));
        assert!(!store.delete("k").await.expect("second delete"));
        assert_eq!(store.get("k").await.expect("get"), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry_is_lazy_but_observed() {
        let store = MemoryStore::new();
        store
            .set("k", "v".to_string(), Some(Duration::from_millis(20)))
            .await
            .expect("set");
        assert!(store.ttl("k").await.expect("ttl").is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.expect("get"), None);
        assert_eq!(store.ttl("k").await.expect("ttl"), None);
    }

    #[tokio::test]
    async fn test_set_if_absent_single_winner() {
        let store = MemoryStore::new();
        let first = store
            .set_if_absent("lock", "a".to_string(), Duration::from_secs(10))
            .await
            .expect("first");
        let second = store
            .set_if_absent("lock", "b".to_string(), Duration::from_secs(10))
            .await
            .expect("second");
        assert!(first);
        assert!(!second);
        assert_eq!(store.get("lock").await.expect("get"), Some("a".to_string()));
    }

    #[tokio::test]
    async fn test_set_if_absent_reclaims_expired_key() {
        let store = MemoryStore::new();
        assert!(
            store
                .set_if_absent("lock", "a".to_string(), Duration::from_millis(20))
                .await
                .expect("first")
        );
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(
            store
                .set_if_absent("lock", "b".to_string(), Duration::from_secs(10))
                .await
                .expect("after expiry")
        );
    }

    #[tokio::test]
    async fn test_set_operations() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.set_add("s", "a", ttl).await.expect("add a");
        store.set_add("s", "b", ttl).await.expect("add b");
        store.set_add("s", "a", ttl).await.expect("re-add a");
        let mut members = store.set_members("s").await.expect("members");
        members.sort();
        assert_eq!(members, vec!["a".to_string(), "b".to_string()]);

        store.set_remove("s", "a").await.expect("remove");
        assert_eq!(store.set_members("s").await.expect("members"), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_scan_prefix() {
        let store = MemoryStore::new();
        store.set("user_cart:1", "a".to_string(), None).await.expect("set");
        store.set("user_cart:2", "b".to_string(), None).await.expect("set");
        store.set("session_cart:x", "c".to_string(), None).await.expect("set");
        let mut keys = store.scan_prefix("user_cart:").await.expect("scan");
        keys.sort();
        assert_eq!(keys, vec!["user_cart:1".to_string(), "user_cart:2".to_string()]);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_an_error() {
        let store = MemoryStore::new();
        store.set("k", "raw".to_string(), None).await.expect("set");
        assert!(store.set_add("k", "m", Duration::from_secs(1)).await.is_err());
        store.set_add("s", "m", Duration::from_secs(60)).await.expect("add");
        assert!(store.get("s").await.is_err());
    }
}

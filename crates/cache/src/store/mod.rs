//! Keyed store access.
//!
//! [`StoreBackend`] is the seam to the networked key-value store; the
//! in-process [`memory::MemoryStore`] implements it for tests and
//! single-node deployments. [`KeyedStore`] wraps a backend with the typed
//! JSON payload handling, the per-call timeout, and the corrupted-payload
//! policy every component in this crate relies on.

pub mod memory;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::{CacheError, Result};

/// Raw operations against the networked key-value store.
///
/// All operations are safe to call concurrently. Transport failures
/// surface as [`CacheError::StoreUnavailable`]; implementations must not
/// report partial success.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Fetch a raw value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a raw value, with an optional TTL.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Remove a key. Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Atomic write-if-absent with TTL - the lock primitive. Returns
    /// whether this caller performed the write.
    async fn set_if_absent(&self, key: &str, value: String, ttl: Duration) -> Result<bool>;

    /// Reset a key's TTL. Returns false if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remaining TTL for a key, if it exists and has one.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Fetch many keys; absent keys are simply missing from the map.
    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, String>>;

    /// All keys starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Add a member to a set-valued key, refreshing the set's TTL.
    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<()>;

    /// Remove a member from a set-valued key.
    async fn set_remove(&self, key: &str, member: &str) -> Result<()>;

    /// All members of a set-valued key.
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;
}

/// Typed wrapper over a [`StoreBackend`].
///
/// Every call is bounded by the configured per-call timeout; an elapsed
/// timeout maps to [`CacheError::StoreUnavailable`], never to "absent" -
/// absence triggers cart recreation while unavailability must trigger a
/// caller retry, and conflating the two silently empties carts.
#[derive(Clone)]
pub struct KeyedStore {
    backend: Arc<dyn StoreBackend>,
    call_timeout: Duration,
}

impl KeyedStore {
    /// Wrap a backend with a per-call timeout.
    #[must_use]
    pub fn new(backend: Arc<dyn StoreBackend>, call_timeout: Duration) -> Self {
        Self {
            backend,
            call_timeout,
        }
    }

    /// Bound a backend call by the per-call timeout.
    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>> + Send) -> Result<T> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::StoreUnavailable(format!(
                "store call exceeded {:?}",
                self.call_timeout
            ))),
        }
    }

    /// Decode a stored payload, naming the key in the failure.
    fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
        serde_json::from_str(raw).map_err(|source| CacheError::Deserialization {
            key: key.to_string(),
            source,
        })
    }

    /// Fetch and deserialize a JSON payload.
    ///
    /// A corrupted payload is deleted and reported as absent rather than
    /// returned; the durable store remains the recovery path.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.bounded(self.backend.get(key)).await? else {
            return Ok(None);
        };
        match Self::decode(key, &raw) {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                warn!(key, %error, "deleting corrupted cache payload");
                // Best effort; the entry would age out via TTL anyway.
                let _ = self.bounded(self.backend.delete(key)).await;
                Ok(None)
            }
        }
    }

    /// Serialize and write a JSON payload.
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let raw = serde_json::to_string(value).map_err(|source| CacheError::Serialization {
            key: key.to_string(),
            source,
        })?;
        self.bounded(self.backend.set(key, raw, ttl)).await
    }

    /// Remove a key. Returns whether the key existed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.bounded(self.backend.delete(key)).await
    }

    /// Atomic write-if-absent - the lock primitive.
    pub async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.bounded(self.backend.set_if_absent(key, value.to_string(), ttl))
            .await
    }

    /// Fetch a raw (non-JSON) value.
    pub async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        self.bounded(self.backend.get(key)).await
    }

    /// Reset a key's TTL.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.bounded(self.backend.expire(key, ttl)).await
    }

    /// Remaining TTL for a key.
    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.bounded(self.backend.ttl(key)).await
    }

    /// Fetch and deserialize many keys; corrupted or absent entries are
    /// missing from the result.
    pub async fn multi_get_json<T: DeserializeOwned>(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, T>> {
        let raw = self.bounded(self.backend.multi_get(keys)).await?;
        let mut out = HashMap::with_capacity(raw.len());
        for (key, payload) in raw {
            match Self::decode(&key, &payload) {
                Ok(value) => {
                    out.insert(key, value);
                }
                Err(error) => {
                    warn!(key, %error, "skipping corrupted payload in multi-get");
                    let _ = self.bounded(self.backend.delete(&key)).await;
                }
            }
        }
        Ok(out)
    }

    /// All keys starting with `prefix`.
    pub async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.bounded(self.backend.scan_prefix(prefix)).await
    }

    /// Add a member to a set-valued key.
    pub async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<()> {
        self.bounded(self.backend.set_add(key, member, ttl)).await
    }

    /// Remove a member from a set-valued key.
    pub async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        self.bounded(self.backend.set_remove(key, member)).await
    }

    /// All members of a set-valued key.
    pub async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        self.bounded(self.backend.set_members(key)).await
    }
}

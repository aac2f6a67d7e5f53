//! Best-effort distributed lease lock.
//!
//! A lock is a `set_if_absent` on a `cart_lock:*` key holding a random
//! holder token. The key auto-expires after the lease duration, so a
//! crashed holder never wedges the resource; release is best-effort and a
//! lease is always allowed to lapse on its own. This is mutual exclusion,
//! not fair queueing - contending callers back off and retry.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CacheError, Result};
use crate::keys;
use crate::store::KeyedStore;

/// A held lease. Dropping it does nothing; either call
/// [`DistributedLock::release`] or let the lease expire.
#[derive(Debug)]
pub struct LockLease {
    resource: String,
    key: String,
    token: String,
}

impl LockLease {
    /// The resource this lease guards.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The holder token written to the store.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Lease-based exclusion over the shared store.
#[derive(Clone)]
pub struct DistributedLock {
    store: KeyedStore,
    lease: Duration,
}

impl DistributedLock {
    /// Create a lock client with the configured lease window.
    #[must_use]
    pub const fn new(store: KeyedStore, lease: Duration) -> Self {
        Self { store, lease }
    }

    /// Try to acquire the lease once. Returns `None` if another holder
    /// owns it; does not block or queue.
    pub async fn acquire(&self, resource: &str) -> Result<Option<LockLease>> {
        let key = keys::cart_lock(resource);
        let token = Uuid::new_v4().to_string();
        let acquired = self.store.set_if_absent(&key, &token, self.lease).await?;
        if acquired {
            debug!(resource, "lock acquired");
            Ok(Some(LockLease {
                resource: resource.to_string(),
                key,
                token,
            }))
        } else {
            Ok(None)
        }
    }

    /// Acquire with jittered backoff, failing with
    /// [`CacheError::LockNotAcquired`] once `attempts` tries are spent.
    pub async fn acquire_with_backoff(
        &self,
        resource: &str,
        attempts: u32,
    ) -> Result<LockLease> {
        let mut backoff = Duration::from_millis(20);
        for attempt in 0..attempts {
            if let Some(lease) = self.acquire(resource).await? {
                return Ok(lease);
            }
            if attempt + 1 < attempts {
                let half = u64::try_from(backoff.as_millis() / 2).unwrap_or(u64::MAX);
                let jitter = rand::rng().random_range(0..=half);
                tokio::time::sleep(backoff + Duration::from_millis(jitter)).await;
                backoff = backoff.saturating_mul(2);
            }
        }
        Err(CacheError::LockNotAcquired(keys::cart_lock(resource)))
    }

    /// Release a held lease. Only deletes the key if the stored token
    /// still matches this holder; a lease that already lapsed (or was
    /// reclaimed) is left alone. Returns whether the key was deleted.
    pub async fn release(&self, lease: &LockLease) -> Result<bool> {
        match self.store.get_raw(&lease.key).await? {
            Some(current) if current == lease.token => self.store.delete(&lease.key).await,
            Some(_) => {
                warn!(
                    resource = %lease.resource,
                    "lease reclaimed by another holder before release"
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

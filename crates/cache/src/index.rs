//! Secondary set-indexes over cart records.
//!
//! Carts are indexed by status (`cart_status:<STATUS>`) and by type
//! (`cart_type:<TYPE>`) so the sweeper can enumerate candidates without a
//! full keyspace scan. Members are the record's primary store key. The
//! index is a performance hint, never a source of truth: enumeration
//! treats a missing backing record as already gone and removes the stale
//! entry, and index maintenance failures are logged rather than
//! propagated.

use std::time::Duration;

use cartwheel_core::{CartRecord, CartStatus, CartType};
use tracing::warn;

use crate::error::Result;
use crate::keys;
use crate::store::KeyedStore;

/// Index TTL always exceeds the record TTL by this skew, so a live
/// record is never un-indexed before it expires.
const INDEX_TTL_SKEW: Duration = Duration::from_secs(60 * 60);

/// Maintains the status/type set-indexes alongside primary cart writes.
#[derive(Clone)]
pub struct IndexManager {
    store: KeyedStore,
}

impl IndexManager {
    /// Create an index manager over the shared store.
    #[must_use]
    pub const fn new(store: KeyedStore) -> Self {
        Self { store }
    }

    /// Record that `cart` was written under `primary_key`.
    ///
    /// Adds membership for the cart's current status and type and removes
    /// any now-stale membership from `previous`. Failures are logged and
    /// swallowed; a skipped update costs a slower scan, not correctness.
    pub async fn record_written(
        &self,
        primary_key: &str,
        cart: &CartRecord,
        previous: Option<(CartStatus, CartType)>,
        record_ttl: Duration,
    ) {
        let index_ttl = record_ttl + INDEX_TTL_SKEW;

        if let Some((old_status, old_type)) = previous {
            if old_status != cart.status {
                self.remove_member(&keys::cart_status_index(old_status), primary_key)
                    .await;
            }
            if old_type != cart.cart_type {
                self.remove_member(&keys::cart_type_index(old_type), primary_key)
                    .await;
            }
        }

        for key in [
            keys::cart_status_index(cart.status),
            keys::cart_type_index(cart.cart_type),
        ] {
            if let Err(error) = self.store.set_add(&key, primary_key, index_ttl).await {
                warn!(index = %key, member = primary_key, %error, "index add failed");
            }
        }
    }

    /// Remove all index membership for a record that was deleted.
    pub async fn record_removed(&self, primary_key: &str, status: CartStatus, cart_type: CartType) {
        self.remove_member(&keys::cart_status_index(status), primary_key)
            .await;
        self.remove_member(&keys::cart_type_index(cart_type), primary_key)
            .await;
    }

    async fn remove_member(&self, index_key: &str, member: &str) {
        if let Err(error) = self.store.set_remove(index_key, member).await {
            warn!(index = %index_key, member, %error, "index remove failed");
        }
    }

    /// Enumerate carts currently indexed under `status`.
    ///
    /// Self-heals: members whose backing record is gone are dropped from
    /// the index and skipped. The initial membership read still propagates
    /// store errors - without it there is nothing to enumerate.
    pub async fn carts_with_status(&self, status: CartStatus) -> Result<Vec<(String, CartRecord)>> {
        let index_key = keys::cart_status_index(status);
        let members = self.store.set_members(&index_key).await?;

        let mut carts = Vec::with_capacity(members.len());
        for member in members {
            match self.store.get_json::<CartRecord>(&member).await {
                Ok(Some(cart)) => carts.push((member, cart)),
                Ok(None) => {
                    // Already gone; heal the stale entry.
                    self.remove_member(&index_key, &member).await;
                }
                Err(error) => {
                    warn!(member, %error, "skipping unreadable cart during enumeration");
                }
            }
        }
        Ok(carts)
    }
}

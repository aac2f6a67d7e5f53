//! L1/L2 cache tier routing.
//!
//! L1 is a set of small in-process moka caches, one per data category so
//! each carries its own TTL and capacity: cart records and validation
//! results are volatile (seconds to minutes), pricing a little less so,
//! reference data (tax/shipping tables) near-static (hours). L2 is the
//! networked keyed store and stays authoritative.
//!
//! Write ordering is fixed: L2 first, then refresh or invalidate L1 -
//! never the reverse, so a failed L2 write can not leave a fresher L1
//! serving state the store never accepted.

use std::time::Duration;

use cartwheel_core::{CartId, CartRecord};
use chrono::{DateTime, Utc};
use moka::future::Cache;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::error::Result;
use crate::service::ValidationResult;
use crate::store::KeyedStore;

/// Cached output of a totals calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingSnapshot {
    pub cart_id: CartId,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub computed_at: DateTime<Utc>,
}

/// Routes reads and writes across the in-process and networked tiers.
#[derive(Clone)]
pub struct CacheTierManager {
    store: KeyedStore,
    carts: Cache<String, CartRecord>,
    pricing: Cache<String, PricingSnapshot>,
    validation: Cache<String, ValidationResult>,
    reference: Cache<String, serde_json::Value>,
}

fn build_cache<V: Clone + Send + Sync + 'static>(capacity: u64, ttl: Duration) -> Cache<String, V> {
    Cache::builder()
        .max_capacity(capacity)
        .time_to_live(ttl)
        .build()
}

impl CacheTierManager {
    /// Build the L1 caches and wire them in front of the keyed store.
    #[must_use]
    pub fn new(store: KeyedStore, config: &CacheConfig) -> Self {
        Self {
            store,
            carts: build_cache(config.l1_capacity, config.l1_cart_ttl),
            pricing: build_cache(config.l1_capacity, config.l1_pricing_ttl),
            validation: build_cache(config.l1_capacity, config.l1_validation_ttl),
            reference: build_cache(config.l1_capacity, config.l1_reference_ttl),
        }
    }

    /// The underlying L2 store handle.
    #[must_use]
    pub const fn store(&self) -> &KeyedStore {
        &self.store
    }

    /// Read a cart record: L1 hit returns immediately, an L2 hit
    /// repopulates L1.
    pub async fn read_cart(&self, key: &str) -> Result<Option<CartRecord>> {
        if let Some(cart) = self.carts.get(key).await {
            return Ok(Some(cart));
        }
        let Some(cart) = self.store.get_json::<CartRecord>(key).await? else {
            return Ok(None);
        };
        self.carts.insert(key.to_string(), cart.clone()).await;
        Ok(Some(cart))
    }

    /// Write-through a cart record: L2 first, then refresh L1.
    pub async fn write_cart(&self, key: &str, cart: &CartRecord, ttl: Duration) -> Result<()> {
        self.store.set_json(key, cart, Some(ttl)).await?;
        self.carts.insert(key.to_string(), cart.clone()).await;
        Ok(())
    }

    /// Delete a cart record from both tiers (L2 first). Returns whether
    /// L2 held the key.
    pub async fn remove_cart(&self, key: &str) -> Result<bool> {
        let existed = self.store.delete(key).await?;
        self.carts.invalidate(key).await;
        Ok(existed)
    }

    /// Drop a cart's L1 entry without touching L2.
    pub async fn invalidate_cart(&self, key: &str) {
        self.carts.invalidate(key).await;
    }

    /// Cached validation result for a primary cart key, if still fresh.
    pub async fn cached_validation(&self, key: &str) -> Option<ValidationResult> {
        self.validation.get(key).await
    }

    /// Cache a validation result.
    pub async fn store_validation(&self, key: &str, result: ValidationResult) {
        self.validation.insert(key.to_string(), result).await;
    }

    /// Drop a cached validation result after a mutation.
    pub async fn invalidate_validation(&self, key: &str) {
        self.validation.invalidate(key).await;
    }

    /// Cached pricing snapshot for a primary cart key, if still fresh.
    pub async fn cached_pricing(&self, key: &str) -> Option<PricingSnapshot> {
        self.pricing.get(key).await
    }

    /// Cache a pricing snapshot.
    pub async fn store_pricing(&self, key: &str, snapshot: PricingSnapshot) {
        self.pricing.insert(key.to_string(), snapshot).await;
    }

    /// Drop a cached pricing snapshot after a mutation.
    pub async fn invalidate_pricing(&self, key: &str) {
        self.pricing.invalidate(key).await;
    }

    /// Read reference data (tax/shipping tables): L1, then L2 with
    /// repopulation.
    pub async fn read_reference(&self, key: &str) -> Result<Option<serde_json::Value>> {
        if let Some(value) = self.reference.get(key).await {
            return Ok(Some(value));
        }
        let Some(value) = self.store.get_json::<serde_json::Value>(key).await? else {
            return Ok(None);
        };
        self.reference.insert(key.to_string(), value.clone()).await;
        Ok(Some(value))
    }

    /// Write-through reference data with its L2 TTL.
    pub async fn write_reference(
        &self,
        key: &str,
        value: &serde_json::Value,
        l2_ttl: Duration,
    ) -> Result<()> {
        self.store.set_json(key, value, Some(l2_ttl)).await?;
        self.reference.insert(key.to_string(), value.clone()).await;
        Ok(())
    }
}

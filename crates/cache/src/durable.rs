//! Durable-store collaborator.
//!
//! The relational store is the system of record after write-back or cache
//! eviction. This layer treats it as an eventually-consistent write-behind
//! target: nothing on the read path ever waits on it.

use async_trait::async_trait;
use cartwheel_core::{CartId, CartRecord};

use crate::error::Result;

/// Write-behind operations consumed from the durable relational store.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Load a cart by id, if the durable store has one.
    async fn load_cart(&self, cart_id: CartId) -> Result<Option<CartRecord>>;

    /// Persist a cart record.
    async fn save_cart(&self, record: &CartRecord) -> Result<()>;

    /// Mark a cart soft-deleted durably.
    async fn soft_delete_cart(&self, cart_id: CartId) -> Result<()>;
}

/// In-memory durable store used by tests and local development.
#[derive(Debug, Default)]
pub struct InMemoryDurableStore {
    carts: tokio::sync::Mutex<std::collections::HashMap<CartId, CartRecord>>,
    soft_deleted: tokio::sync::Mutex<Vec<CartId>>,
}

impl InMemoryDurableStore {
    /// Create an empty durable store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cart ids soft-deleted so far, in call order.
    pub async fn soft_deleted(&self) -> Vec<CartId> {
        self.soft_deleted.lock().await.clone()
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn load_cart(&self, cart_id: CartId) -> Result<Option<CartRecord>> {
        Ok(self.carts.lock().await.get(&cart_id).cloned())
    }

    async fn save_cart(&self, record: &CartRecord) -> Result<()> {
        self.carts.lock().await.insert(record.cart_id, record.clone());
        Ok(())
    }

    async fn soft_delete_cart(&self, cart_id: CartId) -> Result<()> {
        self.soft_deleted.lock().await.push(cart_id);
        Ok(())
    }
}

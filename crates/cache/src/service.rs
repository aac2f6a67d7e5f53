//! The cart service facade.
//!
//! [`CartService`] is the single object request handlers and the
//! authentication boundary talk to. It is constructed once at process
//! start around a store backend and a durable-store collaborator, and is
//! cheaply cloneable via `Arc` - no package-level mutable state anywhere.
//!
//! All totals-affecting mutations (updates, coupons, deletes) take the
//! same per-cart distributed lease migration takes, so multi-step
//! read-modify-write cycles never interleave across processes.

use std::sync::Arc;

use cartwheel_core::{
    CartId, CartRecord, CartStatus, CartType, Coupon, SessionId, SessionRecord, UserId,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::config::CacheConfig;
use crate::durable::DurableStore;
use crate::error::{CacheError, Result};
use crate::expiry::{ExpirationPolicy, Sweeper};
use crate::index::IndexManager;
use crate::keys;
use crate::lock::DistributedLock;
use crate::migration::{CartMigrationEngine, MigrationOutcome};
use crate::session::SessionRegistry;
use crate::store::{KeyedStore, StoreBackend};
use crate::tier::{CacheTierManager, PricingSnapshot};

/// Attempts for mutation locks before giving up with `LockNotAcquired`.
const MUTATION_LOCK_ATTEMPTS: u32 = 4;

/// A problem found while validating a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "kind")]
pub enum ValidationIssue {
    EmptyCart,
    ZeroQuantityLine { product_id: i64 },
    NonPositivePrice { product_id: i64 },
    CartExpired,
    CartNotActive { status: CartStatus },
}

/// Outcome of a read-only cart validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub cart_id: CartId,
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub checked_at: DateTime<Utc>,
}

struct CartServiceInner {
    config: CacheConfig,
    tiers: CacheTierManager,
    index: IndexManager,
    lock: DistributedLock,
    sessions: SessionRegistry,
    migration: CartMigrationEngine,
    policy: ExpirationPolicy,
    durable: Arc<dyn DurableStore>,
    sweeper: Arc<Sweeper>,
}

/// The cache layer's public facade.
#[derive(Clone)]
pub struct CartService {
    inner: Arc<CartServiceInner>,
}

impl CartService {
    /// Assemble the service over a store backend and the durable
    /// collaborator. Construct once at process start and pass handles by
    /// clone.
    #[must_use]
    pub fn new(
        backend: Arc<dyn StoreBackend>,
        durable: Arc<dyn DurableStore>,
        config: CacheConfig,
    ) -> Self {
        let store = KeyedStore::new(backend, config.store_call_timeout);
        let policy = ExpirationPolicy::from_config(&config);
        let index = IndexManager::new(store.clone());
        let lock = DistributedLock::new(store.clone(), config.lock_lease);
        let sessions = SessionRegistry::new(store.clone(), &config);
        // One tier manager shared by the facade, the migration engine, and
        // the sweeper; its clones share the same in-process caches.
        let tiers = CacheTierManager::new(store, &config);
        let migration = CartMigrationEngine::new(
            tiers.clone(),
            lock.clone(),
            index.clone(),
            policy.clone(),
        );
        let sweeper = Arc::new(Sweeper::new(
            tiers.clone(),
            index.clone(),
            policy.clone(),
            Arc::clone(&durable),
            &config,
        ));

        Self {
            inner: Arc::new(CartServiceInner {
                config,
                tiers,
                index,
                lock,
                sessions,
                migration,
                policy,
                durable,
                sweeper,
            }),
        }
    }

    /// The tier manager, for reference-data reads and cache inspection.
    #[must_use]
    pub fn tiers(&self) -> &CacheTierManager {
        &self.inner.tiers
    }

    /// The session registry.
    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }

    /// The background sweeper, exposed so deployments (and tests) can
    /// drive sweeps directly.
    #[must_use]
    pub fn sweeper(&self) -> Arc<Sweeper> {
        Arc::clone(&self.inner.sweeper)
    }

    /// Spawn the periodic maintenance tasks: expiry sweep, permanent
    /// purge, and session registry cleanup. They run until aborted.
    #[must_use]
    pub fn spawn_maintenance(&self) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            tokio::spawn(Arc::clone(&self.inner.sweeper).run_sweep_loop()),
            tokio::spawn(Arc::clone(&self.inner.sweeper).run_purge_loop()),
            tokio::spawn(self.inner.sessions.clone().run_cleanup_loop()),
        ]
    }

    /// Resolve the primary store key for a cart locator. The user id
    /// wins when both are supplied.
    fn primary_key(user_id: Option<UserId>, session_id: Option<SessionId>) -> Result<String> {
        match (user_id, session_id) {
            (Some(user_id), _) => Ok(keys::user_cart(user_id)),
            (None, Some(session_id)) => Ok(keys::session_cart(session_id)),
            (None, None) => Err(CacheError::InvalidRequest(
                "either a user id or a session id is required".to_string(),
            )),
        }
    }

    // =========================================================================
    // Cart operations (request handlers)
    // =========================================================================

    /// Fetch a cart without creating or touching anything.
    pub async fn get_cart(
        &self,
        user_id: Option<UserId>,
        session_id: Option<SessionId>,
    ) -> Result<Option<CartRecord>> {
        let key = Self::primary_key(user_id, session_id)?;
        self.inner.tiers.read_cart(&key).await
    }

    /// Fetch the caller's cart, creating an empty one if none exists.
    ///
    /// Reads refresh the cart's activity clock and slide its TTL. A store
    /// outage surfaces as [`CacheError::StoreUnavailable`] - the caller
    /// sees "cart temporarily unavailable", never a silently empty cart.
    #[instrument(skip(self))]
    pub async fn get_or_create_cart(
        &self,
        user_id: Option<UserId>,
        session_id: Option<SessionId>,
    ) -> Result<CartRecord> {
        let key = Self::primary_key(user_id, session_id)?;
        let now = Utc::now();

        if let Some(mut cart) = self.inner.tiers.read_cart(&key).await? {
            let previous = (cart.status, cart.cart_type);
            cart.touch(now);
            self.inner.policy.ensure_expiry(&mut cart);
            self.write_indexed(&key, &cart, Some(previous)).await?;
            return Ok(cart);
        }

        let mut cart = match (user_id, session_id) {
            (Some(user_id), _) => CartRecord::new_user(user_id, now),
            (None, Some(session_id)) => CartRecord::new_guest(session_id, now),
            (None, None) => unreachable!("primary_key rejected the empty locator"),
        };
        self.inner.policy.ensure_expiry(&mut cart);
        self.write_indexed(&key, &cart, None).await?;
        Ok(cart)
    }

    /// Persist a caller-mutated cart record under the per-cart lease.
    ///
    /// Totals and expiry are recomputed server-side; callers cannot smuggle
    /// in stale aggregates or a hand-picked `expires_at`.
    #[instrument(skip(self, record), fields(cart_id = %record.cart_id))]
    pub async fn update_cart(&self, mut record: CartRecord) -> Result<CartRecord> {
        let key = Self::primary_key(record.user_id, record.session_id)?;
        let lease = self
            .inner
            .lock
            .acquire_with_backoff(&key, MUTATION_LOCK_ATTEMPTS)
            .await?;

        let result = async {
            let previous = self
                .inner
                .tiers
                .read_cart(&key)
                .await?
                .map(|cart| (cart.status, cart.cart_type));

            record.recompute_totals();
            record.touch(Utc::now());
            self.inner.policy.ensure_expiry(&mut record);

            self.write_indexed(&key, &record, previous).await?;
            self.invalidate_derived(&key).await;
            self.save_behind(&record).await;
            Ok(record.clone())
        }
        .await;

        self.release_quietly(&lease).await;
        result
    }

    /// Soft-delete the caller's cart. Returns whether a cart existed.
    #[instrument(skip(self))]
    pub async fn delete_cart(
        &self,
        user_id: Option<UserId>,
        session_id: Option<SessionId>,
    ) -> Result<bool> {
        let key = Self::primary_key(user_id, session_id)?;
        let lease = self
            .inner
            .lock
            .acquire_with_backoff(&key, MUTATION_LOCK_ATTEMPTS)
            .await?;

        let result = async {
            let Some(mut cart) = self.inner.tiers.read_cart(&key).await? else {
                return Ok(false);
            };
            let previous = (cart.status, cart.cart_type);
            let now = Utc::now();

            cart.status = CartStatus::Deleted;
            cart.deleted_at = Some(now);
            cart.expires_at = Some(self.inner.policy.compute_expiry(
                cart.cart_type,
                CartStatus::Deleted,
                now,
            ));

            // Retained under the purge window, not removed outright.
            let ttl = self.inner.policy.ttl_for(cart.cart_type, CartStatus::Deleted);
            self.inner.tiers.write_cart(&key, &cart, ttl).await?;
            self.inner
                .index
                .record_written(&key, &cart, Some(previous), ttl)
                .await;
            self.invalidate_derived(&key).await;

            if let Err(error) = self.inner.durable.soft_delete_cart(cart.cart_id).await {
                warn!(%error, "durable soft-delete failed");
            }
            Ok(true)
        }
        .await;

        self.release_quietly(&lease).await;
        result
    }

    /// Apply a coupon to the caller's cart, recomputing totals under the
    /// per-cart lease.
    #[instrument(skip(self))]
    pub async fn apply_coupon(
        &self,
        user_id: Option<UserId>,
        session_id: Option<SessionId>,
        code: String,
        discount: Decimal,
    ) -> Result<CartRecord> {
        self.mutate_coupon(user_id, session_id, Some(Coupon { code, discount }))
            .await
    }

    /// Remove any applied coupon, recomputing totals.
    #[instrument(skip(self))]
    pub async fn remove_coupon(
        &self,
        user_id: Option<UserId>,
        session_id: Option<SessionId>,
    ) -> Result<CartRecord> {
        self.mutate_coupon(user_id, session_id, None).await
    }

    async fn mutate_coupon(
        &self,
        user_id: Option<UserId>,
        session_id: Option<SessionId>,
        coupon: Option<Coupon>,
    ) -> Result<CartRecord> {
        let key = Self::primary_key(user_id, session_id)?;
        let lease = self
            .inner
            .lock
            .acquire_with_backoff(&key, MUTATION_LOCK_ATTEMPTS)
            .await?;

        let result = async {
            let Some(mut cart) = self.inner.tiers.read_cart(&key).await? else {
                return Err(CacheError::RecordNotFound(key.clone()));
            };
            let previous = (cart.status, cart.cart_type);

            cart.coupon = coupon;
            cart.recompute_totals();
            cart.touch(Utc::now());
            self.inner.policy.ensure_expiry(&mut cart);

            self.write_indexed(&key, &cart, Some(previous)).await?;
            self.invalidate_derived(&key).await;
            self.save_behind(&cart).await;
            Ok(cart)
        }
        .await;

        self.release_quietly(&lease).await;
        result
    }

    /// Validate a cart without mutating it. Results are cached in the
    /// validation L1 category and recomputed when that entry ages out.
    #[instrument(skip(self))]
    pub async fn validate_cart(
        &self,
        user_id: Option<UserId>,
        session_id: Option<SessionId>,
    ) -> Result<ValidationResult> {
        let key = Self::primary_key(user_id, session_id)?;
        if let Some(cached) = self.inner.tiers.cached_validation(&key).await {
            return Ok(cached);
        }

        let Some(cart) = self.inner.tiers.read_cart(&key).await? else {
            return Err(CacheError::RecordNotFound(key));
        };

        let now = Utc::now();
        let mut issues = Vec::new();
        if cart.lines.is_empty() {
            issues.push(ValidationIssue::EmptyCart);
        }
        for line in &cart.lines {
            if line.quantity == 0 {
                issues.push(ValidationIssue::ZeroQuantityLine {
                    product_id: line.product_id.as_i64(),
                });
            }
            if line.unit_price <= Decimal::ZERO {
                issues.push(ValidationIssue::NonPositivePrice {
                    product_id: line.product_id.as_i64(),
                });
            }
        }
        if cart.status != CartStatus::Active {
            issues.push(ValidationIssue::CartNotActive { status: cart.status });
        }
        let mut probe = cart.clone();
        if self.inner.policy.is_expired(&mut probe, now) {
            issues.push(ValidationIssue::CartExpired);
        }

        let result = ValidationResult {
            cart_id: cart.cart_id,
            valid: issues.is_empty(),
            issues,
            checked_at: now,
        };
        self.inner.tiers.store_validation(&key, result.clone()).await;

        // Totals were just walked; cache the pricing snapshot alongside.
        self.inner
            .tiers
            .store_pricing(&key, Self::price(&cart, now))
            .await;

        Ok(result)
    }

    /// Pricing totals for the caller's cart, served from the pricing L1
    /// category while its entry is fresh.
    #[instrument(skip(self))]
    pub async fn pricing_snapshot(
        &self,
        user_id: Option<UserId>,
        session_id: Option<SessionId>,
    ) -> Result<PricingSnapshot> {
        let key = Self::primary_key(user_id, session_id)?;
        if let Some(cached) = self.inner.tiers.cached_pricing(&key).await {
            return Ok(cached);
        }

        let Some(cart) = self.inner.tiers.read_cart(&key).await? else {
            return Err(CacheError::RecordNotFound(key));
        };
        let snapshot = Self::price(&cart, Utc::now());
        self.inner.tiers.store_pricing(&key, snapshot.clone()).await;
        Ok(snapshot)
    }

    /// Derive a pricing snapshot from a cart's recomputed aggregates.
    /// `subtotal` on the record is post-discount; the snapshot breaks the
    /// discount back out.
    fn price(cart: &CartRecord, now: DateTime<Utc>) -> PricingSnapshot {
        let discount = cart.coupon.as_ref().map_or(Decimal::ZERO, |c| c.discount);
        PricingSnapshot {
            cart_id: cart.cart_id,
            subtotal: cart.subtotal + discount,
            discount,
            total: cart.subtotal,
            computed_at: now,
        }
    }

    // =========================================================================
    // Authentication boundary
    // =========================================================================

    /// Mint a fresh anonymous session.
    pub async fn create_guest_session(&self) -> Result<SessionRecord> {
        self.inner.sessions.create_guest().await
    }

    /// Bind a session to an authenticated user. Idempotent for the same
    /// user; [`CacheError::SessionConflict`] for a different one.
    pub async fn associate_session_with_user(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<SessionRecord> {
        self.inner.sessions.associate(session_id, user_id).await
    }

    /// Merge or promote the session's guest cart into the user's cart.
    /// See [`CartMigrationEngine`] for the protocol.
    pub async fn migrate_guest_cart_to_user(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<MigrationOutcome> {
        self.inner.migration.migrate(session_id, user_id).await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Write-through a cart and refresh its index membership.
    async fn write_indexed(
        &self,
        key: &str,
        cart: &CartRecord,
        previous: Option<(CartStatus, CartType)>,
    ) -> Result<()> {
        let ttl = self.inner.policy.ttl_for(cart.cart_type, cart.status);
        self.inner.tiers.write_cart(key, cart, ttl).await?;
        self.inner.index.record_written(key, cart, previous, ttl).await;
        Ok(())
    }

    /// Drop derived L1 entries after a mutation.
    async fn invalidate_derived(&self, key: &str) {
        self.inner.tiers.invalidate_validation(key).await;
        self.inner.tiers.invalidate_pricing(key).await;
    }

    /// Write-behind to the durable store; never fails the request path.
    async fn save_behind(&self, cart: &CartRecord) {
        if let Err(error) = self.inner.durable.save_cart(cart).await {
            warn!(cart_id = %cart.cart_id, %error, "durable write-behind failed");
        }
    }

    async fn release_quietly(&self, lease: &crate::lock::LockLease) {
        if let Err(error) = self.inner.lock.release(lease).await {
            warn!(resource = lease.resource(), %error, "lease release failed");
        }
    }

    /// The effective configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }
}

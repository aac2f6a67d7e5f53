//! Expiration policy and the background sweeper.
//!
//! [`ExpirationPolicy`] derives every cart's `expires_at` from its type,
//! status, and last activity - the stored value is a cache of that
//! computation, never an input from outside. [`Sweeper`] runs on a fixed
//! interval, independent of request traffic, transitioning expired carts
//! down the lifecycle table and eventually purging soft-deleted ones.

use std::sync::Arc;
use std::time::Duration;

use cartwheel_core::{CartRecord, CartStatus, CartType};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::CacheConfig;
use crate::durable::DurableStore;
use crate::error::Result;
use crate::index::IndexManager;
use crate::tier::CacheTierManager;

/// Per-type cart lifetimes.
#[derive(Debug, Clone)]
pub struct ExpirationPolicy {
    guest: Duration,
    user_active: Duration,
    user_abandoned: Duration,
    saved: Duration,
    wishlist: Duration,
    retention: Duration,
}

impl ExpirationPolicy {
    /// Build the policy from configuration.
    #[must_use]
    pub const fn from_config(config: &CacheConfig) -> Self {
        Self {
            guest: config.guest_cart_ttl,
            user_active: config.user_active_cart_ttl,
            user_abandoned: config.user_abandoned_cart_ttl,
            saved: config.saved_cart_ttl,
            wishlist: config.wishlist_ttl,
            retention: config.purge_retention,
        }
    }

    /// The lifetime for a `(cart type, status)` pair. Doubles as the
    /// store TTL for the record; soft-deleted carts live for the
    /// retention window.
    #[must_use]
    pub const fn ttl_for(&self, cart_type: CartType, status: CartStatus) -> Duration {
        match (cart_type, status) {
            (_, CartStatus::Deleted) => self.retention,
            (CartType::Guest, _) => self.guest,
            (CartType::User, CartStatus::Abandoned) => self.user_abandoned,
            (CartType::User, _) => self.user_active,
            (CartType::Saved, _) => self.saved,
            (CartType::Wishlist, _) => self.wishlist,
        }
    }

    /// Absolute expiry for a cart observed at `basis` (its last activity,
    /// else creation). Deterministic: same inputs, same expiry.
    #[must_use]
    pub fn compute_expiry(
        &self,
        cart_type: CartType,
        status: CartStatus,
        basis: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let ttl = self.ttl_for(cart_type, status);
        // from_std only fails on durations far beyond any configured TTL;
        // clamp those to a century rather than overflow.
        basis + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500))
    }

    /// Fill in `expires_at` if the record lacks one.
    pub fn ensure_expiry(&self, cart: &mut CartRecord) {
        if cart.expires_at.is_none() {
            cart.expires_at =
                Some(self.compute_expiry(cart.cart_type, cart.status, cart.activity_basis()));
        }
    }

    /// Whether the cart is expired at `now`. A missing `expires_at` is
    /// computed and cached on the record, never treated as "not expired".
    pub fn is_expired(&self, cart: &mut CartRecord, now: DateTime<Utc>) -> bool {
        self.ensure_expiry(cart);
        cart.expires_at.is_some_and(|deadline| deadline <= now)
    }

    /// The lifecycle transition applied when a cart expires.
    ///
    /// Guest carts go straight to soft-deletion; user carts decay
    /// ACTIVE -> ABANDONED -> EXPIRED; saved carts and wishlists expire in
    /// place. Terminal statuses return `None`.
    #[must_use]
    pub const fn next_status(cart_type: CartType, status: CartStatus) -> Option<CartStatus> {
        match (cart_type, status) {
            (CartType::Guest, CartStatus::Active | CartStatus::Abandoned) => {
                Some(CartStatus::Deleted)
            }
            (CartType::User, CartStatus::Active) => Some(CartStatus::Abandoned),
            (CartType::User, CartStatus::Abandoned) => Some(CartStatus::Expired),
            (CartType::Saved | CartType::Wishlist, CartStatus::Active | CartStatus::Abandoned) => {
                Some(CartStatus::Expired)
            }
            _ => None,
        }
    }
}

/// Counters from a single sweep or purge run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Candidates enumerated from the indexes.
    pub scanned: usize,
    /// Carts transitioned to their next status.
    pub transitioned: usize,
    /// Soft-deleted carts permanently removed.
    pub purged: usize,
    /// Per-cart failures (logged, never aborting the batch).
    pub failures: usize,
}

/// The periodic expiry/purge task.
///
/// Transitions and purges go through the tier manager so the in-process
/// tier reflects them immediately rather than after its own TTL.
pub struct Sweeper {
    tiers: CacheTierManager,
    index: IndexManager,
    policy: ExpirationPolicy,
    durable: Arc<dyn DurableStore>,
    sweep_interval: Duration,
    purge_interval: Duration,
    retention: Duration,
}

impl Sweeper {
    /// Assemble a sweeper over the shared cache tiers.
    #[must_use]
    pub fn new(
        tiers: CacheTierManager,
        index: IndexManager,
        policy: ExpirationPolicy,
        durable: Arc<dyn DurableStore>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            tiers,
            index,
            policy,
            durable,
            sweep_interval: config.sweep_interval,
            purge_interval: config.purge_interval,
            retention: config.purge_retention,
        }
    }

    /// One expiry sweep over ACTIVE and ABANDONED carts.
    ///
    /// Failures on individual carts are counted and logged; the batch
    /// always runs to completion.
    pub async fn sweep_once(&self) -> SweepStats {
        let now = Utc::now();
        let mut stats = SweepStats::default();

        for status in [CartStatus::Active, CartStatus::Abandoned] {
            let candidates = match self.index.carts_with_status(status).await {
                Ok(candidates) => candidates,
                Err(error) => {
                    warn!(%status, %error, "sweep enumeration failed");
                    stats.failures += 1;
                    continue;
                }
            };
            for (key, mut cart) in candidates {
                stats.scanned += 1;
                // Records can move between enumeration and processing;
                // recheck the status we indexed on.
                if cart.status != status || !self.policy.is_expired(&mut cart, now) {
                    continue;
                }
                match self.transition(&key, cart, now).await {
                    Ok(true) => stats.transitioned += 1,
                    Ok(false) => {}
                    Err(error) => {
                        warn!(key, %error, "failed to transition expired cart");
                        stats.failures += 1;
                    }
                }
            }
        }

        info!(
            scanned = stats.scanned,
            transitioned = stats.transitioned,
            failures = stats.failures,
            "expiry sweep complete"
        );
        stats
    }

    /// Apply the decision-table transition to one expired cart.
    async fn transition(
        &self,
        key: &str,
        mut cart: CartRecord,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(next) = ExpirationPolicy::next_status(cart.cart_type, cart.status) else {
            return Ok(false);
        };
        let previous = (cart.status, cart.cart_type);

        cart.status = next;
        cart.expires_at = Some(self.policy.compute_expiry(cart.cart_type, next, now));
        if next == CartStatus::Deleted {
            cart.deleted_at = Some(now);
        }

        let ttl = self.policy.ttl_for(cart.cart_type, next);
        self.tiers.write_cart(key, &cart, ttl).await?;
        self.index
            .record_written(key, &cart, Some(previous), ttl)
            .await;

        if next == CartStatus::Deleted
            && let Err(error) = self.durable.soft_delete_cart(cart.cart_id).await
        {
            // Write-behind: the durable mark is retried by the purge pass.
            warn!(key, %error, "durable soft-delete failed");
        }
        Ok(true)
    }

    /// One purge pass: permanently remove soft-deleted carts older than
    /// the retention window.
    pub async fn purge_once(&self) -> SweepStats {
        let now = Utc::now();
        let mut stats = SweepStats::default();
        let cutoff = now
            - chrono::Duration::from_std(self.retention)
                .unwrap_or_else(|_| chrono::Duration::days(36_500));

        let candidates = match self.index.carts_with_status(CartStatus::Deleted).await {
            Ok(candidates) => candidates,
            Err(error) => {
                warn!(%error, "purge enumeration failed");
                stats.failures += 1;
                return stats;
            }
        };

        for (key, cart) in candidates {
            stats.scanned += 1;
            let Some(deleted_at) = cart.deleted_at else {
                continue;
            };
            if deleted_at > cutoff {
                continue;
            }
            match self.tiers.remove_cart(&key).await {
                Ok(_) => {
                    self.index
                        .record_removed(&key, cart.status, cart.cart_type)
                        .await;
                    stats.purged += 1;
                }
                Err(error) => {
                    warn!(key, %error, "failed to purge soft-deleted cart");
                    stats.failures += 1;
                }
            }
        }

        info!(purged = stats.purged, failures = stats.failures, "purge sweep complete");
        stats
    }

    /// Run the expiry sweep on its fixed interval, forever.
    pub async fn run_sweep_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.sweep_once().await;
        }
    }

    /// Run the permanent purge on its fixed interval, forever.
    pub async fn run_purge_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.purge_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.purge_once().await;
        }
    }
}

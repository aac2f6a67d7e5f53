//! Guest-to-user cart migration.
//!
//! Runs once per login event. The whole protocol executes under a
//! distributed lease keyed on the destination user, so concurrent logins
//! by the same user - from any number of sessions - serialize on one
//! migration at a time. Step order is load-bearing: the merged record is
//! always written before the guest record is deleted, so readers never
//! observe a partially-migrated state and a crash mid-way leaves the
//! guest cart intact.

use cartwheel_core::{CartRecord, CartType, SessionId, UserId};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::error::{CacheError, Result};
use crate::expiry::ExpirationPolicy;
use crate::index::IndexManager;
use crate::keys;
use crate::lock::DistributedLock;
use crate::tier::CacheTierManager;

/// What a migration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// No guest cart existed for the session; nothing to do.
    NoGuestCart,
    /// The guest cart was re-keyed to the user and reclassified.
    Promoted,
    /// The guest cart was merged into the user's existing cart.
    Merged,
}

/// Merges or promotes guest carts at the authentication boundary.
///
/// All writes and deletes go through the tier manager so the in-process
/// tier never keeps serving a pre-migration record.
#[derive(Clone)]
pub struct CartMigrationEngine {
    tiers: CacheTierManager,
    lock: DistributedLock,
    index: IndexManager,
    policy: ExpirationPolicy,
}

impl CartMigrationEngine {
    /// Assemble the engine over the shared cache tiers.
    #[must_use]
    pub const fn new(
        tiers: CacheTierManager,
        lock: DistributedLock,
        index: IndexManager,
        policy: ExpirationPolicy,
    ) -> Self {
        Self {
            tiers,
            lock,
            index,
            policy,
        }
    }

    /// Migrate the guest cart for `session_id` into `user_id`'s cart.
    ///
    /// Fails fast with [`CacheError::LockNotAcquired`] when a migration
    /// for this user is already in progress - callers should treat that
    /// as "try again shortly", not as failure.
    #[instrument(skip(self), fields(%session_id, %user_id))]
    pub async fn migrate(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<MigrationOutcome> {
        let resource = keys::migration_resource(user_id);
        let Some(lease) = self.lock.acquire(&resource).await? else {
            return Err(CacheError::LockNotAcquired(keys::cart_lock(&resource)));
        };

        let outcome = self.migrate_locked(session_id, user_id).await;

        // Best-effort: an un-released lease lapses on its own.
        if let Err(error) = self.lock.release(&lease).await {
            warn!(%error, "failed to release migration lease");
        }
        outcome
    }

    async fn migrate_locked(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<MigrationOutcome> {
        // Reads under the lock go to the authoritative store, not L1.
        let guest_key = keys::session_cart(session_id);
        let store = self.tiers.store();
        let Some(guest) = store.get_json::<CartRecord>(&guest_key).await? else {
            return Ok(MigrationOutcome::NoGuestCart);
        };

        let user_key = keys::user_cart(user_id);
        let existing = store.get_json::<CartRecord>(&user_key).await?;

        let outcome = match existing {
            None => {
                self.promote(&guest_key, &user_key, guest, user_id).await?;
                MigrationOutcome::Promoted
            }
            Some(user_cart) => {
                self.merge(&guest_key, &user_key, &guest, user_cart).await?;
                MigrationOutcome::Merged
            }
        };
        info!(?outcome, "guest cart migrated");
        Ok(outcome)
    }

    /// Re-key the guest cart to the user and reclassify it GUEST -> USER.
    async fn promote(
        &self,
        guest_key: &str,
        user_key: &str,
        mut cart: CartRecord,
        user_id: UserId,
    ) -> Result<()> {
        let previous = (cart.status, cart.cart_type);
        let now = Utc::now();

        cart.user_id = Some(user_id);
        cart.session_id = None;
        cart.cart_type = CartType::User;
        cart.touch(now);
        cart.expires_at = Some(self.policy.compute_expiry(cart.cart_type, cart.status, now));

        let ttl = self.policy.ttl_for(cart.cart_type, cart.status);
        // Write the new identity before deleting the old one.
        self.tiers.write_cart(user_key, &cart, ttl).await?;
        self.tiers.remove_cart(guest_key).await?;

        self.index.record_removed(guest_key, previous.0, previous.1).await;
        self.index.record_written(user_key, &cart, None, ttl).await;
        self.invalidate_derived(guest_key, user_key).await;
        Ok(())
    }

    /// Merge the guest cart's lines into the user's existing cart.
    async fn merge(
        &self,
        guest_key: &str,
        user_key: &str,
        guest: &CartRecord,
        mut user_cart: CartRecord,
    ) -> Result<()> {
        let previous = (user_cart.status, user_cart.cart_type);
        let now = Utc::now();

        merge_lines(&mut user_cart, guest);
        user_cart.touch(now);
        user_cart.expires_at =
            Some(self.policy.compute_expiry(user_cart.cart_type, user_cart.status, now));

        let ttl = self.policy.ttl_for(user_cart.cart_type, user_cart.status);
        // Single write of the fully merged record, then the delete; no
        // interleaved partial-item state is ever visible.
        self.tiers.write_cart(user_key, &user_cart, ttl).await?;
        self.tiers.remove_cart(guest_key).await?;

        self.index
            .record_removed(guest_key, guest.status, guest.cart_type)
            .await;
        self.index
            .record_written(user_key, &user_cart, Some(previous), ttl)
            .await;
        self.invalidate_derived(guest_key, user_key).await;
        Ok(())
    }

    /// Drop stale validation/pricing entries for both identities.
    async fn invalidate_derived(&self, guest_key: &str, user_key: &str) {
        for key in [guest_key, user_key] {
            self.tiers.invalidate_validation(key).await;
            self.tiers.invalidate_pricing(key).await;
        }
    }
}

/// Fold `guest`'s line items into `destination`.
///
/// Matching is exact on `(product_id, variant_id)` - a `None` variant only
/// matches another `None`. Overlapping lines sum quantities and keep the
/// destination's unit price (the longer-lived record wins a price
/// discrepancy); everything else is appended unchanged. Aggregate totals
/// are recomputed from the merged lines, never trusted from either side.
pub fn merge_lines(destination: &mut CartRecord, guest: &CartRecord) {
    for guest_line in &guest.lines {
        match destination
            .lines
            .iter_mut()
            .find(|line| line.merge_key() == guest_line.merge_key())
        {
            Some(line) => {
                line.quantity = line.quantity.saturating_add(guest_line.quantity);
            }
            None => destination.lines.push(guest_line.clone()),
        }
    }
    destination.recompute_totals();
}

#[cfg(test)]
mod tests {
    use cartwheel_core::{CartLine, ProductId, VariantId};
    use rust_decimal::Decimal;

    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().expect("valid decimal literal")
    }

    fn cart_with(lines: Vec<CartLine>) -> CartRecord {
        let mut cart = CartRecord::new_user(UserId::new(1), Utc::now());
        cart.lines = lines;
        cart.recompute_totals();
        cart
    }

    #[test]
    fn test_disjoint_lines_append() {
        let mut user = cart_with(vec![CartLine::new(ProductId::new(1), None, 1, dec("5.00"))]);
        let mut guest = CartRecord::new_guest(SessionId::generate(), Utc::now());
        guest.lines = vec![CartLine::new(ProductId::new(2), None, 2, dec("3.00"))];
        guest.recompute_totals();

        merge_lines(&mut user, &guest);
        assert_eq!(user.lines.len(), 2);
        assert_eq!(user.item_count, 3);
        assert_eq!(user.subtotal, dec("11.00"));
    }

    #[test]
    fn test_overlapping_lines_sum_quantities() {
        let mut user = cart_with(vec![
            CartLine::new(ProductId::new(1), None, 3, dec("5.00")),
            CartLine::new(ProductId::new(2), None, 1, dec("2.00")),
        ]);
        let mut guest = CartRecord::new_guest(SessionId::generate(), Utc::now());
        guest.lines = vec![CartLine::new(ProductId::new(1), None, 1, dec("5.00"))];
        guest.recompute_totals();

        merge_lines(&mut user, &guest);
        assert_eq!(user.lines.len(), 2);
        let merged = user
            .lines
            .iter()
            .find(|l| l.product_id == ProductId::new(1))
            .expect("line");
        assert_eq!(merged.quantity, 4);
        assert_eq!(merged.line_total, dec("20.00"));
        assert_eq!(user.subtotal, dec("22.00"));
    }

    #[test]
    fn test_null_variant_only_matches_null() {
        let mut user = cart_with(vec![CartLine::new(
            ProductId::new(1),
            Some(VariantId::new(9)),
            1,
            dec("5.00"),
        )]);
        let mut guest = CartRecord::new_guest(SessionId::generate(), Utc::now());
        guest.lines = vec![CartLine::new(ProductId::new(1), None, 2, dec("5.00"))];
        guest.recompute_totals();

        merge_lines(&mut user, &guest);
        // Same product, different variant identity: two separate lines.
        assert_eq!(user.lines.len(), 2);
    }

    #[test]
    fn test_destination_price_wins_on_discrepancy() {
        let mut user = cart_with(vec![CartLine::new(ProductId::new(1), None, 1, dec("5.00"))]);
        let mut guest = CartRecord::new_guest(SessionId::generate(), Utc::now());
        guest.lines = vec![CartLine::new(ProductId::new(1), None, 1, dec("4.00"))];
        guest.recompute_totals();

        merge_lines(&mut user, &guest);
        let merged = user.lines.first().expect("line");
        assert_eq!(merged.unit_price, dec("5.00"));
        assert_eq!(merged.line_total, dec("10.00"));
    }

    #[test]
    fn test_hostile_quantities_saturate_instead_of_wrapping() {
        let mut user = cart_with(vec![CartLine::new(
            ProductId::new(1),
            None,
            u32::MAX,
            dec("0.01"),
        )]);
        let mut guest = CartRecord::new_guest(SessionId::generate(), Utc::now());
        guest.lines = vec![CartLine::new(ProductId::new(1), None, 5, dec("0.01"))];

        merge_lines(&mut user, &guest);
        let merged = user.lines.first().expect("line");
        assert_eq!(merged.quantity, u32::MAX);
        assert_eq!(user.item_count, u32::MAX);
    }

    #[test]
    fn test_stale_guest_totals_are_ignored() {
        let mut user = cart_with(vec![]);
        let mut guest = CartRecord::new_guest(SessionId::generate(), Utc::now());
        guest.lines = vec![CartLine::new(ProductId::new(1), None, 2, dec("3.00"))];
        // Deliberately stale aggregates on the guest side.
        guest.subtotal = dec("999.00");
        guest.item_count = 99;

        merge_lines(&mut user, &guest);
        assert_eq!(user.subtotal, dec("6.00"));
        assert_eq!(user.item_count, 2);
    }

    #[test]
    fn test_disjoint_merge_is_commutative_on_item_sets() {
        let line_a = CartLine::new(ProductId::new(1), None, 1, dec("1.00"));
        let line_b = CartLine::new(ProductId::new(2), Some(VariantId::new(3)), 2, dec("2.00"));

        let mut forward = cart_with(vec![line_a.clone()]);
        let mut guest = CartRecord::new_guest(SessionId::generate(), Utc::now());
        guest.lines = vec![line_b.clone()];
        merge_lines(&mut forward, &guest);

        let mut reverse = cart_with(vec![line_b]);
        let mut guest = CartRecord::new_guest(SessionId::generate(), Utc::now());
        guest.lines = vec![line_a];
        merge_lines(&mut reverse, &guest);

        let keys = |cart: &CartRecord| {
            let mut keys: Vec<_> = cart.lines.iter().map(CartLine::merge_key).collect();
            keys.sort();
            keys
        };
        assert_eq!(keys(&forward), keys(&reverse));
        assert_eq!(forward.subtotal, reverse.subtotal);
    }
}

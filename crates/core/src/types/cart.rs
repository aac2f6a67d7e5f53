//! Cart records as stored in the cache tier.
//!
//! A [`CartRecord`] is the authoritative in-cache representation of a
//! shopping cart between a request and the durable write-back. Totals are
//! always derived from the line items via [`CartRecord::recompute_totals`];
//! stored totals are never trusted across a merge.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::id::{CartId, ProductId, SessionId, UserId, VariantId};

/// Cart classification, which drives TTL and lifecycle rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CartType {
    /// Anonymous-session cart, shortest lifetime.
    #[default]
    Guest,
    /// Authenticated user's active cart.
    User,
    /// Saved-for-later cart.
    Saved,
    /// Wishlist, longest lifetime.
    Wishlist,
}

impl CartType {
    /// Store-key token, matching the wire format of the shared store.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Guest => "GUEST",
            Self::User => "USER",
            Self::Saved => "SAVED",
            Self::Wishlist => "WISHLIST",
        }
    }
}

impl std::fmt::Display for CartType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cart lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CartStatus {
    #[default]
    Active,
    Abandoned,
    Expired,
    Converted,
    Deleted,
}

impl CartStatus {
    /// Store-key token, matching the wire format of the shared store.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Abandoned => "ABANDONED",
            Self::Expired => "EXPIRED",
            Self::Converted => "CONVERTED",
            Self::Deleted => "DELETED",
        }
    }
}

impl std::fmt::Display for CartStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single cart line item.
///
/// Lines are keyed by `(product_id, variant_id)`; a `None` variant only
/// ever matches another `None` variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl CartLine {
    /// Create a line with its total derived from quantity and unit price.
    #[must_use]
    pub fn new(
        product_id: ProductId,
        variant_id: Option<VariantId>,
        quantity: u32,
        unit_price: Decimal,
    ) -> Self {
        Self {
            product_id,
            variant_id,
            quantity,
            unit_price,
            line_total: unit_price * Decimal::from(quantity),
        }
    }

    /// The merge-matching key for this line.
    #[must_use]
    pub const fn merge_key(&self) -> (ProductId, Option<VariantId>) {
        (self.product_id, self.variant_id)
    }

    /// Re-derive `line_total` from `quantity * unit_price`.
    pub fn recompute_total(&mut self) {
        self.line_total = self.unit_price * Decimal::from(self.quantity);
    }
}

/// An applied coupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    /// Absolute discount amount subtracted from the subtotal.
    pub discount: Decimal,
}

/// The authoritative in-cache cart state.
///
/// Invariant: exactly one of `user_id` / `session_id` is the primary
/// lookup key at any time; both are only populated transiently during
/// migration. Invariant: `expires_at` is derived from
/// `(cart_type, status, last activity)` - it is never accepted as input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartRecord {
    pub cart_id: CartId,
    pub user_id: Option<UserId>,
    pub session_id: Option<SessionId>,
    pub cart_type: CartType,
    pub status: CartStatus,
    pub lines: Vec<CartLine>,
    pub coupon: Option<Coupon>,
    pub subtotal: Decimal,
    pub item_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl CartRecord {
    /// Create an empty guest cart keyed by session.
    #[must_use]
    pub fn new_guest(session_id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            cart_id: CartId::generate(),
            user_id: None,
            session_id: Some(session_id),
            cart_type: CartType::Guest,
            status: CartStatus::Active,
            lines: Vec::new(),
            coupon: None,
            subtotal: Decimal::ZERO,
            item_count: 0,
            created_at: now,
            last_activity: Some(now),
            expires_at: None,
            deleted_at: None,
        }
    }

    /// Create an empty user cart.
    #[must_use]
    pub fn new_user(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            cart_id: CartId::generate(),
            user_id: Some(user_id),
            session_id: None,
            cart_type: CartType::User,
            status: CartStatus::Active,
            lines: Vec::new(),
            coupon: None,
            subtotal: Decimal::ZERO,
            item_count: 0,
            created_at: now,
            last_activity: Some(now),
            expires_at: None,
            deleted_at: None,
        }
    }

    /// Re-derive `subtotal` and `item_count` from the line items and any
    /// applied coupon. Line totals are recomputed first, so stale cached
    /// totals never survive.
    pub fn recompute_totals(&mut self) {
        let mut subtotal = Decimal::ZERO;
        let mut item_count: u32 = 0;
        for line in &mut self.lines {
            line.recompute_total();
            subtotal += line.line_total;
            item_count = item_count.saturating_add(line.quantity);
        }
        if let Some(coupon) = &self.coupon {
            subtotal = (subtotal - coupon.discount).max(Decimal::ZERO);
        }
        self.subtotal = subtotal;
        self.item_count = item_count;
    }

    /// The base instant expiry is computed from: `last_activity` when
    /// present, else `created_at`.
    #[must_use]
    pub fn activity_basis(&self) -> DateTime<Utc> {
        self.last_activity.unwrap_or(self.created_at)
    }

    /// Record activity at `now`, invalidating the stored expiry so it is
    /// re-derived on the next write.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = Some(now);
        self.expires_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dec(s: &str) -> Decimal {
        s.parse().expect("valid decimal literal")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).single().expect("valid")
    }

    #[test]
    fn test_line_total_derived_on_construction() {
        let line = CartLine::new(ProductId::new(1), None, 3, dec("9.99"));
        assert_eq!(line.line_total, dec("29.97"));
    }

    #[test]
    fn test_recompute_totals_ignores_stale_values() {
        let mut cart = CartRecord::new_guest(SessionId::generate(), now());
        cart.lines = vec![
            CartLine::new(ProductId::new(1), None, 2, dec("5.00")),
            CartLine::new(ProductId::new(2), Some(VariantId::new(7)), 1, dec("3.50")),
        ];
        // Poison the aggregates; recompute must overwrite them.
        cart.subtotal = dec("999.99");
        cart.item_count = 42;
        cart.recompute_totals();
        assert_eq!(cart.subtotal, dec("13.50"));
        assert_eq!(cart.item_count, 3);
    }

    #[test]
    fn test_item_count_saturates_instead_of_wrapping() {
        let mut cart = CartRecord::new_guest(SessionId::generate(), now());
        cart.lines = vec![
            CartLine::new(ProductId::new(1), None, u32::MAX, dec("0.01")),
            CartLine::new(ProductId::new(2), None, 2, dec("0.01")),
        ];
        cart.recompute_totals();
        assert_eq!(cart.item_count, u32::MAX);
    }

    #[test]
    fn test_coupon_discount_never_goes_negative() {
        let mut cart = CartRecord::new_user(UserId::new(1), now());
        cart.lines = vec![CartLine::new(ProductId::new(1), None, 1, dec("2.00"))];
        cart.coupon = Some(Coupon {
            code: "BIG".to_string(),
            discount: dec("10.00"),
        });
        cart.recompute_totals();
        assert_eq!(cart.subtotal, Decimal::ZERO);
    }

    #[test]
    fn test_activity_basis_falls_back_to_created_at() {
        let mut cart = CartRecord::new_guest(SessionId::generate(), now());
        cart.last_activity = None;
        assert_eq!(cart.activity_basis(), cart.created_at);
    }

    #[test]
    fn test_touch_clears_stored_expiry() {
        let mut cart = CartRecord::new_guest(SessionId::generate(), now());
        cart.expires_at = Some(now());
        cart.touch(now() + chrono::Duration::minutes(5));
        assert!(cart.expires_at.is_none());
        assert_eq!(cart.last_activity, Some(now() + chrono::Duration::minutes(5)));
    }

    #[test]
    fn test_status_serde_wire_format() {
        let json = serde_json::to_string(&CartStatus::Abandoned).expect("serialize");
        assert_eq!(json, "\"ABANDONED\"");
        let json = serde_json::to_string(&CartType::Wishlist).expect("serialize");
        assert_eq!(json, "\"WISHLIST\"");
    }
}

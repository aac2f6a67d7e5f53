//! Store key naming.
//!
//! These formats are shared with other components reading the same store
//! and must be preserved bit-for-bit:
//!
//! - `user_cart:<userId>` - user-keyed cart record
//! - `session_cart:<sessionId>` - session-keyed (guest) cart record
//! - `cart_lock:<resourceKey>` - distributed lock leases
//! - `cart_status:<STATUS>` - status index set
//! - `cart_type:<TYPE>` - cart-type index set
//!
//! Session registry keys (`session:*`) are private to this layer.

use cartwheel_core::{CartStatus, CartType, SessionId, UserId};

/// Registry set holding every live session id.
pub const SESSION_REGISTRY: &str = "session_registry";

/// Primary key for a user's cart.
#[must_use]
pub fn user_cart(user_id: UserId) -> String {
    format!("user_cart:{user_id}")
}

/// Primary key for a guest session's cart.
#[must_use]
pub fn session_cart(session_id: SessionId) -> String {
    format!("session_cart:{session_id}")
}

/// Lock key for an arbitrary resource.
#[must_use]
pub fn cart_lock(resource: &str) -> String {
    format!("cart_lock:{resource}")
}

/// Lock resource for a guest-to-user migration.
///
/// Keyed on the destination user only, so two concurrent logins by the
/// same user from different sessions serialize on one lease.
#[must_use]
pub fn migration_resource(user_id: UserId) -> String {
    format!("user_migration:{user_id}")
}

/// Status index set key.
#[must_use]
pub fn cart_status_index(status: CartStatus) -> String {
    format!("cart_status:{status}")
}

/// Cart-type index set key.
#[must_use]
pub fn cart_type_index(cart_type: CartType) -> String {
    format!("cart_type:{cart_type}")
}

/// Session metadata key.
#[must_use]
pub fn session(session_id: SessionId) -> String {
    format!("session:{session_id}")
}

/// Per-user session set key.
#[must_use]
pub fn user_sessions(user_id: UserId) -> String {
    format!("user_sessions:{user_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_formats_are_stable() {
        let user_id = UserId::new(42);
        assert_eq!(user_cart(user_id), "user_cart:42");
        assert_eq!(cart_lock("user_migration:42"), "cart_lock:user_migration:42");
        assert_eq!(cart_lock(&migration_resource(user_id)), "cart_lock:user_migration:42");
        assert_eq!(cart_status_index(CartStatus::Active), "cart_status:ACTIVE");
        assert_eq!(cart_type_index(CartType::Guest), "cart_type:GUEST");

        let session_id = SessionId::generate();
        assert_eq!(session_cart(session_id), format!("session_cart:{session_id}"));
        assert_eq!(session(session_id), format!("session:{session_id}"));
    }
}

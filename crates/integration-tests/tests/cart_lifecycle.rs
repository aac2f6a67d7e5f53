//! Request-facing cart operations.

use cartwheel_cache::durable::DurableStore;
use cartwheel_cache::error::CacheError;
use cartwheel_cache::service::ValidationIssue;
use cartwheel_core::{CartLine, CartStatus, CartType, Coupon, ProductId, UserId, VariantId};
use cartwheel_integration_tests::TestContext;
use rust_decimal::Decimal;

fn dec(s: &str) -> Decimal {
    s.parse().expect("valid decimal literal")
}

// =============================================================================
// GetOrCreate / Update
// =============================================================================

#[tokio::test]
async fn test_get_or_create_returns_the_same_cart() {
    let ctx = TestContext::new();
    let session = ctx
        .service
        .create_guest_session()
        .await
        .expect("session");

    let first = ctx
        .service
        .get_or_create_cart(None, Some(session.session_id))
        .await
        .expect("create");
    assert_eq!(first.cart_type, CartType::Guest);
    assert!(first.lines.is_empty());

    let second = ctx
        .service
        .get_or_create_cart(None, Some(session.session_id))
        .await
        .expect("fetch");
    assert_eq!(second.cart_id, first.cart_id);
}

#[tokio::test]
async fn test_get_or_create_requires_a_locator() {
    let ctx = TestContext::new();
    let err = ctx
        .service
        .get_or_create_cart(None, None)
        .await
        .expect_err("no locator");
    assert!(matches!(err, CacheError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_update_recomputes_totals_and_expiry_server_side() {
    let ctx = TestContext::new();
    let user = UserId::new(1);
    let mut cart = ctx
        .service
        .get_or_create_cart(Some(user), None)
        .await
        .expect("create");

    cart.lines = vec![
        CartLine::new(ProductId::new(1), None, 2, dec("3.00")),
        CartLine::new(ProductId::new(1), Some(VariantId::new(5)), 1, dec("4.00")),
    ];
    // Poison the aggregates and expiry; the service must not trust them.
    cart.subtotal = dec("0.01");
    cart.item_count = 99;
    cart.expires_at = Some(chrono::Utc::now() + chrono::Duration::days(400));

    let updated = ctx.service.update_cart(cart).await.expect("update");
    assert_eq!(updated.subtotal, dec("10.00"));
    assert_eq!(updated.item_count, 3);
    let horizon = chrono::Utc::now() + chrono::Duration::days(8);
    assert!(updated.expires_at.expect("expiry derived") < horizon);

    // Write-behind reached the durable store.
    let durable_copy = ctx
        .durable
        .load_cart(updated.cart_id)
        .await
        .expect("load")
        .expect("saved");
    assert_eq!(durable_copy.subtotal, dec("10.00"));
}

// =============================================================================
// Coupons
// =============================================================================

#[tokio::test]
async fn test_apply_and_remove_coupon_adjust_totals() {
    let ctx = TestContext::new();
    let user = UserId::new(2);
    let mut cart = ctx
        .service
        .get_or_create_cart(Some(user), None)
        .await
        .expect("create");
    cart.lines = vec![CartLine::new(ProductId::new(1), None, 2, dec("10.00"))];
    ctx.service.update_cart(cart).await.expect("seed");

    let discounted = ctx
        .service
        .apply_coupon(Some(user), None, "SAVE5".to_string(), dec("5.00"))
        .await
        .expect("apply");
    assert_eq!(discounted.subtotal, dec("15.00"));
    assert_eq!(
        discounted.coupon,
        Some(Coupon {
            code: "SAVE5".to_string(),
            discount: dec("5.00"),
        })
    );

    let restored = ctx
        .service
        .remove_coupon(Some(user), None)
        .await
        .expect("remove");
    assert_eq!(restored.subtotal, dec("20.00"));
    assert!(restored.coupon.is_none());
}

#[tokio::test]
async fn test_coupon_on_missing_cart_is_not_found() {
    let ctx = TestContext::new();
    let err = ctx
        .service
        .apply_coupon(Some(UserId::new(404)), None, "X".to_string(), dec("1.00"))
        .await
        .expect_err("no cart");
    assert!(matches!(err, CacheError::RecordNotFound(_)));
}

// =============================================================================
// Pricing
// =============================================================================

#[tokio::test]
async fn test_pricing_snapshot_is_cached_until_mutation() {
    let ctx = TestContext::new();
    let user = UserId::new(6);
    let mut cart = ctx
        .service
        .get_or_create_cart(Some(user), None)
        .await
        .expect("create");
    cart.lines = vec![CartLine::new(ProductId::new(1), None, 2, dec("10.00"))];
    ctx.service.update_cart(cart).await.expect("seed");
    ctx.service
        .apply_coupon(Some(user), None, "SAVE5".to_string(), dec("5.00"))
        .await
        .expect("apply");

    let first = ctx
        .service
        .pricing_snapshot(Some(user), None)
        .await
        .expect("price");
    assert_eq!(first.subtotal, dec("20.00"));
    assert_eq!(first.discount, dec("5.00"));
    assert_eq!(first.total, dec("15.00"));

    // Repeat reads serve the cached snapshot.
    let second = ctx
        .service
        .pricing_snapshot(Some(user), None)
        .await
        .expect("price again");
    assert_eq!(second.computed_at, first.computed_at);

    // A mutation drops the snapshot; the next read reflects it.
    ctx.service
        .remove_coupon(Some(user), None)
        .await
        .expect("remove");
    let third = ctx
        .service
        .pricing_snapshot(Some(user), None)
        .await
        .expect("reprice");
    assert_eq!(third.total, dec("20.00"));
    assert_eq!(third.discount, Decimal::ZERO);
}

#[tokio::test]
async fn test_pricing_snapshot_for_missing_cart_is_not_found() {
    let ctx = TestContext::new();
    let err = ctx
        .service
        .pricing_snapshot(Some(UserId::new(404)), None)
        .await
        .expect_err("no cart");
    assert!(matches!(err, CacheError::RecordNotFound(_)));
}

// =============================================================================
// Delete
// =============================================================================

#[tokio::test]
async fn test_delete_cart_is_a_soft_delete() {
    let ctx = TestContext::new();
    let user = UserId::new(3);
    let cart = ctx
        .service
        .get_or_create_cart(Some(user), None)
        .await
        .expect("create");

    assert!(ctx.service.delete_cart(Some(user), None).await.expect("delete"));

    // Still present under the retention window, marked deleted.
    let retained = ctx
        .service
        .get_cart(Some(user), None)
        .await
        .expect("get")
        .expect("retained");
    assert_eq!(retained.status, CartStatus::Deleted);
    assert!(retained.deleted_at.is_some());

    // And the durable store heard about it.
    assert_eq!(ctx.durable.soft_deleted().await, vec![cart.cart_id]);
}

#[tokio::test]
async fn test_delete_missing_cart_returns_false() {
    let ctx = TestContext::new();
    assert!(
        !ctx.service
            .delete_cart(Some(UserId::new(404)), None)
            .await
            .expect("delete")
    );
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_validate_flags_empty_and_zero_quantity_carts() {
    let ctx = TestContext::new();
    let user = UserId::new(4);
    ctx.service
        .get_or_create_cart(Some(user), None)
        .await
        .expect("create");

    let empty = ctx
        .service
        .validate_cart(Some(user), None)
        .await
        .expect("validate");
    assert!(!empty.valid);
    assert!(empty.issues.contains(&ValidationIssue::EmptyCart));

    let mut cart = ctx
        .service
        .get_cart(Some(user), None)
        .await
        .expect("get")
        .expect("present");
    cart.lines = vec![CartLine::new(ProductId::new(1), None, 0, dec("1.00"))];
    ctx.service.update_cart(cart).await.expect("update");

    let flagged = ctx
        .service
        .validate_cart(Some(user), None)
        .await
        .expect("validate");
    assert!(!flagged.valid);
    assert!(
        flagged
            .issues
            .contains(&ValidationIssue::ZeroQuantityLine { product_id: 1 })
    );
}

#[tokio::test]
async fn test_validate_passes_a_healthy_cart() {
    let ctx = TestContext::new();
    let user = UserId::new(5);
    let mut cart = ctx
        .service
        .get_or_create_cart(Some(user), None)
        .await
        .expect("create");
    cart.lines = vec![CartLine::new(ProductId::new(1), None, 1, dec("9.99"))];
    ctx.service.update_cart(cart).await.expect("update");

    let result = ctx
        .service
        .validate_cart(Some(user), None)
        .await
        .expect("validate");
    assert!(result.valid);
    assert!(result.issues.is_empty());

    // The result is served from the validation cache on repeat.
    let cached = ctx
        .service
        .validate_cart(Some(user), None)
        .await
        .expect("validate again");
    assert_eq!(cached.checked_at, result.checked_at);
}

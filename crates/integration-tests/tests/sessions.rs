//! Session registry behavior at the authentication boundary.

use cartwheel_cache::error::CacheError;
use cartwheel_core::{SessionId, SessionKind, SessionStatus, UserId};
use cartwheel_integration_tests::TestContext;

#[tokio::test]
async fn test_guest_session_lifecycle() {
    let ctx = TestContext::new();
    let session = ctx
        .service
        .create_guest_session()
        .await
        .expect("create");
    assert_eq!(session.kind, SessionKind::Guest);
    assert_eq!(session.status, SessionStatus::Created);

    let associated = ctx
        .service
        .associate_session_with_user(session.session_id, UserId::new(1))
        .await
        .expect("associate");
    assert_eq!(associated.kind, SessionKind::User);
    assert_eq!(associated.status, SessionStatus::Associated);
    assert_eq!(associated.user_id, Some(UserId::new(1)));
    assert!(associated.associated_at.is_some());
}

#[tokio::test]
async fn test_association_is_idempotent_but_rejects_a_second_user() {
    let ctx = TestContext::new();
    let session = ctx
        .service
        .create_guest_session()
        .await
        .expect("create");
    let user = UserId::new(1);

    ctx.service
        .associate_session_with_user(session.session_id, user)
        .await
        .expect("first");
    ctx.service
        .associate_session_with_user(session.session_id, user)
        .await
        .expect("repeat is a no-op");

    let err = ctx
        .service
        .associate_session_with_user(session.session_id, UserId::new(2))
        .await
        .expect_err("different user must conflict");
    match err {
        CacheError::SessionConflict {
            existing,
            requested,
            ..
        } => {
            assert_eq!(existing, UserId::new(1));
            assert_eq!(requested, UserId::new(2));
        }
        other => panic!("expected SessionConflict, got {other}"),
    }
}

#[tokio::test]
async fn test_associating_an_unknown_session_is_not_found() {
    let ctx = TestContext::new();
    let err = ctx
        .service
        .associate_session_with_user(SessionId::generate(), UserId::new(1))
        .await
        .expect_err("unknown session");
    assert!(matches!(err, CacheError::RecordNotFound(_)));
}

#[tokio::test]
async fn test_cleanup_heals_orphaned_registry_entries() {
    let ctx = TestContext::new();
    let keep = ctx.service.create_guest_session().await.expect("keep");
    let orphan = ctx.service.create_guest_session().await.expect("orphan");

    // Expire the orphan's metadata behind the registry's back.
    ctx.service
        .tiers()
        .store()
        .delete(&cartwheel_cache::keys::session(orphan.session_id))
        .await
        .expect("delete metadata");

    let stats = ctx.service.sessions().cleanup_expired().await;
    assert_eq!(stats.scanned, 2);
    assert_eq!(stats.removed, 1);
    assert_eq!(stats.failures, 0);

    // The healthy session is untouched.
    assert!(
        ctx.service
            .sessions()
            .get(keep.session_id)
            .await
            .expect("get")
            .is_some()
    );
}

//! Guest session registry and user association.
//!
//! Per-session state machine: `CREATED(GUEST)` -> `ASSOCIATED(USER)` ->
//! expired/invalidated. Association is one-way and idempotent for the same
//! user; associating a session already bound to a different user is a
//! [`CacheError::SessionConflict`]. Guest sessions carry a short TTL,
//! associated sessions a long one.

use std::time::Duration;

use cartwheel_core::{SessionId, SessionKind, SessionRecord, SessionStatus, UserId};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::keys;
use crate::store::KeyedStore;

/// Registry/user-set TTLs always exceed the longest session TTL by this
/// skew so live sessions are never un-registered prematurely.
const REGISTRY_TTL_SKEW: Duration = Duration::from_secs(60 * 60);

/// Counters from one registry cleanup pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionCleanupStats {
    pub scanned: usize,
    pub removed: usize,
    pub failures: usize,
}

/// Creates, associates, and expires sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    store: KeyedStore,
    guest_ttl: Duration,
    user_ttl: Duration,
    cleanup_interval: Duration,
}

impl SessionRegistry {
    /// Create a registry over the shared store.
    #[must_use]
    pub const fn new(store: KeyedStore, config: &CacheConfig) -> Self {
        Self {
            store,
            guest_ttl: config.guest_session_ttl,
            user_ttl: config.user_session_ttl,
            cleanup_interval: config.session_cleanup_interval,
        }
    }

    const fn registry_ttl(&self) -> Duration {
        // Registry membership must outlive any session it tracks.
        Duration::from_secs(self.user_ttl.as_secs() + REGISTRY_TTL_SKEW.as_secs())
    }

    /// Mint a fresh anonymous session.
    pub async fn create_guest(&self) -> Result<SessionRecord> {
        let record = SessionRecord::new_guest(Utc::now());
        let key = keys::session(record.session_id);
        self.store
            .set_json(&key, &record, Some(self.guest_ttl))
            .await?;
        self.store
            .set_add(
                keys::SESSION_REGISTRY,
                &record.session_id.to_string(),
                self.registry_ttl(),
            )
            .await?;
        debug!(session_id = %record.session_id, "guest session created");
        Ok(record)
    }

    /// Load session metadata.
    pub async fn get(&self, session_id: SessionId) -> Result<Option<SessionRecord>> {
        self.store.get_json(&keys::session(session_id)).await
    }

    /// Bind a session to a user.
    ///
    /// Idempotent for the same user; a session bound to a different user
    /// yields [`CacheError::SessionConflict`]. On first association the
    /// session's TTL is extended to the long (user) window.
    pub async fn associate(&self, session_id: SessionId, user_id: UserId) -> Result<SessionRecord> {
        let key = keys::session(session_id);
        let Some(mut record) = self.store.get_json::<SessionRecord>(&key).await? else {
            return Err(CacheError::RecordNotFound(key));
        };

        match record.user_id {
            Some(existing) if existing == user_id => return Ok(record),
            Some(existing) => {
                return Err(CacheError::SessionConflict {
                    session_id,
                    existing,
                    requested: user_id,
                });
            }
            None => {}
        }
        if !record.is_live() {
            return Err(CacheError::InvalidRequest(format!(
                "session {session_id} is no longer live"
            )));
        }

        record.user_id = Some(user_id);
        record.kind = SessionKind::User;
        record.status = SessionStatus::Associated;
        record.associated_at = Some(Utc::now());

        self.store
            .set_json(&key, &record, Some(self.user_ttl))
            .await?;
        self.store
            .set_add(
                &keys::user_sessions(user_id),
                &session_id.to_string(),
                self.registry_ttl(),
            )
            .await?;
        info!(%session_id, %user_id, "session associated");
        Ok(record)
    }

    /// Explicitly invalidate a session. Returns whether it existed.
    pub async fn invalidate(&self, session_id: SessionId) -> Result<bool> {
        let key = keys::session(session_id);
        let record = self.store.get_json::<SessionRecord>(&key).await?;
        let existed = self.store.delete(&key).await?;
        self.store
            .set_remove(keys::SESSION_REGISTRY, &session_id.to_string())
            .await?;
        if let Some(record) = record
            && let Some(user_id) = record.user_id
        {
            self.store
                .set_remove(&keys::user_sessions(user_id), &session_id.to_string())
                .await?;
        }
        Ok(existed)
    }

    /// All live session ids currently bound to `user_id`.
    pub async fn sessions_for_user(&self, user_id: UserId) -> Result<Vec<SessionId>> {
        let members = self.store.set_members(&keys::user_sessions(user_id)).await?;
        Ok(members.iter().filter_map(|raw| raw.parse().ok()).collect())
    }

    /// Full scan over the registry set, removing entries whose metadata
    /// is gone (TTL-expired or orphaned) or no longer live. Intended to
    /// run on a fixed interval, not per request.
    pub async fn cleanup_expired(&self) -> SessionCleanupStats {
        let mut stats = SessionCleanupStats::default();
        let members = match self.store.set_members(keys::SESSION_REGISTRY).await {
            Ok(members) => members,
            Err(error) => {
                warn!(%error, "session cleanup enumeration failed");
                stats.failures += 1;
                return stats;
            }
        };

        for raw in members {
            stats.scanned += 1;
            let Ok(session_id) = raw.parse::<SessionId>() else {
                // Unparseable registry entry; drop it rather than fail.
                self.remove_registry_entry(&raw).await;
                stats.removed += 1;
                continue;
            };
            match self.get(session_id).await {
                Ok(Some(record)) if record.is_live() => {}
                Ok(Some(record)) => {
                    if let Err(error) = self.invalidate(session_id).await {
                        warn!(%session_id, %error, "failed to drop dead session");
                        stats.failures += 1;
                    } else {
                        debug!(%session_id, status = ?record.status, "dead session removed");
                        stats.removed += 1;
                    }
                }
                Ok(None) => {
                    // Metadata already expired; heal the orphaned entry.
                    self.remove_registry_entry(&raw).await;
                    stats.removed += 1;
                }
                Err(error) => {
                    warn!(%session_id, %error, "failed to load session during cleanup");
                    stats.failures += 1;
                }
            }
        }

        info!(
            scanned = stats.scanned,
            removed = stats.removed,
            failures = stats.failures,
            "session cleanup complete"
        );
        stats
    }

    async fn remove_registry_entry(&self, raw: &str) {
        if let Err(error) = self.store.set_remove(keys::SESSION_REGISTRY, raw).await {
            warn!(entry = raw, %error, "failed to remove registry entry");
        }
    }

    /// Run registry cleanup on its fixed interval, forever.
    pub async fn run_cleanup_loop(self) {
        let mut interval = tokio::time::interval(self.cleanup_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.cleanup_expired().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::memory::MemoryStore;

    fn registry() -> SessionRegistry {
        let store = KeyedStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(1));
        SessionRegistry::new(store, &CacheConfig::default())
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let registry = registry();
        let created = registry.create_guest().await.expect("create");
        let loaded = registry
            .get(created.session_id)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(loaded, created);
    }

    #[tokio::test]
    async fn test_associate_is_idempotent_for_same_user() {
        let registry = registry();
        let session = registry.create_guest().await.expect("create");
        let user = UserId::new(7);

        let first = registry.associate(session.session_id, user).await.expect("first");
        assert_eq!(first.status, SessionStatus::Associated);
        assert_eq!(first.kind, SessionKind::User);

        let second = registry.associate(session.session_id, user).await.expect("second");
        assert_eq!(second.user_id, Some(user));
    }

    #[tokio::test]
    async fn test_associate_conflicts_for_different_user() {
        let registry = registry();
        let session = registry.create_guest().await.expect("create");
        registry
            .associate(session.session_id, UserId::new(7))
            .await
            .expect("first");

        let err = registry
            .associate(session.session_id, UserId::new(8))
            .await
            .expect_err("must conflict");
        assert!(matches!(err, CacheError::SessionConflict { .. }));
    }

    #[tokio::test]
    async fn test_associate_missing_session_is_not_found() {
        let registry = registry();
        let err = registry
            .associate(SessionId::generate(), UserId::new(1))
            .await
            .expect_err("missing");
        assert!(matches!(err, CacheError::RecordNotFound(_)));
    }

    #[tokio::test]
    async fn test_user_session_set_tracks_association() {
        let registry = registry();
        let user = UserId::new(9);
        let a = registry.create_guest().await.expect("create");
        let b = registry.create_guest().await.expect("create");
        registry.associate(a.session_id, user).await.expect("a");
        registry.associate(b.session_id, user).await.expect("b");

        let mut sessions = registry.sessions_for_user(user).await.expect("list");
        sessions.sort_by_key(SessionId::to_string);
        let mut expected = vec![a.session_id, b.session_id];
        expected.sort_by_key(SessionId::to_string);
        assert_eq!(sessions, expected);
    }

    #[tokio::test]
    async fn test_cleanup_removes_orphaned_registry_entries() {
        let registry = registry();
        let session = registry.create_guest().await.expect("create");
        // Drop the metadata behind the registry's back.
        registry
            .store
            .delete(&keys::session(session.session_id))
            .await
            .expect("delete");

        let stats = registry.cleanup_expired().await;
        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.failures, 0);

        let members = registry
            .store
            .set_members(keys::SESSION_REGISTRY)
            .await
            .expect("members");
        assert!(members.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_is_terminal() {
        let registry = registry();
        let session = registry.create_guest().await.expect("create");
        assert!(registry.invalidate(session.session_id).await.expect("invalidate"));
        assert!(registry.get(session.session_id).await.expect("get").is_none());
        assert!(!registry.invalidate(session.session_id).await.expect("again"));
    }
}

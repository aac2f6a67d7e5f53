//! Session records owned by the session registry.
//!
//! A session starts anonymous and may be associated with a user exactly
//! once; association is one-way and never reverts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::id::{SessionId, UserId};

/// Whether a session is anonymous or bound to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionKind {
    #[default]
    Guest,
    User,
}

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    #[default]
    Created,
    Associated,
    Expired,
    Invalidated,
}

/// A session registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub user_id: Option<UserId>,
    pub kind: SessionKind,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub associated_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// Create a fresh anonymous session.
    #[must_use]
    pub fn new_guest(now: DateTime<Utc>) -> Self {
        Self {
            session_id: SessionId::generate(),
            user_id: None,
            kind: SessionKind::Guest,
            status: SessionStatus::Created,
            created_at: now,
            associated_at: None,
        }
    }

    /// Whether the session can still serve requests.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self.status, SessionStatus::Created | SessionStatus::Associated)
    }
}

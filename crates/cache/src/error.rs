//! Unified error handling for the cache layer.
//!
//! All failure crosses the public boundary as a [`CacheError`] value -
//! nothing in this crate panics past its API. The variants map directly to
//! caller policy: `StoreUnavailable` is retryable, `LockNotAcquired` means
//! "try again shortly", `SessionConflict` is surfaced and never
//! auto-resolved, and `RecordNotFound` is usually mapped to "create new"
//! by the caller rather than treated as a failure.

use cartwheel_core::{SessionId, UserId};
use thiserror::Error;

/// Cache-layer error type.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The networked store could not be reached, or a call exceeded its
    /// per-call timeout. The key's state is *unknown*, not absent;
    /// callers must retry rather than recreate.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Logical absence of a record the caller named explicitly.
    #[error("record not found: {0}")]
    RecordNotFound(String),

    /// The session is already bound to a different user. Never
    /// auto-resolved; surfaced to the caller as-is.
    #[error("session {session_id} already associated with user {existing}, refusing {requested}")]
    SessionConflict {
        session_id: SessionId,
        existing: UserId,
        requested: UserId,
    },

    /// Another holder owns the lease for this resource. Not a failure;
    /// the operation is already in progress elsewhere.
    #[error("lock not acquired for {0}")]
    LockNotAcquired(String),

    /// A cached payload failed to deserialize. The corrupted entry is
    /// deleted by the store wrapper; callers observe the key as absent.
    #[error("corrupted payload at {key}: {source}")]
    Deserialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A payload failed to serialize before a write.
    #[error("failed to serialize payload for {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The caller supplied arguments this layer cannot act on.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl CacheError {
    /// Whether the caller may retry the operation after a backoff.
    ///
    /// Only transient store failures qualify; logical conflicts
    /// (`SessionConflict`, `LockNotAcquired`) must not be blindly retried
    /// with backoff loops.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

/// Result type alias for cache-layer operations.
pub type Result<T> = std::result::Result<T, CacheError>;

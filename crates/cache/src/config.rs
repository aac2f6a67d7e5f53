//! Cache-layer configuration loaded from environment variables.
//!
//! Every knob has a production default; set the corresponding variable to
//! override. Durations are in seconds unless noted.
//!
//! # Environment Variables
//!
//! ## Store
//! - `CARTWHEEL_STORE_CALL_TIMEOUT_MS` - Per-call store timeout (default: 2000)
//!
//! ## Locks
//! - `CARTWHEEL_LOCK_LEASE_SECS` - Lock lease duration (default: 30)
//!
//! ## Cart TTLs
//! - `CARTWHEEL_GUEST_CART_TTL_SECS` - (default: 2 hours)
//! - `CARTWHEEL_USER_ACTIVE_CART_TTL_SECS` - (default: 7 days)
//! - `CARTWHEEL_USER_ABANDONED_CART_TTL_SECS` - (default: 24 hours)
//! - `CARTWHEEL_SAVED_CART_TTL_SECS` - (default: 30 days)
//! - `CARTWHEEL_WISHLIST_TTL_SECS` - (default: 90 days)
//!
//! ## Sessions
//! - `CARTWHEEL_GUEST_SESSION_TTL_SECS` - (default: 12 hours)
//! - `CARTWHEEL_USER_SESSION_TTL_SECS` - (default: 14 days)
//!
//! ## Background tasks
//! - `CARTWHEEL_SWEEP_INTERVAL_SECS` - Expiry sweep cadence (default: 300)
//! - `CARTWHEEL_SESSION_CLEANUP_INTERVAL_SECS` - (default: 3600)
//! - `CARTWHEEL_PURGE_RETENTION_SECS` - Soft-delete retention (default: 7 days)
//! - `CARTWHEEL_PURGE_INTERVAL_SECS` - Permanent purge cadence (default: 6 hours)
//!
//! ## L1 tier
//! - `CARTWHEEL_L1_CART_TTL_SECS` - (default: 30)
//! - `CARTWHEEL_L1_PRICING_TTL_SECS` - (default: 300)
//! - `CARTWHEEL_L1_VALIDATION_TTL_SECS` - (default: 120)
//! - `CARTWHEEL_L1_REFERENCE_TTL_SECS` - (default: 12 hours)
//! - `CARTWHEEL_L1_CAPACITY` - Max entries per L1 category (default: 10000)

use std::time::Duration;

use thiserror::Error;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Tuning for the cache layer.
///
/// The L1 TTLs are a deliberate content-aware policy, not a single global
/// default: volatile data (cart contents, validation) measures in seconds
/// to minutes; near-static reference data in hours.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Upper bound on any single networked-store call.
    pub store_call_timeout: Duration,
    /// Distributed lock lease window.
    pub lock_lease: Duration,

    /// Guest cart lifetime from last activity.
    pub guest_cart_ttl: Duration,
    /// User cart lifetime while ACTIVE.
    pub user_active_cart_ttl: Duration,
    /// User cart lifetime once ABANDONED.
    pub user_abandoned_cart_ttl: Duration,
    /// Saved-for-later cart lifetime.
    pub saved_cart_ttl: Duration,
    /// Wishlist lifetime.
    pub wishlist_ttl: Duration,

    /// Anonymous session lifetime.
    pub guest_session_ttl: Duration,
    /// Associated (authenticated) session lifetime.
    pub user_session_ttl: Duration,

    /// Cadence of the expiry sweep.
    pub sweep_interval: Duration,
    /// Cadence of the session registry cleanup.
    pub session_cleanup_interval: Duration,
    /// How long soft-deleted carts are retained before permanent purge.
    pub purge_retention: Duration,
    /// Cadence of the permanent purge sweep.
    pub purge_interval: Duration,

    /// L1 TTL for cart records.
    pub l1_cart_ttl: Duration,
    /// L1 TTL for pricing calculations.
    pub l1_pricing_ttl: Duration,
    /// L1 TTL for validation results.
    pub l1_validation_ttl: Duration,
    /// L1 TTL for reference data (tax/shipping tables).
    pub l1_reference_ttl: Duration,
    /// Max entries per L1 category cache.
    pub l1_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            store_call_timeout: Duration::from_millis(2000),
            lock_lease: Duration::from_secs(30),
            guest_cart_ttl: Duration::from_secs(2 * 60 * 60),
            user_active_cart_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            user_abandoned_cart_ttl: Duration::from_secs(24 * 60 * 60),
            saved_cart_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            wishlist_ttl: Duration::from_secs(90 * 24 * 60 * 60),
            guest_session_ttl: Duration::from_secs(12 * 60 * 60),
            user_session_ttl: Duration::from_secs(14 * 24 * 60 * 60),
            sweep_interval: Duration::from_secs(300),
            session_cleanup_interval: Duration::from_secs(3600),
            purge_retention: Duration::from_secs(7 * 24 * 60 * 60),
            purge_interval: Duration::from_secs(6 * 60 * 60),
            l1_cart_ttl: Duration::from_secs(30),
            l1_pricing_ttl: Duration::from_secs(300),
            l1_validation_ttl: Duration::from_secs(120),
            l1_reference_ttl: Duration::from_secs(12 * 60 * 60),
            l1_capacity: 10_000,
        }
    }
}

impl CacheConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnvVar`] if a set variable fails to
    /// parse as an integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(ms) = env_u64("CARTWHEEL_STORE_CALL_TIMEOUT_MS")? {
            config.store_call_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("CARTWHEEL_LOCK_LEASE_SECS")? {
            config.lock_lease = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CARTWHEEL_GUEST_CART_TTL_SECS")? {
            config.guest_cart_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CARTWHEEL_USER_ACTIVE_CART_TTL_SECS")? {
            config.user_active_cart_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CARTWHEEL_USER_ABANDONED_CART_TTL_SECS")? {
            config.user_abandoned_cart_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CARTWHEEL_SAVED_CART_TTL_SECS")? {
            config.saved_cart_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CARTWHEEL_WISHLIST_TTL_SECS")? {
            config.wishlist_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CARTWHEEL_GUEST_SESSION_TTL_SECS")? {
            config.guest_session_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CARTWHEEL_USER_SESSION_TTL_SECS")? {
            config.user_session_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CARTWHEEL_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CARTWHEEL_SESSION_CLEANUP_INTERVAL_SECS")? {
            config.session_cleanup_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CARTWHEEL_PURGE_RETENTION_SECS")? {
            config.purge_retention = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CARTWHEEL_PURGE_INTERVAL_SECS")? {
            config.purge_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CARTWHEEL_L1_CART_TTL_SECS")? {
            config.l1_cart_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CARTWHEEL_L1_PRICING_TTL_SECS")? {
            config.l1_pricing_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CARTWHEEL_L1_VALIDATION_TTL_SECS")? {
            config.l1_validation_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CARTWHEEL_L1_REFERENCE_TTL_SECS")? {
            config.l1_reference_ttl = Duration::from_secs(secs);
        }
        if let Some(capacity) = env_u64("CARTWHEEL_L1_CAPACITY")? {
            config.l1_capacity = capacity;
        }

        Ok(config)
    }
}

/// Read an optional u64 environment variable.
fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar(name.to_string(), e.to_string())),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_content_aware() {
        let config = CacheConfig::default();
        // Guest carts are the shortest-lived cart tier.
        assert!(config.guest_cart_ttl < config.user_abandoned_cart_ttl);
        assert!(config.user_abandoned_cart_ttl < config.user_active_cart_ttl);
        assert!(config.user_active_cart_ttl < config.saved_cart_ttl);
        assert!(config.saved_cart_ttl < config.wishlist_ttl);
        // Volatile L1 categories expire well before reference data.
        assert!(config.l1_cart_ttl < config.l1_reference_ttl);
        assert!(config.l1_validation_ttl < config.l1_reference_ttl);
        // Associated sessions outlive guest sessions.
        assert!(config.guest_session_ttl < config.user_session_ttl);
    }
}

//! Integration tests for Cartwheel.
//!
//! All scenarios run against the in-memory store backend, which shares
//! its observable semantics (TTL expiry, atomic set-if-absent, sets) with
//! the networked store.
//!
//! # Test Categories
//!
//! - `migration` - Guest-to-user cart migration and merge scenarios
//! - `cart_lifecycle` - Request-facing cart operations and validation
//! - `sweeper` - Expiry sweep, decision table, and index self-healing
//! - `sessions` - Session registry behavior at the auth boundary

use std::sync::{Arc, Once};

use cartwheel_cache::config::CacheConfig;
use cartwheel_cache::durable::InMemoryDurableStore;
use cartwheel_cache::service::CartService;
use cartwheel_cache::store::memory::MemoryStore;

static TRACING: Once = Once::new();

/// Install a fmt subscriber for the test binary, once. Honors `RUST_LOG`;
/// silent by default.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A service wired to fresh in-memory backends, plus handles to both so
/// tests can seed and inspect state directly.
pub struct TestContext {
    pub service: CartService,
    pub backend: Arc<MemoryStore>,
    pub durable: Arc<InMemoryDurableStore>,
}

impl TestContext {
    /// Build a context with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Build a context with a custom configuration.
    #[must_use]
    pub fn with_config(config: CacheConfig) -> Self {
        init_tracing();
        let backend = Arc::new(MemoryStore::new());
        let durable = Arc::new(InMemoryDurableStore::new());
        let service = CartService::new(backend.clone(), durable.clone(), config);
        Self {
            service,
            backend,
            durable,
        }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

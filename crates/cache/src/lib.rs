//! Cartwheel Cache - Cart cache & session consistency engine.
//!
//! This crate owns shopping-cart lifecycle state between a request and the
//! durable write-back: the authoritative cart record lives in a networked
//! key-value tier, fronted by a small in-process tier, with guest/user
//! session transitions reconciled at the authentication boundary.
//!
//! # Modules
//!
//! - [`store`] - Backend trait, in-memory backend, and the typed [`store::KeyedStore`]
//! - [`index`] - Secondary status/type set-indexes with self-healing
//! - [`lock`] - Best-effort distributed lease lock
//! - [`session`] - Guest session registry and user association
//! - [`migration`] - Guest-to-user cart migration and merge
//! - [`expiry`] - Per-type expiration policy and the background sweeper
//! - [`tier`] - L1 (moka) / L2 (keyed store) tier routing
//! - [`durable`] - Write-behind collaborator trait for the durable store
//! - [`service`] - The [`service::CartService`] facade request handlers use
//!
//! # Concurrency
//!
//! Every public entry point is safe to call from many tasks concurrently.
//! Cross-process exclusion flows exclusively through [`lock::DistributedLock`];
//! no in-process mutex guards cross-process state.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod durable;
pub mod error;
pub mod expiry;
pub mod index;
pub mod keys;
pub mod lock;
pub mod migration;
pub mod service;
pub mod session;
pub mod store;
pub mod tier;

pub use config::{CacheConfig, ConfigError};
pub use error::CacheError;
pub use service::CartService;

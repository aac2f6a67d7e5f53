//! Cartwheel Core - Shared types library.
//!
//! This crate provides the common types used across all Cartwheel
//! components:
//! - `cache` - Cart cache & session consistency engine
//! - `integration-tests` - End-to-end scenario tests
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no store access, no
//! background tasks. This keeps it lightweight and allows it to be used
//! anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, cart records, session records, statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;

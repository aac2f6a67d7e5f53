//! Core types for Cartwheel.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod cart;
pub mod id;
pub mod session;

pub use cart::{CartLine, CartRecord, CartStatus, CartType, Coupon};
pub use id::*;
pub use session::{SessionKind, SessionRecord, SessionStatus};

//! Domain Layer - Core price streaming types and business logic.
//!
//! This layer contains the core domain types for live price distribution
//! with no I/O. All types here are pure Rust with serialization support.

/// Rolling chart buffer, bucket merge and eviction.
pub mod chart;

/// Latest tick per symbol.
pub mod price_table;

/// Market data streaming types (ticks, sources, connection state).
pub mod streaming;

/// Subscription reference counting.
pub mod subscription;

/// Canonical symbol normalization.
pub mod symbol;

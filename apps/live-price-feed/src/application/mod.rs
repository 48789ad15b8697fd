//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for the feed connection and REST collaborators.
pub mod ports;

/// Subscription, ingress, polling and chart services.
pub mod services;

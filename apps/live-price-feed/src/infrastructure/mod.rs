//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Upstream price feed WebSocket client.
pub mod feed;

/// REST history and snapshot collaborators.
pub mod rest;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Composition root wiring the feed together.
pub mod runtime;

/// OpenTelemetry tracing integration.
pub mod telemetry;

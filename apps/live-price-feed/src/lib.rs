#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Live Price Feed - Tick Distribution Core
//!
//! Keeps one WebSocket connection to an upstream price feed, tracks the
//! latest tick per symbol, and fans ticks out to rolling per-symbol chart
//! buffers. Charts seed from a REST history endpoint and fall back to a
//! REST snapshot poller while the stream is unavailable.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure price types and algorithms
//!   - `symbol`: Canonical symbol normalization
//!   - `streaming`: Ticks, sources, connection state
//!   - `price_table`: Latest tick per symbol
//!   - `subscription`: Symbol reference counting
//!   - `chart`: Bucket merge, eviction and direction
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Feed channel and REST collaborator interfaces
//!   - `services`: Registry, ingress, backup poller, chart controller
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: WebSocket supervisor, codec and reconnect policy
//!   - `rest`: History and snapshot HTTP client
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!   - `runtime`: Composition root
//!
//! # Data Flow
//!
//! ```text
//!                 ┌────────────┐   ┌─────────────┐   ┌────────────┐
//! Price feed WS ─►│ Supervisor │──►│   Ingress   │──►│ PriceTable │
//!                 └────────────┘   └──────┬──────┘   └────────────┘
//!                       ▲                 │ per-symbol routes
//!                       │ subscribe       ▼
//!                 ┌─────┴──────┐   ┌─────────────┐   ┌────────────┐
//!                 │  Registry  │◄──│   Chart     │◄──│   Backup   │◄─ REST
//!                 └────────────┘   │ controllers │   │   poller   │
//!                                  └─────────────┘   └────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core price types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::chart::{ChartBuffer, ChartPoint, Direction, PointOutcome, RetentionPolicy};
pub use domain::price_table::PriceTable;
pub use domain::streaming::{AssetClass, ConnectionState, SourceTag, Tick, TickError};
pub use domain::subscription::{FeedCommand, SubscriptionStats};
pub use domain::symbol::{Symbol, SymbolNormalizer};

// Ports
pub use application::ports::{
    FeedChannel, FeedSendError, HistoryProvider, MarketHours, ProviderError, SnapshotProvider,
};

// Services
pub use application::services::{
    BackupPoller, ChartBufferController, ChartParams, ChartSettings, ChartSnapshot,
    ControllerError, ControllerState, FeedContext, IngressOutcome, PollResult,
    SubscriptionRegistry, TickIngress,
};

// Infrastructure config
pub use infrastructure::config::{ChartSpec, ConfigError, FeedConfig, FeedSettings};

// Feed connection
pub use infrastructure::feed::{
    ConnectionSupervisor, FeedEvent, FeedLink, FeedStatus, ReconnectConfig, SupervisorConfig,
};

// REST collaborators
pub use infrastructure::rest::{RestError, RestPriceClient};

// Runtime
pub use infrastructure::runtime::{FeedRuntime, RuntimeError};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};

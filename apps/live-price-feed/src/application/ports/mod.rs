//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `FeedChannel`: Send commands to the upstream feed, observe its state
//! - `HistoryProvider`: Historical series used to seed a chart
//! - `SnapshotProvider`: Latest price per symbol for backup polling
//! - `MarketHours`: Whether equity markets are open

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::chart::ChartPoint;
use crate::domain::streaming::{ConnectionState, Tick};
use crate::domain::subscription::FeedCommand;
use crate::domain::symbol::Symbol;

// =============================================================================
// Feed Channel
// =============================================================================

/// Failure to hand a command to the feed connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedSendError {
    /// The connection is not in the Connected state.
    #[error("feed is not connected")]
    NotConnected,
    /// The connection task has gone away.
    #[error("feed channel closed")]
    Closed,
}

/// Handle onto the upstream feed connection.
pub trait FeedChannel: Send + Sync {
    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Queue a command for the socket writer.
    ///
    /// # Errors
    ///
    /// Returns [`FeedSendError`] when the feed is not connected or the
    /// connection task is gone.
    fn send(&self, command: FeedCommand) -> Result<(), FeedSendError>;

    /// Whether the stream is live.
    fn is_connected(&self) -> bool {
        self.state().is_connected()
    }
}

// =============================================================================
// REST Collaborators
// =============================================================================

/// Failure reported by a REST collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{source_name} request failed: {message}")]
pub struct ProviderError {
    /// Which collaborator failed.
    pub source_name: &'static str,
    /// Human-readable reason.
    pub message: String,
}

impl ProviderError {
    /// Create an error for a named collaborator.
    #[must_use]
    pub fn new(source_name: &'static str, message: impl Into<String>) -> Self {
        Self {
            source_name,
            message: message.into(),
        }
    }
}

/// Historical series used to seed a chart.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Fetch the historical series for one symbol.
    ///
    /// Points may arrive unsorted and may contain non-finite values.
    async fn history(&self, symbol: &Symbol) -> Result<Vec<ChartPoint>, ProviderError>;
}

/// Latest price per symbol, polled while streaming is unavailable.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Fetch one snapshot per requested symbol.
    ///
    /// Symbols the endpoint does not know are omitted from the result.
    async fn snapshots(&self, symbols: &[Symbol]) -> Result<Vec<Tick>, ProviderError>;
}

// =============================================================================
// Market Hours
// =============================================================================

/// Whether the equity market is open at a given instant.
pub trait MarketHours: Send + Sync {
    /// Check if the market is open.
    fn is_open(&self, now: DateTime<Utc>) -> bool;
}

impl<F> MarketHours for F
where
    F: Fn(DateTime<Utc>) -> bool + Send + Sync,
{
    fn is_open(&self, now: DateTime<Utc>) -> bool {
        self(now)
    }
}

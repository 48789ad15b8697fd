//! Market Data Streaming Types
//!
//! Core domain types for live prices: the canonical tick, where it came
//! from, and the state of the upstream connection. These types are
//! codec-agnostic; both legacy wire shapes normalize into [`Tick`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::symbol::Symbol;

// =============================================================================
// Source & Asset Class
// =============================================================================

/// Where a price observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    /// Pushed by the streaming feed.
    Stream,
    /// Fetched by the backup poller.
    Poll,
    /// Synthesized from the last known value.
    LastKnown,
}

impl SourceTag {
    /// Get the tag name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Poll => "poll",
            Self::LastKnown => "last_known",
        }
    }
}

/// Asset class of a chart consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    /// Crypto pairs, traded around the clock.
    #[default]
    Crypto,
    /// Commodities and futures.
    Commodity,
    /// Stocks and ETFs, subject to market hours.
    Equity,
}

impl AssetClass {
    /// Parse an asset class name, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "crypto" => Some(Self::Crypto),
            "commodity" | "commodities" => Some(Self::Commodity),
            "equity" | "stock" | "etf" => Some(Self::Equity),
            _ => None,
        }
    }

    /// Get the asset class name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Crypto => "crypto",
            Self::Commodity => "commodity",
            Self::Equity => "equity",
        }
    }

    /// Whether this asset class only trades during market hours.
    #[must_use]
    pub const fn has_market_hours(self) -> bool {
        matches!(self, Self::Equity)
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// State of the upstream feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and none being attempted.
    #[default]
    Disconnected,
    /// First connection attempt in flight.
    Connecting,
    /// Connected; subscriptions flow immediately.
    Connected,
    /// Connection lost, retrying within the retry budget.
    Reconnecting,
    /// Retry budget exhausted; consumers fall back to polling.
    BackupMode,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::BackupMode => "backup_mode",
        }
    }

    /// Whether the stream is live.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether consumers should fall back to polling.
    ///
    /// Transient reconnects do not count; only an exhausted retry budget
    /// or an explicit disconnect does.
    #[must_use]
    pub const fn stream_unavailable(self) -> bool {
        matches!(self, Self::BackupMode | Self::Disconnected)
    }

    /// Numeric code used for the connection state gauge.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Reconnecting => 3,
            Self::BackupMode => 4,
        }
    }
}

// =============================================================================
// Tick
// =============================================================================

/// Reasons a price observation is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TickError {
    /// Symbol missing or blank.
    #[error("tick is missing a symbol")]
    MissingSymbol,
    /// Price missing.
    #[error("tick for {0} is missing a price")]
    MissingPrice(String),
    /// Timestamp missing.
    #[error("tick for {0} is missing a timestamp")]
    MissingTimestamp(String),
    /// Price is NaN or infinite.
    #[error("tick for {0} has a non-finite price")]
    NonFinitePrice(String),
    /// Change amount or percent is NaN or infinite.
    #[error("tick for {0} has a non-finite change value")]
    NonFiniteChange(String),
    /// Timestamp at or before the Unix epoch.
    #[error("tick for {0} has an invalid timestamp")]
    InvalidTimestamp(String),
}

/// One validated price observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tick {
    /// Canonical symbol.
    pub symbol: Symbol,
    /// Last traded or quoted price.
    pub price: f64,
    /// Absolute change versus the reference close.
    pub change_amount: f64,
    /// Percent change versus the reference close.
    pub change_percent: f64,
    /// Observation time.
    pub timestamp: DateTime<Utc>,
    /// Where the observation came from.
    pub source: SourceTag,
}

impl Tick {
    /// Build a validated tick.
    ///
    /// # Errors
    ///
    /// Returns [`TickError`] when the price or change values are not
    /// finite or the timestamp is not after the Unix epoch.
    pub fn new(
        symbol: Symbol,
        price: f64,
        change_amount: f64,
        change_percent: f64,
        timestamp: DateTime<Utc>,
        source: SourceTag,
    ) -> Result<Self, TickError> {
        if !price.is_finite() {
            return Err(TickError::NonFinitePrice(symbol.to_string()));
        }
        if !change_amount.is_finite() || !change_percent.is_finite() {
            return Err(TickError::NonFiniteChange(symbol.to_string()));
        }
        if timestamp.timestamp_millis() <= 0 {
            return Err(TickError::InvalidTimestamp(symbol.to_string()));
        }

        Ok(Self {
            symbol,
            price,
            change_amount,
            change_percent,
            timestamp,
            source,
        })
    }

    /// Observation time as epoch milliseconds.
    #[must_use]
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// Field-wise identity on the quoted values.
    ///
    /// Timestamps and source tags are ignored; a repeated quote with a new
    /// timestamp is still a repeat.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn same_quote(&self, other: &Self) -> bool {
        self.symbol == other.symbol
            && self.price == other.price
            && self.change_amount == other.change_amount
            && self.change_percent == other.change_percent
    }

    /// Copy of this tick carrying a different source tag.
    #[must_use]
    pub fn with_source(mut self, source: SourceTag) -> Self {
        self.source = source;
        self
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::canonical(s).unwrap()
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn tick_rejects_nan_price() {
        let err = Tick::new(sym("BTCUSDT"), f64::NAN, 0.0, 0.0, at(1_000), SourceTag::Stream)
            .unwrap_err();
        assert_eq!(err, TickError::NonFinitePrice("BTCUSDT".to_string()));
    }

    #[test]
    fn tick_rejects_epoch_timestamp() {
        let err =
            Tick::new(sym("BTCUSDT"), 100.0, 0.0, 0.0, at(0), SourceTag::Stream).unwrap_err();
        assert_eq!(err, TickError::InvalidTimestamp("BTCUSDT".to_string()));
    }

    #[test]
    fn tick_rejects_infinite_change() {
        let err = Tick::new(
            sym("BTCUSDT"),
            100.0,
            f64::INFINITY,
            0.0,
            at(1_000),
            SourceTag::Stream,
        )
        .unwrap_err();
        assert!(matches!(err, TickError::NonFiniteChange(_)));
    }

    #[test]
    fn same_quote_ignores_timestamp_and_source() {
        let a = Tick::new(sym("ETHUSDT"), 10.0, 1.0, 2.0, at(1_000), SourceTag::Stream).unwrap();
        let b = Tick::new(sym("ETHUSDT"), 10.0, 1.0, 2.0, at(9_000), SourceTag::Poll).unwrap();
        let c = Tick::new(sym("ETHUSDT"), 10.5, 1.0, 2.0, at(1_000), SourceTag::Stream).unwrap();

        assert!(a.same_quote(&b));
        assert!(!a.same_quote(&c));
    }

    #[test]
    fn asset_class_parsing() {
        assert_eq!(AssetClass::parse("Equity"), Some(AssetClass::Equity));
        assert_eq!(AssetClass::parse("stock"), Some(AssetClass::Equity));
        assert_eq!(AssetClass::parse("commodity"), Some(AssetClass::Commodity));
        assert_eq!(AssetClass::parse("crypto"), Some(AssetClass::Crypto));
        assert_eq!(AssetClass::parse("bonds"), None);
    }

    #[test]
    fn connection_state_fallback_rules() {
        assert!(ConnectionState::BackupMode.stream_unavailable());
        assert!(ConnectionState::Disconnected.stream_unavailable());
        assert!(!ConnectionState::Reconnecting.stream_unavailable());
        assert!(!ConnectionState::Connected.stream_unavailable());
        assert!(ConnectionState::Connected.is_connected());
    }
}

//! Feed Wire Message Types
//!
//! Every frame carries one envelope or an array of envelopes:
//!
//! ```json
//! {"event": "price_update", "data": {...}}
//! ```
//!
//! # Inbound Events
//!
//! - `price_update`: keyed by `symbol`
//! - `realtime_quote`: keyed by `ticker`
//!
//! Both carry `price`, `change_amount`, `change_percent`, `timestamp_utc`
//! and `data_source`. Numeric fields may arrive as JSON numbers or numeric
//! strings; timestamps as epoch milliseconds or RFC 3339 strings.
//!
//! # Outbound Events
//!
//! - `subscribe_prices {symbols}`
//! - `unsubscribe_prices {symbols}`
//! - `request_backup_data {symbols}`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::streaming::{SourceTag, Tick, TickError};
use crate::domain::subscription::FeedCommand;
use crate::domain::symbol::Symbol;

/// Inbound event name for symbol-keyed updates.
pub const EVENT_PRICE_UPDATE: &str = "price_update";
/// Inbound event name for ticker-keyed quotes.
pub const EVENT_REALTIME_QUOTE: &str = "realtime_quote";
/// Outbound subscribe event name.
pub const EVENT_SUBSCRIBE: &str = "subscribe_prices";
/// Outbound unsubscribe event name.
pub const EVENT_UNSUBSCRIBE: &str = "unsubscribe_prices";
/// Outbound snapshot request event name.
pub const EVENT_REQUEST_BACKUP: &str = "request_backup_data";

// =============================================================================
// Loose Scalars
// =============================================================================

/// Number that may be sent as a JSON number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireNumber {
    /// Plain JSON number.
    Number(f64),
    /// Numeric string such as `"190.25"` or `"NaN"`.
    Text(String),
}

impl WireNumber {
    /// Numeric value; unparseable text yields NaN.
    #[must_use]
    pub fn value(&self) -> f64 {
        match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse().unwrap_or(f64::NAN),
        }
    }
}

/// Timestamp sent as epoch milliseconds or an RFC 3339 string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    /// Epoch milliseconds.
    Millis(i64),
    /// Epoch milliseconds with a fractional part.
    FractionalMillis(f64),
    /// RFC 3339 string, or epoch milliseconds as a string.
    Text(String),
}

impl WireTimestamp {
    /// Parsed instant, or `None` when unparseable or out of range.
    #[must_use]
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Millis(ms) => DateTime::from_timestamp_millis(*ms),
            Self::FractionalMillis(ms) => {
                if !ms.is_finite() {
                    return None;
                }
                #[allow(clippy::cast_possible_truncation)]
                DateTime::from_timestamp_millis(ms.trunc() as i64)
            }
            Self::Text(s) => {
                let s = s.trim();
                if let Ok(ms) = s.parse::<i64>() {
                    return DateTime::from_timestamp_millis(ms);
                }
                DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }
        }
    }
}

// =============================================================================
// Inbound Messages
// =============================================================================

/// Fields shared by both inbound price shapes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteFields {
    /// Last price.
    #[serde(default)]
    pub price: Option<WireNumber>,
    /// Absolute change; defaults to 0.
    #[serde(default)]
    pub change_amount: Option<WireNumber>,
    /// Percent change; defaults to 0.
    #[serde(default)]
    pub change_percent: Option<WireNumber>,
    /// Observation time.
    #[serde(default)]
    pub timestamp_utc: Option<WireTimestamp>,
    /// Upstream provider name, informational only.
    #[serde(default)]
    pub data_source: Option<String>,
}

impl QuoteFields {
    fn into_tick(self, symbol: Option<&str>) -> Result<Tick, TickError> {
        let symbol = symbol
            .and_then(Symbol::canonical)
            .ok_or(TickError::MissingSymbol)?;

        let price = self
            .price
            .as_ref()
            .map(WireNumber::value)
            .ok_or_else(|| TickError::MissingPrice(symbol.to_string()))?;

        let timestamp = self
            .timestamp_utc
            .as_ref()
            .ok_or_else(|| TickError::MissingTimestamp(symbol.to_string()))?
            .to_datetime()
            .ok_or_else(|| TickError::InvalidTimestamp(symbol.to_string()))?;

        let change_amount = self.change_amount.as_ref().map_or(0.0, WireNumber::value);
        let change_percent = self.change_percent.as_ref().map_or(0.0, WireNumber::value);

        Tick::new(
            symbol,
            price,
            change_amount,
            change_percent,
            timestamp,
            SourceTag::Stream,
        )
    }
}

/// `price_update` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    /// Feed symbol.
    #[serde(default)]
    pub symbol: Option<String>,
    /// Price fields.
    #[serde(flatten)]
    pub quote: QuoteFields,
}

/// `realtime_quote` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealtimeQuote {
    /// Feed ticker.
    #[serde(default)]
    pub ticker: Option<String>,
    /// Price fields.
    #[serde(flatten)]
    pub quote: QuoteFields,
}

/// Decoded inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Symbol-keyed price update.
    PriceUpdate(PriceUpdate),
    /// Ticker-keyed realtime quote.
    RealtimeQuote(RealtimeQuote),
    /// Any other event, by name.
    Other(String),
}

impl FeedMessage {
    /// Event name for metrics and logs.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::PriceUpdate(_) => EVENT_PRICE_UPDATE,
            Self::RealtimeQuote(_) => EVENT_REALTIME_QUOTE,
            Self::Other(name) => name,
        }
    }

    /// Convert a price-carrying message into a validated tick.
    ///
    /// Returns `None` for events that carry no price.
    #[must_use]
    pub fn into_tick(self) -> Option<Result<Tick, TickError>> {
        match self {
            Self::PriceUpdate(m) => Some(m.quote.into_tick(m.symbol.as_deref())),
            Self::RealtimeQuote(m) => Some(m.quote.into_tick(m.ticker.as_deref())),
            Self::Other(_) => None,
        }
    }
}

// =============================================================================
// Outbound Messages
// =============================================================================

/// Symbol list payload for outbound events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolsPayload<'a> {
    /// Canonical symbols.
    pub symbols: &'a [Symbol],
}

/// Outbound envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage<'a> {
    /// Event name.
    pub event: &'static str,
    /// Payload.
    pub data: SymbolsPayload<'a>,
}

impl<'a> From<&'a FeedCommand> for OutboundMessage<'a> {
    fn from(command: &'a FeedCommand) -> Self {
        let event = match command {
            FeedCommand::Subscribe(_) => EVENT_SUBSCRIBE,
            FeedCommand::Unsubscribe(_) => EVENT_UNSUBSCRIBE,
            FeedCommand::RequestBackupData(_) => EVENT_REQUEST_BACKUP,
        };
        Self {
            event,
            data: SymbolsPayload {
                symbols: command.symbols(),
            },
        }
    }
}

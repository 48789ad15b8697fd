//! Feed Codec
//!
//! JSON encoding and decoding for the price feed WebSocket.
//!
//! Frames are either one envelope object or an array of envelopes. Each
//! envelope is dispatched on its `event` field; the two price shapes are
//! decoded into typed payloads and everything else is kept by name only.

use super::messages::{
    EVENT_PRICE_UPDATE, EVENT_REALTIME_QUOTE, FeedMessage, OutboundMessage, PriceUpdate,
    RealtimeQuote,
};
use crate::domain::subscription::FeedCommand;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the price feed.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame into feed messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON, is neither an object nor
    /// an array, or an envelope has no `event` name.
    pub fn decode(&self, text: &str) -> Result<Vec<FeedMessage>, CodecError> {
        let trimmed = text.trim();

        if trimmed.starts_with('[') {
            let raw_array: Vec<serde_json::Value> = serde_json::from_str(trimmed)?;
            raw_array
                .into_iter()
                .map(|value| self.decode_envelope(value))
                .collect()
        } else if trimmed.starts_with('{') {
            let value: serde_json::Value = serde_json::from_str(trimmed)?;
            Ok(vec![self.decode_envelope(value)?])
        } else {
            Err(CodecError::InvalidFormat(format!(
                "expected JSON array or object, got: {}...",
                trimmed.chars().take(50).collect::<String>()
            )))
        }
    }

    /// Decode one envelope.
    fn decode_envelope(&self, mut value: serde_json::Value) -> Result<FeedMessage, CodecError> {
        let event = value
            .get("event")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| CodecError::InvalidFormat("envelope has no event name".to_string()))?;

        let data = value
            .get_mut("data")
            .map(serde_json::Value::take)
            .unwrap_or_default();

        let message = match event.as_str() {
            EVENT_PRICE_UPDATE => FeedMessage::PriceUpdate(Self::payload::<PriceUpdate>(data)?),
            EVENT_REALTIME_QUOTE => {
                FeedMessage::RealtimeQuote(Self::payload::<RealtimeQuote>(data)?)
            }
            _ => FeedMessage::Other(event),
        };

        Ok(message)
    }

    /// A missing or null payload decodes to an empty one, so the tick
    /// conversion reports which field is absent.
    fn payload<T>(data: serde_json::Value) -> Result<T, CodecError>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        if data.is_null() {
            return Ok(T::default());
        }
        Ok(serde_json::from_value(data)?)
    }

    /// Encode an outbound command.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, command: &FeedCommand) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&OutboundMessage::from(command))?)
    }
}

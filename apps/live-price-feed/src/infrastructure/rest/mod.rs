//! REST Collaborators
//!
//! HTTP adapter for the history seed and backup snapshot endpoints.
//!
//! - `GET {base}/history/{symbol}` → `[{timestamp, price}]`
//! - `GET {base}/snapshot?symbols=A,B` →
//!   `[{symbol, price, timestamp, change_amount?, change_percent?}]`
//!
//! Numbers and timestamps use the same loose encoding as the stream.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use crate::application::ports::{HistoryProvider, ProviderError, SnapshotProvider};
use crate::domain::chart::ChartPoint;
use crate::domain::streaming::{SourceTag, Tick};
use crate::domain::symbol::Symbol;
use crate::infrastructure::feed::messages::{WireNumber, WireTimestamp};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// REST adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// Base URL could not be parsed or cannot carry a path.
    #[error("invalid REST base URL: {0}")]
    InvalidUrl(String),

    /// Transport or decode failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status code.
    #[error("unexpected status {status} from {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },
}

#[derive(Debug, Deserialize)]
struct HistoryPointDto {
    timestamp: Option<WireTimestamp>,
    price: Option<WireNumber>,
}

impl HistoryPointDto {
    /// Unusable values become invalid points, filtered at seeding.
    fn into_point(self) -> ChartPoint {
        let timestamp_ms = self
            .timestamp
            .and_then(|t| t.to_datetime())
            .map_or(0, |dt| dt.timestamp_millis());
        let price = self.price.map_or(f64::NAN, |p| p.value());
        ChartPoint::new(timestamp_ms, price)
    }
}

#[derive(Debug, Deserialize)]
struct SnapshotDto {
    symbol: Option<String>,
    price: Option<WireNumber>,
    timestamp: Option<WireTimestamp>,
    #[serde(default)]
    change_amount: Option<WireNumber>,
    #[serde(default)]
    change_percent: Option<WireNumber>,
}

impl SnapshotDto {
    fn into_tick(self) -> Option<Tick> {
        let symbol = self.symbol.as_deref().and_then(Symbol::canonical)?;
        let price = self.price?.value();
        let timestamp = self.timestamp?.to_datetime()?;

        Tick::new(
            symbol,
            price,
            self.change_amount.map_or(0.0, |v| v.value()),
            self.change_percent.map_or(0.0, |v| v.value()),
            timestamp,
            SourceTag::Poll,
        )
        .inspect_err(|e| tracing::debug!(error = %e, "Skipping invalid snapshot entry"))
        .ok()
    }
}

/// HTTP client for both REST collaborators.
#[derive(Debug, Clone)]
pub struct RestPriceClient {
    http: reqwest::Client,
    base: Url,
}

impl RestPriceClient {
    /// Create a client rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`RestError`] if the URL is invalid or the HTTP client
    /// cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RestError> {
        let base =
            Url::parse(base_url).map_err(|e| RestError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(RestError::InvalidUrl(base_url.to_string()));
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RestError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| RestError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        url: &Url,
    ) -> Result<T, RestError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RestError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.json().await?)
    }

    /// Fetch the historical series for one symbol.
    ///
    /// # Errors
    ///
    /// Returns [`RestError`] on transport, status or decode failure.
    pub async fn fetch_history(&self, symbol: &Symbol) -> Result<Vec<ChartPoint>, RestError> {
        let url = self.endpoint(&["history", symbol.as_str()])?;
        let points: Vec<HistoryPointDto> =
            self.get_json(self.http.get(url.clone()), &url).await?;
        Ok(points.into_iter().map(HistoryPointDto::into_point).collect())
    }

    /// Fetch the latest snapshot for each symbol.
    ///
    /// # Errors
    ///
    /// Returns [`RestError`] on transport, status or decode failure.
    pub async fn fetch_snapshots(&self, symbols: &[Symbol]) -> Result<Vec<Tick>, RestError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.endpoint(&["snapshot"])?;
        let joined = symbols
            .iter()
            .map(Symbol::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let request = self.http.get(url.clone()).query(&[("symbols", joined)]);

        let entries: Vec<SnapshotDto> = self.get_json(request, &url).await?;
        Ok(entries.into_iter().filter_map(SnapshotDto::into_tick).collect())
    }
}

#[async_trait]
impl HistoryProvider for RestPriceClient {
    async fn history(&self, symbol: &Symbol) -> Result<Vec<ChartPoint>, ProviderError> {
        self.fetch_history(symbol)
            .await
            .map_err(|e| ProviderError::new("history", e.to_string()))
    }
}

#[async_trait]
impl SnapshotProvider for RestPriceClient {
    async fn snapshots(&self, symbols: &[Symbol]) -> Result<Vec<Tick>, ProviderError> {
        self.fetch_snapshots(symbols)
            .await
            .map_err(|e| ProviderError::new("snapshot", e.to_string()))
    }
}

//! Feed Configuration Settings
//!
//! Configuration types for the price feed service, loaded from environment
//! variables.

use std::time::Duration;

use crate::application::services::{ChartParams, ChartSettings, DEFAULT_DEBOUNCE};
use crate::domain::chart::RetentionPolicy;
use crate::domain::streaming::AssetClass;
use crate::infrastructure::feed::reconnect::ReconnectConfig;
use crate::infrastructure::feed::supervisor::{
    DEFAULT_BACKUP_RETRY, DEFAULT_CONNECT_TIMEOUT, SupervisorConfig,
};
use crate::infrastructure::rest::DEFAULT_REQUEST_TIMEOUT;

/// Upstream feed connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
    /// WebSocket URL.
    pub ws_url: String,
    /// Reconnection behavior.
    pub reconnect: ReconnectConfig,
    /// Bound on opening the socket.
    pub connect_timeout: Duration,
    /// Retry interval in backup mode (zero disables periodic retries).
    pub backup_retry: Duration,
    /// Minimum spacing between accepted ticks per symbol.
    pub debounce: Duration,
}

impl FeedSettings {
    /// Supervisor configuration for these settings.
    #[must_use]
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            url: self.ws_url.clone(),
            reconnect: self.reconnect.clone(),
            connect_timeout: self.connect_timeout,
            backup_retry: self.backup_retry,
        }
    }
}

/// REST collaborator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestSettings {
    /// Base URL for `/history` and `/snapshot`.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

/// One chart the binary mounts at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartSpec {
    /// Raw symbol.
    pub symbol: String,
    /// Asset class.
    pub asset_class: AssetClass,
    /// Whether to consume the stream.
    pub stream_enabled: bool,
}

impl ChartSpec {
    /// Parse `SYMBOL[:class[:poll]]`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a blank symbol, an
    /// unknown asset class or an unknown mode.
    pub fn parse(entry: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: "PRICE_FEED_CHARTS".to_string(),
            value: entry.to_string(),
        };

        let mut parts = entry.split(':').map(str::trim);
        let symbol = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let asset_class = match parts.next() {
            None | Some("") => AssetClass::default(),
            Some(class) => AssetClass::parse(class).ok_or_else(invalid)?,
        };
        let stream_enabled = match parts.next() {
            None | Some("" | "stream") => true,
            Some("poll") => false,
            Some(_) => return Err(invalid()),
        };
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            symbol: symbol.to_string(),
            asset_class,
            stream_enabled,
        })
    }

    /// Mount parameters with context defaults.
    #[must_use]
    pub fn to_params(&self) -> ChartParams {
        let params = ChartParams::new(self.symbol.clone(), self.asset_class);
        if self.stream_enabled {
            params
        } else {
            params.poll_only()
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    /// Upstream feed settings.
    pub feed: FeedSettings,
    /// REST collaborator settings.
    pub rest: RestSettings,
    /// Chart defaults.
    pub charts: ChartSettings,
    /// Extra tickers treated as equities during normalization.
    pub equity_tickers: Vec<String>,
    /// Charts mounted by the binary.
    pub mounted_charts: Vec<ChartSpec>,
    /// Server port settings.
    pub server: ServerSettings,
}

impl FeedConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// the chart list is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`FeedConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        let ws_url = env.required("PRICE_FEED_WS_URL")?;
        let rest_url = env.required("PRICE_FEED_REST_URL")?;

        let reconnect_defaults = ReconnectConfig::default();
        let reconnect = ReconnectConfig {
            initial_delay: env.duration_millis(
                "PRICE_FEED_RECONNECT_DELAY_MS",
                reconnect_defaults.initial_delay,
            ),
            max_delay: env.duration_millis(
                "PRICE_FEED_RECONNECT_DELAY_MAX_MS",
                reconnect_defaults.max_delay,
            ),
            multiplier: env.f64(
                "PRICE_FEED_RECONNECT_MULTIPLIER",
                reconnect_defaults.multiplier,
            ),
            jitter_factor: env.f64("PRICE_FEED_RECONNECT_JITTER", reconnect_defaults.jitter_factor),
            max_attempts: env.u32(
                "PRICE_FEED_RECONNECT_MAX_ATTEMPTS",
                reconnect_defaults.max_attempts,
            ),
        };

        let feed = FeedSettings {
            ws_url,
            reconnect,
            connect_timeout: env
                .duration_secs("PRICE_FEED_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT),
            backup_retry: env.duration_secs("PRICE_FEED_BACKUP_RETRY_SECS", DEFAULT_BACKUP_RETRY),
            debounce: env.duration_millis("PRICE_FEED_DEBOUNCE_MS", DEFAULT_DEBOUNCE),
        };

        let rest = RestSettings {
            base_url: rest_url,
            timeout: env.duration_secs("PRICE_FEED_REST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT),
        };

        let chart_defaults = ChartSettings::default();
        let retention_defaults = RetentionPolicy::default();
        let charts = ChartSettings {
            retention: RetentionPolicy {
                bucket_width: env.duration_millis(
                    "PRICE_FEED_BUCKET_WIDTH_MS",
                    retention_defaults.bucket_width,
                ),
                max_points: env.usize("PRICE_FEED_MAX_POINTS", retention_defaults.max_points),
                window: env.duration_secs("PRICE_FEED_RETENTION_SECS", retention_defaults.window),
                trend_interval: env.duration_millis(
                    "PRICE_FEED_TREND_INTERVAL_MS",
                    retention_defaults.trend_interval,
                ),
            },
            poll_interval: env
                .duration_millis("PRICE_FEED_POLL_INTERVAL_MS", chart_defaults.poll_interval),
        };

        let equity_tickers = env
            .get("PRICE_FEED_EQUITY_TICKERS")
            .map(|v| split_list(&v).map(str::to_string).collect())
            .unwrap_or_default();

        let mounted_charts = env
            .get("PRICE_FEED_CHARTS")
            .map(|v| split_list(&v).map(ChartSpec::parse).collect::<Result<Vec<_>, _>>())
            .transpose()?
            .unwrap_or_default();

        let server = ServerSettings {
            health_port: env.u16("PRICE_FEED_HEALTH_PORT", ServerSettings::default().health_port),
        };

        Ok(Self {
            feed,
            rest,
            charts,
            equity_tickers,
            mounted_charts,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be interpreted.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let value = self
            .get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        if value.trim().is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value.trim().to_string())
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    fn u16(&self, key: &str, default: u16) -> u16 {
        self.parsed(key).unwrap_or(default)
    }

    fn u32(&self, key: &str, default: u32) -> u32 {
        self.parsed(key).unwrap_or(default)
    }

    fn usize(&self, key: &str, default: usize) -> usize {
        self.parsed(key).unwrap_or(default)
    }

    fn f64(&self, key: &str, default: f64) -> f64 {
        self.parsed::<f64>(key)
            .filter(|v| v.is_finite())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.parsed::<u64>(key).map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.parsed::<u64>(key).map_or(default, Duration::from_millis)
    }
}

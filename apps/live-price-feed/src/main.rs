//! Live Price Feed Binary
//!
//! Connects to the upstream price feed and keeps rolling charts for the
//! configured symbols.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin live-price-feed
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `PRICE_FEED_WS_URL`: Upstream WebSocket URL
//! - `PRICE_FEED_REST_URL`: Base URL for `/history` and `/snapshot`
//!
//! ## Optional
//! - `PRICE_FEED_CHARTS`: Charts to mount, e.g. `BTC:crypto,AAPL:equity:poll`
//! - `PRICE_FEED_EQUITY_TICKERS`: Extra tickers normalized as equities
//! - `PRICE_FEED_DEBOUNCE_MS`: Per-symbol tick debounce (default: 100)
//! - `PRICE_FEED_RECONNECT_DELAY_MS`: Reconnect delay (default: 3000)
//! - `PRICE_FEED_RECONNECT_MAX_ATTEMPTS`: Attempts before backup mode (default: 5)
//! - `PRICE_FEED_BACKUP_RETRY_SECS`: Retry interval in backup mode (default: 60)
//! - `PRICE_FEED_POLL_INTERVAL_MS`: Backup poll interval (default: 30000)
//! - `PRICE_FEED_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: true)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use live_price_feed::infrastructure::telemetry;
use live_price_feed::{ChartBufferController, FeedConfig, FeedRuntime, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting live price feed");

    let _metrics_handle = init_metrics().context("installing Prometheus recorder")?;

    let config = FeedConfig::from_env().context("loading configuration")?;
    log_config(&config);

    let runtime = FeedRuntime::from_config(&config)?;
    runtime.spawn_health_server(config.server.health_port);
    runtime.start();

    let shutdown_token = CancellationToken::new();
    let mut charts = Vec::with_capacity(config.mounted_charts.len());
    for spec in &config.mounted_charts {
        match runtime.context().mount(spec.to_params()) {
            Ok(chart) => {
                let chart = Arc::new(chart);
                tokio::spawn(log_chart_updates(
                    Arc::clone(&chart),
                    shutdown_token.clone(),
                ));
                charts.push(chart);
            }
            Err(e) => tracing::error!(symbol = %spec.symbol, error = %e, "Failed to mount chart"),
        }
    }

    tracing::info!(charts = charts.len(), "Live price feed ready");

    await_shutdown(shutdown_token).await;

    for chart in &charts {
        chart.dispose();
    }
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, runtime.shutdown())
        .await
        .is_err()
    {
        tracing::warn!("Shutdown timed out");
    }

    tracing::info!("Live price feed stopped");
    Ok(())
}

/// Log a line per chart revision.
async fn log_chart_updates(chart: Arc<ChartBufferController>, shutdown: CancellationToken) {
    let mut updates = chart.updates();
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = chart.snapshot();
                tracing::debug!(
                    symbol = %snapshot.symbol,
                    points = snapshot.points.len(),
                    last_price = ?snapshot.last_price,
                    direction = ?snapshot.direction,
                    "Chart updated"
                );
            }
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &FeedConfig) {
    tracing::info!(
        health_port = config.server.health_port,
        charts = config.mounted_charts.len(),
        debounce_ms = config.feed.debounce.as_millis(),
        max_attempts = config.feed.reconnect.max_attempts,
        "Configuration loaded"
    );
    tracing::debug!(
        ws_url = %config.feed.ws_url,
        rest_url = %config.rest.base_url,
        "Feed endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}

//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, feed status reporting, and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (ready while the stream is live)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::FeedContext;
use crate::domain::streaming::ConnectionState;
use crate::domain::subscription::SubscriptionStats;
use crate::infrastructure::feed::link::{FeedLink, FeedStatus};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Feed connection status.
    pub feed: FeedStatus,
    /// Subscription statistics.
    pub subscriptions: SubscriptionStats,
    /// Symbols with a stored tick.
    pub priced_symbols: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Stream is live.
    Healthy,
    /// Stream is recovering or charts are running on polls.
    Degraded,
    /// No connection and none in progress.
    Unhealthy,
}

impl HealthStatus {
    /// Classify a connection state.
    #[must_use]
    pub const fn from_state(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => Self::Healthy,
            ConnectionState::Connecting
            | ConnectionState::Reconnecting
            | ConnectionState::BackupMode => Self::Degraded,
            ConnectionState::Disconnected => Self::Unhealthy,
        }
    }
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    link: Arc<FeedLink>,
    context: Arc<FeedContext>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, link: Arc<FeedLink>, context: Arc<FeedContext>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            link,
            context,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.link.status().connected {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let feed = state.link.status();

    HealthResponse {
        status: HealthStatus::from_state(feed.state),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed,
        subscriptions: state.context.registry().stats(),
        priced_symbols: state.context.price_table().len(),
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test_case(ConnectionState::Connected, HealthStatus::Healthy ; "connected")]
    #[test_case(ConnectionState::Connecting, HealthStatus::Degraded ; "connecting")]
    #[test_case(ConnectionState::Reconnecting, HealthStatus::Degraded ; "reconnecting")]
    #[test_case(ConnectionState::BackupMode, HealthStatus::Degraded ; "backup mode")]
    #[test_case(ConnectionState::Disconnected, HealthStatus::Unhealthy ; "disconnected")]
    fn status_from_state(state: ConnectionState, expected: HealthStatus) {
        assert_eq!(HealthStatus::from_state(state), expected);
    }

    #[test]
    fn feed_status_serializes_snake_case_state() {
        let (link, _rx) = FeedLink::new();
        link.set_state(ConnectionState::BackupMode);

        let json = serde_json::to_value(link.status()).unwrap();

        assert_eq!(json["state"], "backup_mode");
        assert_eq!(json["connected"], false);
    }
}

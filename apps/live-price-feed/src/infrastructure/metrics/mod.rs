//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Messages**: Inbound feed messages by event type
//! - **Ticks**: Accepted ticks and drops by reason
//! - **Connection**: Feed connection state and reconnect attempts
//! - **Subscriptions**: Distinct subscribed symbols and mounted charts
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first.
///
/// # Errors
///
/// Returns [`BuildError`] if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "price_feed_messages_received_total",
        "Total messages received from the price stream by event"
    );
    describe_counter!(
        "price_feed_ticks_accepted_total",
        "Total ticks stored and fanned out to charts"
    );
    describe_counter!(
        "price_feed_ticks_dropped_total",
        "Total ticks dropped before fan-out by reason"
    );

    describe_gauge!(
        "price_feed_connection_state",
        "Feed connection state (0=disconnected, 1=connecting, 2=connected, 3=reconnecting, 4=backup_mode)"
    );
    describe_counter!(
        "price_feed_reconnects_total",
        "Total feed reconnection attempts"
    );

    describe_gauge!(
        "price_feed_subscribed_symbols",
        "Distinct symbols with a non-zero subscription count"
    );
    describe_gauge!("price_feed_charts_mounted", "Currently mounted charts");
    describe_counter!(
        "price_feed_poll_errors_total",
        "Total failed backup snapshot polls"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why a tick never reached a chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Message or tick failed validation.
    Malformed,
    /// Arrived inside the debounce window.
    Debounced,
    /// Same quote as the stored tick.
    Duplicate,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::Debounced => "debounced",
            Self::Duplicate => "duplicate",
        }
    }
}

/// Record a message received from the stream.
pub fn record_message_received(event: &str) {
    counter!(
        "price_feed_messages_received_total",
        "event" => event.to_string()
    )
    .increment(1);
}

/// Record a tick that passed ingress.
pub fn record_tick_accepted() {
    counter!("price_feed_ticks_accepted_total").increment(1);
}

/// Record a dropped tick.
pub fn record_tick_dropped(reason: DropReason) {
    counter!(
        "price_feed_ticks_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("price_feed_connection_state").set(f64::from(state.code()));
}

/// Record a reconnection attempt.
pub fn record_reconnect_attempt() {
    counter!("price_feed_reconnects_total").increment(1);
}

/// Update the distinct subscribed symbol count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribed_symbols(count: usize) {
    gauge!("price_feed_subscribed_symbols").set(count as f64);
}

/// Record a chart mount.
pub fn increment_charts_mounted() {
    gauge!("price_feed_charts_mounted").increment(1.0);
}

/// Record a chart disposal.
pub fn decrement_charts_mounted() {
    gauge!("price_feed_charts_mounted").decrement(1.0);
}

/// Record a failed snapshot poll.
pub fn record_poll_error() {
    counter!("price_feed_poll_errors_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================

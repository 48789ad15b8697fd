//! Feed Runtime
//!
//! Composition root: builds the feed link, shared context and connection
//! supervisor, pumps supervisor events into ingress, and optionally serves
//! the health endpoint.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{HistoryProvider, SnapshotProvider};
use crate::application::services::{ChartSettings, FeedContext, TickIngress};
use crate::domain::symbol::SymbolNormalizer;
use crate::infrastructure::config::{FeedConfig, FeedSettings};
use crate::infrastructure::feed::{ConnectionSupervisor, FeedEvent, FeedLink, FeedStatus};
use crate::infrastructure::health::{HealthServer, HealthServerState};
use crate::infrastructure::rest::{RestError, RestPriceClient};

/// Runtime construction errors.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// REST client could not be built.
    #[error("REST client: {0}")]
    Rest(#[from] RestError),
}

/// Running feed service.
pub struct FeedRuntime {
    context: Arc<FeedContext>,
    supervisor: Arc<ConnectionSupervisor>,
    events: Mutex<Option<mpsc::UnboundedReceiver<FeedEvent>>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl FeedRuntime {
    /// Build a runtime backed by the REST collaborators in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the REST client cannot be built.
    pub fn from_config(config: &FeedConfig) -> Result<Self, RuntimeError> {
        let rest = Arc::new(RestPriceClient::new(&config.rest.base_url, config.rest.timeout)?);
        let normalizer = SymbolNormalizer::new().with_equity_tickers(&config.equity_tickers);

        Ok(Self::new(&config.feed, config.charts, normalizer, rest.clone(), rest))
    }

    /// Build a runtime around arbitrary REST ports.
    #[must_use]
    pub fn new(
        feed: &FeedSettings,
        charts: ChartSettings,
        normalizer: SymbolNormalizer,
        history: Arc<dyn HistoryProvider>,
        snapshots: Arc<dyn SnapshotProvider>,
    ) -> Self {
        let (link, commands) = FeedLink::new();
        let context = Arc::new(FeedContext::new(
            link.clone(),
            normalizer,
            history,
            snapshots,
            feed.debounce,
            charts,
        ));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let supervisor = Arc::new(ConnectionSupervisor::new(
            feed.supervisor_config(),
            link,
            commands,
            context.registry().clone(),
            events_tx,
        ));

        Self {
            context,
            supervisor,
            events: Mutex::new(Some(events_rx)),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Shared feed state for mounting charts.
    #[must_use]
    pub const fn context(&self) -> &Arc<FeedContext> {
        &self.context
    }

    /// Connection supervisor.
    #[must_use]
    pub const fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    /// Current feed status.
    #[must_use]
    pub fn status(&self) -> FeedStatus {
        self.supervisor.status()
    }

    /// Start the event pump and open the feed connection.
    ///
    /// Safe to call again; later calls only reconnect.
    pub fn start(&self) {
        if let Some(rx) = self.events.lock().take() {
            let ingress = self.context.ingress().clone();
            let cancel = self.cancel.clone();
            self.tasks.lock().push(tokio::spawn(async move {
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = handle_feed_events(rx, ingress) => {}
                }
            }));
        }
        self.supervisor.connect();
    }

    /// Serve the health endpoint on `port` until shutdown.
    pub fn spawn_health_server(&self, port: u16) {
        let state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            self.supervisor.link().clone(),
            self.context.clone(),
        ));
        let server = HealthServer::new(port, state, self.cancel.clone());

        self.tasks.lock().push(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        }));
    }

    /// Disconnect the feed and stop background tasks.
    pub async fn shutdown(&self) {
        self.supervisor.disconnect().await;
        self.cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Runtime task ended abnormally");
            }
        }
    }
}

/// Route supervisor events: messages into ingress, the rest into logs.
async fn handle_feed_events(
    mut rx: mpsc::UnboundedReceiver<FeedEvent>,
    ingress: Arc<TickIngress>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            FeedEvent::Message(raw) => {
                let accepted = ingress.on_message(&raw);
                tracing::trace!(accepted, "Feed message processed");
            }
            FeedEvent::Connected => {
                tracing::info!("Price feed connected");
            }
            FeedEvent::Disconnected => {
                tracing::warn!("Price feed disconnected");
            }
            FeedEvent::Reconnecting { attempt } => {
                tracing::info!(attempt, "Price feed reconnecting");
            }
            FeedEvent::BackupMode { error } => {
                tracing::error!(error = %error, "Price feed in backup mode, charts fall back to polling");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::application::ports::{MockHistoryProvider, MockSnapshotProvider};
    use crate::domain::streaming::ConnectionState;
    use crate::infrastructure::feed::ReconnectConfig;

    fn settings() -> FeedSettings {
        FeedSettings {
            ws_url: "ws://127.0.0.1:1".to_string(),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(5),
                multiplier: 1.0,
                jitter_factor: 0.0,
                max_attempts: 1,
            },
            connect_timeout: Duration::from_millis(200),
            backup_retry: Duration::ZERO,
            debounce: Duration::ZERO,
        }
    }

    fn runtime() -> FeedRuntime {
        FeedRuntime::new(
            &settings(),
            ChartSettings::default(),
            SymbolNormalizer::new(),
            Arc::new(MockHistoryProvider::new()),
            Arc::new(MockSnapshotProvider::new()),
        )
    }

    #[tokio::test]
    async fn unreachable_feed_ends_in_backup_mode() {
        let runtime = runtime();
        runtime.start();

        tokio::time::timeout(Duration::from_secs(5), async {
            while runtime.status().state != ConnectionState::BackupMode {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        runtime.shutdown().await;
        assert_eq!(runtime.status().state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn event_pump_feeds_ingress() {
        let runtime = FeedRuntime::new(
            &settings(),
            ChartSettings::default(),
            SymbolNormalizer::new(),
            Arc::new(MockHistoryProvider::new()),
            Arc::new(MockSnapshotProvider::new()),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let ingress = runtime.context().ingress().clone();
        let pump = tokio::spawn(handle_feed_events(rx, ingress));

        tx.send(FeedEvent::Connected).unwrap();
        tx.send(FeedEvent::Message(
            r#"{"event":"price_update","data":{"symbol":"BTCUSDT","price":"64000.5","timestamp_utc":1700000000000}}"#
                .to_string(),
        ))
        .unwrap();
        drop(tx);
        pump.await.unwrap();

        let table = runtime.context().price_table();
        assert_eq!(table.len(), 1);
    }
}

//! Connection Supervisor
//!
//! Owns the single upstream WebSocket. Runs the connection state machine,
//! forwards inbound text frames to the event pump and writes outbound
//! commands queued on the [`FeedLink`].
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──connect──► Connecting ──ok──► Connected
//!                               ▲                 │ error/close
//!                               │                 ▼
//!             retry (manual or  │            Reconnecting ──ok──► Connected
//!             periodic)         │                 │ budget spent
//!                               └──── BackupMode ◄┘
//! ```
//!
//! On every successful connection the subscription registry's full
//! symbol set is replayed as one subscribe message. Commands still queued
//! from the previous connection are discarded first; the replay covers
//! them.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, JsonCodec};
use super::link::{FeedLink, FeedStatus};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::services::SubscriptionRegistry;
use crate::domain::streaming::ConnectionState;
use crate::domain::subscription::FeedCommand;
use crate::infrastructure::metrics;

/// Default bound on opening the socket.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between retries while in backup mode.
pub const DEFAULT_BACKUP_RETRY: Duration = Duration::from_secs(60);

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one connection attempt.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// Opening the socket took too long.
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Outbound command could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Connection closed by the server.
    #[error("connection closed")]
    ConnectionClosed,
}

// =============================================================================
// Events
// =============================================================================

/// Events emitted by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Connected and subscriptions replayed.
    Connected,
    /// Lost or closed the connection.
    Disconnected,
    /// Waiting before a reconnect attempt.
    Reconnecting {
        /// Attempt number since the last successful connection.
        attempt: u32,
    },
    /// Reconnect budget spent.
    BackupMode {
        /// Human-readable reason.
        error: String,
    },
    /// Raw inbound text frame.
    Message(String),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// WebSocket URL.
    pub url: String,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Bound on opening the socket.
    pub connect_timeout: Duration,
    /// Retry interval in backup mode; zero disables periodic retries.
    pub backup_retry: Duration,
}

impl SupervisorConfig {
    /// Configuration with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            backup_retry: DEFAULT_BACKUP_RETRY,
        }
    }
}

// =============================================================================
// Supervisor
// =============================================================================

struct RunningTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Supervisor for the single feed connection.
pub struct ConnectionSupervisor {
    config: SupervisorConfig,
    link: Arc<FeedLink>,
    registry: Arc<SubscriptionRegistry>,
    codec: JsonCodec,
    events: mpsc::UnboundedSender<FeedEvent>,
    commands: tokio::sync::Mutex<mpsc::UnboundedReceiver<FeedCommand>>,
    task: Mutex<Option<RunningTask>>,
    retry_now: Notify,
}

impl ConnectionSupervisor {
    /// Create a supervisor.
    ///
    /// `commands` is the receiver returned by [`FeedLink::new`]; events are
    /// delivered on `events`.
    #[must_use]
    pub fn new(
        config: SupervisorConfig,
        link: Arc<FeedLink>,
        commands: mpsc::UnboundedReceiver<FeedCommand>,
        registry: Arc<SubscriptionRegistry>,
        events: mpsc::UnboundedSender<FeedEvent>,
    ) -> Self {
        Self {
            config,
            link,
            registry,
            codec: JsonCodec::new(),
            events,
            commands: tokio::sync::Mutex::new(commands),
            task: Mutex::new(None),
            retry_now: Notify::new(),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> FeedStatus {
        self.link.status()
    }

    /// Shared link handle.
    #[must_use]
    pub const fn link(&self) -> &Arc<FeedLink> {
        &self.link
    }

    /// Start the connection loop.
    ///
    /// No-op while a loop is already running, except in backup mode where
    /// it triggers an immediate retry.
    pub fn connect(self: &Arc<Self>) {
        let mut task = self.task.lock();

        if let Some(running) = task.as_ref()
            && !running.handle.is_finished()
        {
            if self.link.status().state == ConnectionState::BackupMode {
                tracing::info!("Manual reconnect requested from backup mode");
                self.retry_now.notify_one();
            }
            return;
        }

        self.link.set_state(ConnectionState::Connecting);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.clone().run(cancel.clone()));
        *task = Some(RunningTask { cancel, handle });
    }

    /// Close the connection and stop retrying.
    ///
    /// Subscriptions are kept and replayed on the next `connect`.
    pub async fn disconnect(&self) {
        let running = self.task.lock().take();

        if let Some(running) = running {
            running.cancel.cancel();
            if let Err(e) = running.handle.await {
                tracing::warn!(error = %e, "Feed connection task ended abnormally");
            }
        }

        let was_connected = self.link.status().connected;
        self.link.set_state(ConnectionState::Disconnected);
        if was_connected {
            self.emit(FeedEvent::Disconnected);
        }
        tracing::info!("Feed disconnected");
    }

    fn emit(&self, event: FeedEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("Feed event receiver dropped");
        }
    }

    /// Connection loop.
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut commands = self.commands.lock().await;
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let Err(e) = self.connect_and_run(&cancel, &mut commands, &mut policy).await else {
                break;
            };
            if cancel.is_cancelled() {
                break;
            }

            tracing::warn!(error = %e, "Feed connection error");
            self.link.set_error(e.to_string());
            if self.link.status().connected {
                self.link.set_state(ConnectionState::Reconnecting);
                self.emit(FeedEvent::Disconnected);
            }

            if let Some(delay) = policy.next_delay() {
                let attempt = policy.attempt_count();
                self.link.set_reconnect_attempts(attempt);
                self.link.set_state(ConnectionState::Reconnecting);
                metrics::record_reconnect_attempt();
                tracing::info!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    "Reconnecting to price feed"
                );
                self.emit(FeedEvent::Reconnecting { attempt });

                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            } else {
                let error = format!(
                    "price feed unavailable after {} attempts: {e}",
                    policy.attempt_count()
                );
                tracing::error!(error = %error, "Entering backup mode");
                self.link.set_error(error.clone());
                self.link.set_state(ConnectionState::BackupMode);
                self.emit(FeedEvent::BackupMode { error });

                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = self.retry_now.notified() => {}
                    () = backup_retry_delay(self.config.backup_retry) => {}
                }

                tracing::info!("Retrying price feed from backup mode");
                policy.reset();
                self.link.set_reconnect_attempts(0);
                self.link.set_state(ConnectionState::Connecting);
            }
        }

        tracing::debug!("Feed connection loop stopped");
    }

    /// Connect and pump frames until error or cancellation.
    async fn connect_and_run(
        &self,
        cancel: &CancellationToken,
        commands: &mut mpsc::UnboundedReceiver<FeedCommand>,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), SupervisorError> {
        tracing::info!(url = %self.config.url, "Connecting to price feed");

        let timeout = self.config.connect_timeout;
        let connect = tokio::time::timeout(
            timeout,
            tokio_tungstenite::connect_async(self.config.url.as_str()),
        );
        let (ws_stream, _response) = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            result = connect => result.map_err(|_| SupervisorError::Timeout(timeout))??,
        };

        let (mut write, mut read) = ws_stream.split();

        policy.reset();
        self.link.set_reconnect_attempts(0);
        self.link.clear_error();
        self.link.set_state(ConnectionState::Connected);

        let mut discarded = 0usize;
        while commands.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(discarded, "Dropped commands queued before reconnect");
        }

        if let Some(replay) = self.registry.replay() {
            let json = self.codec.encode(&replay)?;
            write.send(Message::Text(json.into())).await?;
        }

        tracing::info!("Price feed connected");
        self.emit(FeedEvent::Connected);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        tracing::debug!(error = %e, "Close frame not sent");
                    }
                    return Ok(());
                }
                Some(command) = commands.recv() => {
                    tracing::debug!(kind = command.kind(), symbols = ?command.symbols(), "Sending feed command");
                    let json = self.codec.encode(&command)?;
                    write.send(Message::Text(json.into())).await?;
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.emit(FeedEvent::Message(text.as_str().to_owned()));
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Server sent close frame");
                            return Err(SupervisorError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("WebSocket stream ended");
                            return Err(SupervisorError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }
}

async fn backup_retry_delay(interval: Duration) {
    if interval.is_zero() {
        std::future::pending::<()>().await;
    } else {
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::FeedChannel;
    use crate::domain::symbol::SymbolNormalizer;

    fn unreachable_config(attempts: u32) -> SupervisorConfig {
        SupervisorConfig {
            url: "ws://127.0.0.1:1/feed".to_string(),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(10),
                multiplier: 1.0,
                jitter_factor: 0.0,
                max_attempts: attempts,
            },
            connect_timeout: Duration::from_secs(2),
            backup_retry: Duration::ZERO,
        }
    }

    fn supervisor(
        config: SupervisorConfig,
    ) -> (Arc<ConnectionSupervisor>, mpsc::UnboundedReceiver<FeedEvent>) {
        let (link, commands) = FeedLink::new();
        let registry = Arc::new(SubscriptionRegistry::new(
            SymbolNormalizer::new(),
            link.clone() as Arc<dyn FeedChannel>,
        ));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let supervisor = Arc::new(ConnectionSupervisor::new(
            config, link, commands, registry, events_tx,
        ));
        (supervisor, events_rx)
    }

    #[test]
    fn default_config_timings() {
        let config = SupervisorConfig::new("ws://localhost/feed");

        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.backup_retry, Duration::from_secs(60));
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn exhausted_budget_enters_backup_mode() {
        let (supervisor, mut events) = supervisor(unreachable_config(2));

        supervisor.connect();

        let mut reconnects = Vec::new();
        let error = loop {
            match tokio::time::timeout(Duration::from_secs(10), events.recv())
                .await
                .unwrap()
                .unwrap()
            {
                FeedEvent::Reconnecting { attempt } => reconnects.push(attempt),
                FeedEvent::BackupMode { error } => break error,
                other => panic!("unexpected event {other:?}"),
            }
        };

        assert_eq!(reconnects, vec![1, 2]);
        assert!(error.contains("2 attempts"));
        let status = supervisor.status();
        assert_eq!(status.state, ConnectionState::BackupMode);
        assert!(!status.connected);
        assert!(status.error.is_some());

        supervisor.disconnect().await;
        assert_eq!(supervisor.status().state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let (supervisor, _events) = supervisor(unreachable_config(0));

        supervisor.connect();
        supervisor.connect();

        assert_ne!(supervisor.status().state, ConnectionState::Disconnected);
        supervisor.disconnect().await;
        assert_eq!(supervisor.status().state, ConnectionState::Disconnected);
    }
}

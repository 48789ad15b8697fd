//! Feed Link
//!
//! Shared handle between the connection supervisor and everything that
//! talks to the feed. Holds the observable connection state and the
//! outbound command queue drained by the socket writer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::application::ports::{FeedChannel, FeedSendError};
use crate::domain::streaming::ConnectionState;
use crate::domain::subscription::FeedCommand;
use crate::infrastructure::metrics;

/// Point-in-time connection status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Whether the stream is live.
    pub connected: bool,
    /// Last connection error, cleared on success.
    pub error: Option<String>,
    /// Reconnect attempts since the last successful connection.
    pub reconnect_attempts: u32,
}

/// Connection state plus outbound queue.
pub struct FeedLink {
    state: watch::Sender<ConnectionState>,
    error: RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    commands: mpsc::UnboundedSender<FeedCommand>,
}

impl FeedLink {
    /// Create a link in the Disconnected state.
    ///
    /// The receiver belongs to the connection supervisor.
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FeedCommand>) {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (commands, rx) = mpsc::unbounded_channel();
        let link = Arc::new(Self {
            state,
            error: RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            commands,
        });
        (link, rx)
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> FeedStatus {
        let state = *self.state.borrow();
        FeedStatus {
            state,
            connected: state.is_connected(),
            error: self.error.read().clone(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }

    /// Last connection error.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.error.read().clone()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = previous.as_str(), to = state.as_str(), "Feed state changed");
            metrics::set_connection_state(state);
        }
    }

    pub(crate) fn set_error(&self, error: impl Into<String>) {
        *self.error.write() = Some(error.into());
    }

    pub(crate) fn clear_error(&self) {
        *self.error.write() = None;
    }

    pub(crate) fn set_reconnect_attempts(&self, attempts: u32) {
        self.reconnect_attempts.store(attempts, Ordering::Relaxed);
    }
}

impl FeedChannel for FeedLink {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn send(&self, command: FeedCommand) -> Result<(), FeedSendError> {
        if !self.state().is_connected() {
            return Err(FeedSendError::NotConnected);
        }
        self.commands
            .send(command)
            .map_err(|_| FeedSendError::Closed)
    }
}

//! Test doubles shared by service unit tests.

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::application::ports::{FeedChannel, FeedSendError};
use crate::domain::streaming::ConnectionState;
use crate::domain::subscription::FeedCommand;

/// Feed channel that records every command it is handed.
pub struct RecordingChannel {
    state: watch::Sender<ConnectionState>,
    sent: Mutex<Vec<FeedCommand>>,
    fail: Mutex<bool>,
}

impl RecordingChannel {
    pub fn new(state: ConnectionState) -> Self {
        let (tx, _rx) = watch::channel(state);
        Self {
            state: tx,
            sent: Mutex::new(Vec::new()),
            fail: Mutex::new(false),
        }
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    pub fn fail_sends(&self) {
        *self.fail.lock() = true;
    }

    pub fn sent(&self) -> Vec<FeedCommand> {
        self.sent.lock().clone()
    }
}

impl FeedChannel for RecordingChannel {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn send(&self, command: FeedCommand) -> Result<(), FeedSendError> {
        if *self.fail.lock() {
            return Err(FeedSendError::Closed);
        }
        self.sent.lock().push(command);
        Ok(())
    }
}

//! Subscription Registry
//!
//! Reference-counted multiplexer between chart consumers and the single
//! upstream feed connection.
//!
//! Count changes and the resulting wire command are applied under one
//! lock, so commands leave in the same order the counts changed. While the
//! feed is down, 0↔1 transitions are parked in a pending queue; the next
//! Connected transition replaces that queue with one subscribe for every
//! symbol that still has a positive count.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::application::ports::{FeedChannel, FeedSendError};
use crate::domain::subscription::{
    FeedCommand, SubscriptionBook, SubscriptionChanges, SubscriptionStats,
};
use crate::domain::symbol::{Symbol, SymbolNormalizer};
use crate::infrastructure::metrics;

#[derive(Debug, Default)]
struct RegistryState {
    book: SubscriptionBook,
    pending_subscribe: BTreeSet<Symbol>,
    pending_unsubscribe: BTreeSet<Symbol>,
}

impl RegistryState {
    fn park(&mut self, changes: &SubscriptionChanges) {
        for symbol in &changes.subscribe {
            self.pending_unsubscribe.remove(symbol);
            self.pending_subscribe.insert(symbol.clone());
        }
        for symbol in &changes.unsubscribe {
            self.pending_subscribe.remove(symbol);
            self.pending_unsubscribe.insert(symbol.clone());
        }
    }
}

/// Symbol → refcount map that drives upstream subscribe/unsubscribe.
///
/// # Example
///
/// ```rust,ignore
/// registry.subscribe_symbols(&["BTC"]);   // 0→1: subscribe_prices [BTCUSDT]
/// registry.subscribe_symbols(&["BTC"]);   // 1→2: nothing sent
/// registry.unsubscribe_symbols(&["BTC"]); // 2→1: nothing sent
/// registry.unsubscribe_symbols(&["BTC"]); // 1→0: unsubscribe_prices [BTCUSDT]
/// ```
pub struct SubscriptionRegistry {
    normalizer: SymbolNormalizer,
    channel: Arc<dyn FeedChannel>,
    state: Mutex<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create a registry sending through `channel`.
    #[must_use]
    pub fn new(normalizer: SymbolNormalizer, channel: Arc<dyn FeedChannel>) -> Self {
        Self {
            normalizer,
            channel,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// The normalizer applied to raw identifiers.
    #[must_use]
    pub const fn normalizer(&self) -> &SymbolNormalizer {
        &self.normalizer
    }

    /// Normalize raw identifiers and subscribe to them.
    ///
    /// Returns the canonical symbols, in input order. Blank identifiers are
    /// skipped.
    pub fn subscribe_symbols<S: AsRef<str>>(&self, raw: &[S]) -> Vec<Symbol> {
        let symbols = self.normalize_all(raw);
        self.subscribe(&symbols);
        symbols
    }

    /// Normalize raw identifiers and unsubscribe from them.
    pub fn unsubscribe_symbols<S: AsRef<str>>(&self, raw: &[S]) -> Vec<Symbol> {
        let symbols = self.normalize_all(raw);
        self.unsubscribe(&symbols);
        symbols
    }

    /// Subscribe to already canonical symbols.
    pub fn subscribe(&self, symbols: &[Symbol]) {
        if symbols.is_empty() {
            return;
        }

        let mut state = self.state.lock();
        let changes = state.book.add(symbols);
        if changes.subscribe.is_empty() {
            return;
        }

        let command = FeedCommand::Subscribe(changes.subscribe.iter().cloned().collect());
        self.flush_or_park(&mut state, command, &changes);
        metrics::set_subscribed_symbols(state.book.symbol_count());
    }

    /// Unsubscribe from already canonical symbols.
    pub fn unsubscribe(&self, symbols: &[Symbol]) {
        if symbols.is_empty() {
            return;
        }

        let mut state = self.state.lock();
        let changes = state.book.remove(symbols);
        if changes.unsubscribe.is_empty() {
            return;
        }

        let command = FeedCommand::Unsubscribe(changes.unsubscribe.iter().cloned().collect());
        self.flush_or_park(&mut state, command, &changes);
        metrics::set_subscribed_symbols(state.book.symbol_count());
    }

    /// Send now if connected, otherwise park until the next connection.
    fn flush_or_park(
        &self,
        state: &mut RegistryState,
        command: FeedCommand,
        changes: &SubscriptionChanges,
    ) {
        if !self.channel.is_connected() {
            tracing::debug!(
                kind = command.kind(),
                symbols = ?command.symbols(),
                "Feed not connected, deferring subscription change"
            );
            state.park(changes);
            return;
        }

        let kind = command.kind();
        match self.channel.send(command) {
            Ok(()) => {
                tracing::debug!(kind, "Subscription change sent");
            }
            Err(e) => {
                tracing::warn!(kind, error = %e, "Failed to send subscription change, deferring");
                state.park(changes);
            }
        }
    }

    /// Build the replay command for a fresh connection.
    ///
    /// Clears the pending queue; the returned subscribe covers every symbol
    /// with a positive count. Returns `None` when nothing is subscribed.
    pub fn replay(&self) -> Option<FeedCommand> {
        let mut state = self.state.lock();
        state.pending_subscribe.clear();
        state.pending_unsubscribe.clear();

        let symbols = state.book.active_symbols();
        if symbols.is_empty() {
            None
        } else {
            tracing::info!(count = symbols.len(), "Replaying subscriptions");
            Some(FeedCommand::Subscribe(symbols))
        }
    }

    /// Ask the server for an immediate snapshot of `symbols`.
    ///
    /// Dropped when the feed is not connected; the backup poller covers
    /// that case.
    ///
    /// # Errors
    ///
    /// Returns [`FeedSendError`] when the command could not be queued.
    pub fn request_backup_data(&self, symbols: &[Symbol]) -> Result<(), FeedSendError> {
        if symbols.is_empty() {
            return Ok(());
        }
        if !self.channel.is_connected() {
            return Err(FeedSendError::NotConnected);
        }
        self.channel
            .send(FeedCommand::RequestBackupData(symbols.to_vec()))
    }

    /// Current count for a symbol.
    #[must_use]
    pub fn count(&self, symbol: &Symbol) -> usize {
        self.state.lock().book.count(symbol)
    }

    /// Every symbol with a positive count, sorted.
    #[must_use]
    pub fn active_symbols(&self) -> Vec<Symbol> {
        self.state.lock().book.active_symbols()
    }

    /// Parked subscribe and unsubscribe sets.
    #[must_use]
    pub fn pending(&self) -> (Vec<Symbol>, Vec<Symbol>) {
        let state = self.state.lock();
        (
            state.pending_subscribe.iter().cloned().collect(),
            state.pending_unsubscribe.iter().cloned().collect(),
        )
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.state.lock();
        SubscriptionStats {
            symbol_count: state.book.symbol_count(),
            total_refs: state.book.total_refs(),
            pending_subscribe: state.pending_subscribe.len(),
            pending_unsubscribe: state.pending_unsubscribe.len(),
        }
    }

    fn normalize_all<S: AsRef<str>>(&self, raw: &[S]) -> Vec<Symbol> {
        raw.iter()
            .filter_map(|r| {
                let normalized = self.normalizer.normalize(r.as_ref());
                if normalized.is_none() {
                    tracing::debug!(raw = r.as_ref(), "Skipping blank symbol");
                }
                normalized
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::testing::RecordingChannel;
    use crate::domain::streaming::ConnectionState;

    fn registry(state: ConnectionState) -> (SubscriptionRegistry, Arc<RecordingChannel>) {
        let channel = Arc::new(RecordingChannel::new(state));
        let registry = SubscriptionRegistry::new(SymbolNormalizer::new(), channel.clone());
        (registry, channel)
    }

    fn sym(s: &str) -> Symbol {
        Symbol::canonical(s).unwrap()
    }

    #[test]
    fn refcount_scenario_btc() {
        let (registry, channel) = registry(ConnectionState::Connected);

        registry.subscribe_symbols(&["BTC"]);
        registry.subscribe_symbols(&["BTC"]);
        registry.unsubscribe_symbols(&["BTC"]);

        assert_eq!(registry.count(&sym("BTCUSDT")), 1);
        assert_eq!(
            channel.sent(),
            vec![FeedCommand::Subscribe(vec![sym("BTCUSDT")])]
        );

        registry.unsubscribe_symbols(&["BTC"]);

        assert_eq!(registry.count(&sym("BTCUSDT")), 0);
        assert_eq!(
            channel.sent().last(),
            Some(&FeedCommand::Unsubscribe(vec![sym("BTCUSDT")]))
        );
    }

    #[test]
    fn batch_subscribe_is_one_message() {
        let (registry, channel) = registry(ConnectionState::Connected);

        let symbols = registry.subscribe_symbols(&["SOL", "SOL-USD", "AAPL"]);

        assert_eq!(symbols, vec![sym("SOLUSDT"), sym("SOLUSD"), sym("AAPL")]);
        assert_eq!(
            channel.sent(),
            vec![FeedCommand::Subscribe(vec![
                sym("AAPL"),
                sym("SOLUSD"),
                sym("SOLUSDT")
            ])]
        );
    }

    #[test]
    fn disconnected_changes_are_parked() {
        let (registry, channel) = registry(ConnectionState::Reconnecting);

        registry.subscribe_symbols(&["ETH"]);
        registry.subscribe_symbols(&["AAPL"]);
        registry.unsubscribe_symbols(&["AAPL"]);

        assert!(channel.sent().is_empty());
        let (subscribe, unsubscribe) = registry.pending();
        assert_eq!(subscribe, vec![sym("ETHUSDT")]);
        assert_eq!(unsubscribe, vec![sym("AAPL")]);
    }

    #[test]
    fn replay_covers_positive_counts_and_clears_pending() {
        let (registry, channel) = registry(ConnectionState::Disconnected);

        registry.subscribe_symbols(&["ETH", "BTC", "AAPL"]);
        registry.unsubscribe_symbols(&["BTC"]);

        channel.set_state(ConnectionState::Connected);
        let replay = registry.replay().unwrap();

        assert_eq!(
            replay,
            FeedCommand::Subscribe(vec![sym("AAPL"), sym("ETHUSDT")])
        );
        assert_eq!(registry.pending(), (vec![], vec![]));
    }

    #[test]
    fn replay_empty_registry_is_none() {
        let (registry, _channel) = registry(ConnectionState::Connected);
        assert!(registry.replay().is_none());
    }

    #[test]
    fn failed_send_is_parked() {
        let (registry, channel) = registry(ConnectionState::Connected);
        channel.fail_sends();

        registry.subscribe_symbols(&["DOGE"]);

        assert_eq!(registry.pending().0, vec![sym("DOGEUSDT")]);
        assert_eq!(registry.count(&sym("DOGEUSDT")), 1);
    }

    #[test]
    fn unsubscribe_unknown_is_noop() {
        let (registry, channel) = registry(ConnectionState::Connected);

        registry.unsubscribe_symbols(&["XRP"]);

        assert!(channel.sent().is_empty());
        assert_eq!(registry.stats(), SubscriptionStats::default());
    }

    #[test]
    fn request_backup_requires_connection() {
        let (registry, channel) = registry(ConnectionState::BackupMode);

        let err = registry.request_backup_data(&[sym("AAPL")]).unwrap_err();
        assert_eq!(err, FeedSendError::NotConnected);

        channel.set_state(ConnectionState::Connected);
        registry.request_backup_data(&[sym("AAPL")]).unwrap();
        assert_eq!(
            channel.sent(),
            vec![FeedCommand::RequestBackupData(vec![sym("AAPL")])]
        );
    }

    #[test]
    fn blank_symbols_are_skipped() {
        let (registry, channel) = registry(ConnectionState::Connected);

        let symbols = registry.subscribe_symbols(&["", "  "]);

        assert!(symbols.is_empty());
        assert!(channel.sent().is_empty());
    }
}

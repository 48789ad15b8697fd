//! Backup Poller
//!
//! Periodic REST fallback for charts whose stream is disabled, unavailable
//! or, for equities, silent because the market is closed.
//!
//! The poller only fetches while its gate is open. Each fetch stores the
//! latest value per symbol tagged `poll`; endpoint errors keep the previous
//! value. Every cycle publishes one [`PollResult`] per symbol that has any
//! known value.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::SnapshotProvider;
use crate::domain::price_table::PriceTable;
use crate::domain::streaming::{SourceTag, Tick};
use crate::domain::symbol::Symbol;
use crate::infrastructure::metrics;

/// Decides whether a poll cycle should fetch.
pub type PollGate = Arc<dyn Fn() -> bool + Send + Sync>;

/// One symbol's value after a poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PollResult {
    /// Value to plot.
    pub tick: Tick,
    /// Whether this cycle's fetch returned the value.
    pub fresh: bool,
}

/// Interval-driven snapshot fetcher for a fixed symbol set.
pub struct BackupPoller {
    symbols: Vec<Symbol>,
    interval: Duration,
    provider: Arc<dyn SnapshotProvider>,
    price_table: Arc<PriceTable>,
    gate: PollGate,
    alive: Arc<AtomicBool>,
    latest: Mutex<HashMap<Symbol, Tick>>,
}

impl BackupPoller {
    /// Create a poller.
    ///
    /// `alive` is the owner's liveness flag; results of a fetch that
    /// completes after it is cleared are discarded.
    #[must_use]
    pub fn new(
        symbols: Vec<Symbol>,
        interval: Duration,
        provider: Arc<dyn SnapshotProvider>,
        price_table: Arc<PriceTable>,
        gate: PollGate,
        alive: Arc<AtomicBool>,
    ) -> Self {
        Self {
            symbols,
            interval: interval.max(Duration::from_millis(1)),
            provider,
            price_table,
            gate,
            alive,
            latest: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the gate is currently open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        (self.gate)()
    }

    /// Run one cycle.
    ///
    /// Returns `None` when the gate is closed or the owner went away while
    /// the request was in flight.
    pub async fn poll_once(&self) -> Option<Vec<PollResult>> {
        if !self.is_active() || !self.alive.load(Ordering::Acquire) {
            return None;
        }

        let fetched = self.provider.snapshots(&self.symbols).await;

        if !self.alive.load(Ordering::Acquire) {
            tracing::debug!("Discarding poll result after disposal");
            return None;
        }

        let mut fresh = Vec::new();
        match fetched {
            Ok(ticks) => {
                let mut latest = self.latest.lock();
                for tick in ticks {
                    if !self.symbols.contains(&tick.symbol) {
                        continue;
                    }
                    let tick = tick.with_source(SourceTag::Poll);
                    fresh.push(tick.symbol.clone());
                    latest.insert(tick.symbol.clone(), tick);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, symbols = ?self.symbols, "Backup poll failed, keeping previous values");
                metrics::record_poll_error();
            }
        }

        Some(self.results(&fresh))
    }

    fn results(&self, fresh: &[Symbol]) -> Vec<PollResult> {
        let latest = self.latest.lock();
        self.symbols
            .iter()
            .filter_map(|symbol| {
                if let Some(tick) = latest.get(symbol) {
                    return Some(PollResult {
                        tick: tick.clone(),
                        fresh: fresh.contains(symbol),
                    });
                }
                self.price_table.latest(symbol).map(|tick| PollResult {
                    tick: tick.with_source(SourceTag::LastKnown),
                    fresh: false,
                })
            })
            .collect()
    }

    /// Start the interval loop.
    ///
    /// The first cycle runs immediately. The loop ends when `cancel` fires
    /// or the receiver is dropped.
    pub fn spawn(self, cancel: CancellationToken) -> mpsc::UnboundedReceiver<Vec<PollResult>> {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let results = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    results = self.poll_once() => results,
                };

                if let Some(results) = results
                    && tx.send(results).is_err()
                {
                    break;
                }
            }

            tracing::debug!(symbols = ?self.symbols, "Backup poller stopped");
        });

        rx
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::application::ports::{MockSnapshotProvider, ProviderError};

    fn sym(s: &str) -> Symbol {
        Symbol::canonical(s).unwrap()
    }

    fn tick(symbol: &str, price: f64, source: SourceTag) -> Tick {
        Tick::new(
            sym(symbol),
            price,
            0.0,
            0.0,
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            source,
        )
        .unwrap()
    }

    fn poller(
        provider: MockSnapshotProvider,
        table: Arc<PriceTable>,
        gate: bool,
    ) -> (BackupPoller, Arc<AtomicBool>) {
        let alive = Arc::new(AtomicBool::new(true));
        let poller = BackupPoller::new(
            vec![sym("AAPL")],
            Duration::from_millis(50),
            Arc::new(provider),
            table,
            Arc::new(move || gate),
            alive.clone(),
        );
        (poller, alive)
    }

    #[tokio::test]
    async fn fresh_result_is_tagged_poll() {
        let mut provider = MockSnapshotProvider::new();
        provider
            .expect_snapshots()
            .returning(|_| Ok(vec![tick("AAPL", 190.0, SourceTag::Stream)]));
        let (poller, _alive) = poller(provider, Arc::new(PriceTable::new()), true);

        let results = poller.poll_once().await.unwrap();

        assert_eq!(results.len(), 1);
        assert!(results[0].fresh);
        assert_eq!(results[0].tick.source, SourceTag::Poll);
    }

    #[tokio::test]
    async fn error_keeps_previous_value() {
        let mut provider = MockSnapshotProvider::new();
        let mut calls = 0;
        provider.expect_snapshots().returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(vec![tick("AAPL", 190.0, SourceTag::Poll)])
            } else {
                Err(ProviderError::new("snapshot", "503"))
            }
        });
        let (poller, _alive) = poller(provider, Arc::new(PriceTable::new()), true);

        poller.poll_once().await.unwrap();
        let results = poller.poll_once().await.unwrap();

        assert_eq!(results.len(), 1);
        assert!(!results[0].fresh);
        assert!((results[0].tick.price - 190.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn falls_back_to_price_table() {
        let table = Arc::new(PriceTable::new());
        table.update(tick("AAPL", 180.0, SourceTag::Stream));
        let mut provider = MockSnapshotProvider::new();
        provider
            .expect_snapshots()
            .returning(|_| Err(ProviderError::new("snapshot", "timeout")));
        let (poller, _alive) = poller(provider, table, true);

        let results = poller.poll_once().await.unwrap();

        assert_eq!(results[0].tick.source, SourceTag::LastKnown);
        assert!(!results[0].fresh);
    }

    #[tokio::test]
    async fn closed_gate_skips_fetch() {
        let mut provider = MockSnapshotProvider::new();
        provider.expect_snapshots().never();
        let (poller, _alive) = poller(provider, Arc::new(PriceTable::new()), false);

        assert!(poller.poll_once().await.is_none());
    }

    #[tokio::test]
    async fn result_after_disposal_is_discarded() {
        let mut provider = MockSnapshotProvider::new();
        provider.expect_snapshots().never();
        let (poller, alive) = poller(provider, Arc::new(PriceTable::new()), true);
        alive.store(false, Ordering::Release);

        assert!(poller.poll_once().await.is_none());
    }

    #[tokio::test]
    async fn spawned_loop_publishes_until_cancelled() {
        let mut provider = MockSnapshotProvider::new();
        provider
            .expect_snapshots()
            .returning(|_| Ok(vec![tick("AAPL", 190.0, SourceTag::Poll)]));
        let (poller, _alive) = poller(provider, Arc::new(PriceTable::new()), true);
        let cancel = CancellationToken::new();

        let mut rx = poller.spawn(cancel.clone());
        let first = rx.recv().await.unwrap();
        assert_eq!(first.len(), 1);

        cancel.cancel();
        while rx.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn unknown_symbols_in_response_are_ignored() {
        let mut provider = MockSnapshotProvider::new();
        provider
            .expect_snapshots()
            .returning(|_| Ok(vec![tick("MSFT", 400.0, SourceTag::Poll)]));
        let (poller, _alive) = poller(provider, Arc::new(PriceTable::new()), true);

        let results = poller.poll_once().await.unwrap();

        assert!(results.is_empty());
    }
}

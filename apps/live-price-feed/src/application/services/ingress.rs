//! Tick Ingress
//!
//! Turns raw feed frames into accepted ticks and routes each one to the
//! chart consumers registered for its symbol.
//!
//! # Acceptance
//!
//! 1. Decode; malformed entries are dropped and logged.
//! 2. Debounce: a tick arriving less than `debounce` after the last
//!    accepted tick for the same symbol is dropped.
//! 3. Idempotency: a tick quoting the same price and change values as the
//!    stored tick is dropped.
//! 4. Store in the [`PriceTable`] tagged as `stream`, then send to every
//!    route registered for the symbol.
//!
//! Dropped ticks leave no trace: neither the debounce clock nor the price
//! table moves.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::domain::price_table::PriceTable;
use crate::domain::streaming::{SourceTag, Tick};
use crate::domain::symbol::Symbol;
use crate::infrastructure::feed::codec::JsonCodec;
use crate::infrastructure::metrics::{self, DropReason};

/// Minimum spacing between accepted ticks for one symbol.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Identifies one registered consumer route.
pub type RouteId = u64;

/// What happened to a decoded tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressOutcome {
    /// Stored and dispatched.
    Accepted {
        /// Routes the tick was delivered to.
        delivered: usize,
    },
    /// Arrived inside the debounce interval.
    Debounced,
    /// Same quote as the stored tick.
    Duplicate,
}

struct Route {
    id: RouteId,
    tx: mpsc::UnboundedSender<Tick>,
}

/// Parses, filters and fans out stream ticks.
pub struct TickIngress {
    price_table: Arc<PriceTable>,
    codec: JsonCodec,
    debounce: Duration,
    last_accepted: Mutex<HashMap<Symbol, Instant>>,
    routes: RwLock<HashMap<Symbol, Vec<Route>>>,
    next_route: AtomicU64,
}

impl TickIngress {
    /// Create an ingress writing into `price_table`.
    #[must_use]
    pub fn new(price_table: Arc<PriceTable>, debounce: Duration) -> Self {
        Self {
            price_table,
            codec: JsonCodec::new(),
            debounce,
            last_accepted: Mutex::new(HashMap::new()),
            routes: RwLock::new(HashMap::new()),
            next_route: AtomicU64::new(1),
        }
    }

    /// Register a consumer for one symbol.
    ///
    /// Ticks for `symbol` arrive on the returned receiver in acceptance
    /// order. The route is pruned once the receiver is dropped.
    pub fn register(&self, symbol: &Symbol) -> (RouteId, mpsc::UnboundedReceiver<Tick>) {
        let id = self.next_route.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        self.routes
            .write()
            .entry(symbol.clone())
            .or_default()
            .push(Route { id, tx });

        tracing::debug!(symbol = %symbol, route = id, "Registered tick route");
        (id, rx)
    }

    /// Remove a consumer route.
    pub fn unregister(&self, symbol: &Symbol, id: RouteId) {
        let mut routes = self.routes.write();
        if let Some(list) = routes.get_mut(symbol) {
            list.retain(|r| r.id != id);
            if list.is_empty() {
                routes.remove(symbol);
            }
        }
    }

    /// Number of routes registered for a symbol.
    #[must_use]
    pub fn route_count(&self, symbol: &Symbol) -> usize {
        self.routes.read().get(symbol).map_or(0, Vec::len)
    }

    /// Handle one raw text frame from the feed.
    ///
    /// Returns the number of ticks accepted.
    pub fn on_message(&self, raw: &str) -> usize {
        let messages = match self.codec.decode(raw) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping undecodable feed frame");
                metrics::record_tick_dropped(DropReason::Malformed);
                return 0;
            }
        };

        let mut accepted = 0;
        for message in messages {
            metrics::record_message_received(message.kind());

            let Some(result) = message.into_tick() else {
                continue;
            };

            match result {
                Ok(tick) => {
                    if matches!(self.on_tick(tick), IngressOutcome::Accepted { .. }) {
                        accepted += 1;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Dropping malformed tick");
                    metrics::record_tick_dropped(DropReason::Malformed);
                }
            }
        }

        accepted
    }

    /// Handle one decoded tick arriving now.
    pub fn on_tick(&self, tick: Tick) -> IngressOutcome {
        self.on_tick_at(tick, Instant::now())
    }

    /// Handle one decoded tick arriving at `arrived`.
    pub fn on_tick_at(&self, tick: Tick, arrived: Instant) -> IngressOutcome {
        let mut last_accepted = self.last_accepted.lock();

        if let Some(previous) = last_accepted.get(&tick.symbol)
            && arrived.saturating_duration_since(*previous) < self.debounce
        {
            metrics::record_tick_dropped(DropReason::Debounced);
            return IngressOutcome::Debounced;
        }

        if self.price_table.is_repeat(&tick) {
            metrics::record_tick_dropped(DropReason::Duplicate);
            return IngressOutcome::Duplicate;
        }

        let tick = tick.with_source(SourceTag::Stream);
        last_accepted.insert(tick.symbol.clone(), arrived);
        self.price_table.update(tick.clone());

        let delivered = self.dispatch(&tick);
        metrics::record_tick_accepted();
        IngressOutcome::Accepted { delivered }
    }

    /// Send to the routes for the tick's symbol, pruning closed ones.
    fn dispatch(&self, tick: &Tick) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        if let Some(list) = self.routes.read().get(&tick.symbol) {
            for route in list {
                if route.tx.send(tick.clone()).is_ok() {
                    delivered += 1;
                } else {
                    closed.push(route.id);
                }
            }
        }

        for id in closed {
            self.unregister(&tick.symbol, id);
        }

        delivered
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Chart Buffer Controller
//!
//! One controller per mounted chart. On mount it takes a subscription
//! reference for its symbol, registers an ingress route and spawns a task
//! that seeds the buffer from history and then applies stream ticks and
//! backup poll results as they arrive.
//!
//! # Lifecycle
//!
//! ```text
//! mount ──► Seeding ──history ok──► Live ──dispose──► Disposed
//!              │
//!              └──error / empty───► Inert
//! ```
//!
//! Equities consult a [`MarketHours`] predicate. While the market is
//! closed, stream ticks are ignored and each poll cycle plots the last
//! known close at the current wall clock time with direction `unchanged`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::context::FeedContext;
use super::ingress::{RouteId, TickIngress};
use super::poller::{BackupPoller, PollGate, PollResult};
use super::registry::SubscriptionRegistry;
use crate::application::ports::{HistoryProvider, MarketHours};
use crate::domain::chart::{ChartBuffer, ChartPoint, Direction, PointOutcome, RetentionPolicy};
use crate::domain::streaming::{AssetClass, SourceTag, Tick};
use crate::domain::symbol::Symbol;
use crate::infrastructure::metrics;

// =============================================================================
// Parameters and Views
// =============================================================================

/// Mount parameters for one chart.
#[derive(Clone)]
pub struct ChartParams {
    /// Raw symbol as configured by the page author.
    pub symbol: String,
    /// Asset class, which selects normalization and market-hours handling.
    pub asset_class: AssetClass,
    /// Whether to consume the live stream.
    pub stream_enabled: bool,
    /// Backup poll interval; `None` uses the context default.
    pub poll_interval: Option<Duration>,
    /// Market-hours predicate, consulted for equities only.
    pub market_hours: Option<Arc<dyn MarketHours>>,
}

impl ChartParams {
    /// Streaming chart with context defaults.
    #[must_use]
    pub fn new(symbol: impl Into<String>, asset_class: AssetClass) -> Self {
        Self {
            symbol: symbol.into(),
            asset_class,
            stream_enabled: true,
            poll_interval: None,
            market_hours: None,
        }
    }

    /// Disable the stream; the chart is fed by polling only.
    #[must_use]
    pub fn poll_only(mut self) -> Self {
        self.stream_enabled = false;
        self
    }

    /// Override the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Attach a market-hours predicate.
    #[must_use]
    pub fn with_market_hours(mut self, market_hours: Arc<dyn MarketHours>) -> Self {
        self.market_hours = Some(market_hours);
        self
    }
}

impl std::fmt::Debug for ChartParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChartParams")
            .field("symbol", &self.symbol)
            .field("asset_class", &self.asset_class)
            .field("stream_enabled", &self.stream_enabled)
            .field("poll_interval", &self.poll_interval)
            .field("market_hours", &self.market_hours.is_some())
            .finish()
    }
}

/// Controller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    /// Waiting for the history seed.
    Seeding,
    /// Applying live updates.
    Live,
    /// Seeding failed; no live updates.
    Inert,
    /// Unmounted.
    Disposed,
}

/// Mount failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    /// Symbol was blank after trimming.
    #[error("invalid chart symbol: {0:?}")]
    InvalidSymbol(String),
}

/// Render-ready copy of a controller's view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSnapshot {
    /// Canonical symbol.
    pub symbol: Symbol,
    /// Buffer contents, oldest first.
    pub points: Vec<ChartPoint>,
    /// Movement of the most recent update.
    pub direction: Direction,
    /// Most recent plotted price.
    pub last_price: Option<f64>,
    /// Source of the most recent update.
    pub source: Option<SourceTag>,
    /// Lifecycle state.
    pub state: ControllerState,
}

#[derive(Debug)]
struct ChartView {
    buffer: ChartBuffer,
    direction: Direction,
    last_price: Option<f64>,
    source: Option<SourceTag>,
    state: ControllerState,
}

/// View plus its change signal.
struct SharedView {
    view: RwLock<ChartView>,
    revision: watch::Sender<u64>,
}

impl SharedView {
    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    fn set_state(&self, state: ControllerState) {
        self.view.write().state = state;
        self.bump();
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Owner of one chart's rolling buffer.
///
/// Dropping the controller disposes it.
pub struct ChartBufferController {
    symbol: Symbol,
    asset_class: AssetClass,
    shared: Arc<SharedView>,
    registry: Arc<SubscriptionRegistry>,
    ingress: Arc<TickIngress>,
    market_hours: Option<Arc<dyn MarketHours>>,
    route: Option<RouteId>,
    cancel: CancellationToken,
    alive: Arc<AtomicBool>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for ChartBufferController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChartBufferController")
            .field("symbol", &self.symbol)
            .field("asset_class", &self.asset_class)
            .field("state", &self.state())
            .field("route", &self.route)
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ChartBufferController {
    /// Mount a chart.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidSymbol`] when the symbol is blank.
    pub fn mount(ctx: &Arc<FeedContext>, params: ChartParams) -> Result<Self, ControllerError> {
        let symbol = ctx
            .registry()
            .normalizer()
            .normalize_for(&params.symbol, params.asset_class)
            .ok_or_else(|| ControllerError::InvalidSymbol(params.symbol.clone()))?;

        let policy = ctx.charts().retention;
        let (revision, _) = watch::channel(0);
        let shared = Arc::new(SharedView {
            view: RwLock::new(ChartView {
                buffer: ChartBuffer::new(policy),
                direction: Direction::Unchanged,
                last_price: None,
                source: None,
                state: ControllerState::Seeding,
            }),
            revision,
        });

        let cancel = CancellationToken::new();
        let alive = Arc::new(AtomicBool::new(true));

        let (route, ticks) = if params.stream_enabled {
            let (route, rx) = ctx.ingress().register(&symbol);
            ctx.registry().subscribe(std::slice::from_ref(&symbol));
            if let Err(e) = ctx.registry().request_backup_data(std::slice::from_ref(&symbol)) {
                tracing::debug!(symbol = %symbol, error = %e, "Backup data request skipped");
            }
            (Some(route), Some(rx))
        } else {
            (None, None)
        };

        let market_hours = if params.asset_class.has_market_hours() {
            params.market_hours.clone()
        } else {
            None
        };

        let gate = poll_gate(ctx, params.stream_enabled, market_hours.clone());
        let poller = BackupPoller::new(
            vec![symbol.clone()],
            params.poll_interval.unwrap_or(ctx.charts().poll_interval),
            ctx.snapshots().clone(),
            ctx.price_table().clone(),
            gate,
            alive.clone(),
        );

        let worker = ChartWorker {
            symbol: symbol.clone(),
            policy,
            history: ctx.history().clone(),
            market_hours: market_hours.clone(),
            shared: shared.clone(),
            alive: alive.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(worker.run(ticks, poller));

        tracing::info!(
            symbol = %symbol,
            asset_class = params.asset_class.as_str(),
            stream = params.stream_enabled,
            "Chart mounted"
        );
        metrics::increment_charts_mounted();

        Ok(Self {
            symbol,
            asset_class: params.asset_class,
            shared,
            registry: ctx.registry().clone(),
            ingress: ctx.ingress().clone(),
            market_hours,
            route,
            cancel,
            alive,
            disposed: AtomicBool::new(false),
        })
    }

    /// Canonical symbol.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Asset class.
    #[must_use]
    pub const fn asset_class(&self) -> AssetClass {
        self.asset_class
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.shared.view.read().state
    }

    /// Copy of the current view.
    ///
    /// Direction reads `unchanged` whenever the market is closed, even
    /// before the next poll cycle replots.
    #[must_use]
    pub fn snapshot(&self) -> ChartSnapshot {
        let closed = market_closed(self.market_hours.as_ref());
        let view = self.shared.view.read();
        let direction = if closed {
            Direction::Unchanged
        } else {
            view.direction
        };
        ChartSnapshot {
            symbol: self.symbol.clone(),
            points: view.buffer.points(),
            direction,
            last_price: view.last_price,
            source: view.source,
            state: view.state,
        }
    }

    /// Revision counter bumped on every visible change.
    #[must_use]
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    /// Unmount.
    ///
    /// Cancels the poll timer and the controller task, releases the
    /// ingress route and the subscription reference. Safe to call more
    /// than once.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.alive.store(false, Ordering::Release);
        self.cancel.cancel();

        if let Some(route) = self.route {
            self.ingress.unregister(&self.symbol, route);
            self.registry.unsubscribe(std::slice::from_ref(&self.symbol));
        }

        self.shared.set_state(ControllerState::Disposed);
        metrics::decrement_charts_mounted();
        tracing::info!(symbol = %self.symbol, "Chart disposed");
    }
}

impl Drop for ChartBufferController {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn poll_gate(
    ctx: &Arc<FeedContext>,
    stream_enabled: bool,
    market_hours: Option<Arc<dyn MarketHours>>,
) -> PollGate {
    let channel = ctx.channel().clone();
    Arc::new(move || {
        !stream_enabled
            || channel.state().stream_unavailable()
            || market_closed(market_hours.as_ref())
    })
}

fn market_closed(market_hours: Option<&Arc<dyn MarketHours>>) -> bool {
    market_hours.is_some_and(|m| !m.is_open(Utc::now()))
}

// =============================================================================
// Worker Task
// =============================================================================

struct ChartWorker {
    symbol: Symbol,
    policy: RetentionPolicy,
    history: Arc<dyn HistoryProvider>,
    market_hours: Option<Arc<dyn MarketHours>>,
    shared: Arc<SharedView>,
    alive: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl ChartWorker {
    async fn run(self, mut ticks: Option<mpsc::UnboundedReceiver<Tick>>, poller: BackupPoller) {
        if !self.seed().await {
            return;
        }

        let mut polls = poller.spawn(self.cancel.child_token());

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                Some(tick) = next_tick(&mut ticks) => self.on_stream_tick(&tick),
                Some(results) = polls.recv() => self.on_poll(&results),
            }
        }

        tracing::debug!(symbol = %self.symbol, "Chart worker stopped");
    }

    /// Load history; returns whether the chart went live.
    async fn seed(&self) -> bool {
        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return false,
            result = self.history.history(&self.symbol) => result,
        };

        if !self.alive.load(Ordering::Acquire) {
            return false;
        }

        let buffer = match result {
            Ok(points) => ChartBuffer::from_history(self.policy, points),
            Err(e) => {
                tracing::warn!(symbol = %self.symbol, error = %e, "History seed failed, chart is inert");
                self.shared.set_state(ControllerState::Inert);
                return false;
            }
        };

        if buffer.is_empty() {
            tracing::warn!(symbol = %self.symbol, "History seed had no usable points, chart is inert");
            self.shared.set_state(ControllerState::Inert);
            return false;
        }

        {
            let mut view = self.shared.view.write();
            view.last_price = buffer.last().map(|p| p.price);
            view.buffer = buffer;
            view.state = ControllerState::Live;
        }
        self.shared.bump();

        tracing::debug!(symbol = %self.symbol, "Chart seeded");
        true
    }

    fn market_closed(&self) -> bool {
        market_closed(self.market_hours.as_ref())
    }

    fn on_stream_tick(&self, tick: &Tick) {
        if self.market_closed() {
            return;
        }
        self.apply(
            ChartPoint::new(tick.timestamp_ms(), tick.price),
            SourceTag::Stream,
            None,
        );
    }

    fn on_poll(&self, results: &[PollResult]) {
        let result = results.iter().find(|r| r.tick.symbol == self.symbol);

        if self.market_closed() {
            let price = match result {
                Some(r) => Some(r.tick.price),
                None => self.shared.view.read().buffer.last().map(|p| p.price),
            };
            let Some(price) = price else {
                return;
            };
            let source = result.map_or(SourceTag::LastKnown, |r| r.tick.source);
            self.apply(
                ChartPoint::new(Utc::now().timestamp_millis(), price),
                source,
                Some(Direction::Unchanged),
            );
            return;
        }

        if let Some(r) = result
            && r.fresh
        {
            self.apply(
                ChartPoint::new(r.tick.timestamp_ms(), r.tick.price),
                r.tick.source,
                None,
            );
        }
    }

    fn apply(&self, point: ChartPoint, source: SourceTag, direction: Option<Direction>) {
        if !self.alive.load(Ordering::Acquire) {
            return;
        }

        let outcome = {
            let mut view = self.shared.view.write();
            if view.state != ControllerState::Live {
                return;
            }

            let direction =
                direction.unwrap_or_else(|| view.buffer.classify(point.timestamp_ms, point.price));
            let outcome = view.buffer.apply(point);
            if outcome.changed() {
                view.direction = direction;
                view.last_price = Some(point.price);
                view.source = Some(source);
            }
            outcome
        };

        match outcome {
            PointOutcome::Merged | PointOutcome::Appended { .. } => self.shared.bump(),
            PointOutcome::Stale => {
                tracing::debug!(symbol = %self.symbol, t = point.timestamp_ms, "Dropping out-of-order point");
            }
            PointOutcome::Invalid => {
                tracing::debug!(symbol = %self.symbol, "Dropping invalid point");
            }
        }
    }
}

async fn next_tick(ticks: &mut Option<mpsc::UnboundedReceiver<Tick>>) -> Option<Tick> {
    match ticks {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// Tests
// =============================================================================

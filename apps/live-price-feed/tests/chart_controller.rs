//! Chart Controller Integration Tests
//!
//! End to end from raw feed frames and REST ports to chart views.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_test::assert_ok;

use live_price_feed::{
    AssetClass, ChartBufferController, ChartParams, ChartPoint, ChartSettings, ControllerState,
    Direction, FeedCommand, FeedContext, FeedLink, HistoryProvider, ProviderError,
    RetentionPolicy, SnapshotProvider, SourceTag, Symbol, SymbolNormalizer, Tick,
};

const T0: i64 = 1_700_000_000_000;
const WAIT: Duration = Duration::from_secs(5);
const NEVER: Duration = Duration::from_secs(3_600);

// =============================================================================
// REST Fakes
// =============================================================================

struct FixedHistory(Result<Vec<ChartPoint>, ProviderError>);

#[async_trait]
impl HistoryProvider for FixedHistory {
    async fn history(&self, _symbol: &Symbol) -> Result<Vec<ChartPoint>, ProviderError> {
        self.0.clone()
    }
}

#[derive(Default)]
struct FixedSnapshots(Mutex<Vec<Tick>>);

impl FixedSnapshots {
    fn set(&self, ticks: Vec<Tick>) {
        *self.0.lock() = ticks;
    }
}

#[async_trait]
impl SnapshotProvider for FixedSnapshots {
    async fn snapshots(&self, symbols: &[Symbol]) -> Result<Vec<Tick>, ProviderError> {
        Ok(self
            .0
            .lock()
            .iter()
            .filter(|t| symbols.contains(&t.symbol))
            .cloned()
            .collect())
    }
}

// =============================================================================
// Setup
// =============================================================================

struct Fixture {
    context: Arc<FeedContext>,
    snapshots: Arc<FixedSnapshots>,
    _commands: mpsc::UnboundedReceiver<FeedCommand>,
}

fn fixture(history: Result<Vec<ChartPoint>, ProviderError>, debounce: Duration, poll: Duration) -> Fixture {
    let (link, commands) = FeedLink::new();
    let snapshots = Arc::new(FixedSnapshots::default());
    let context = Arc::new(FeedContext::new(
        link,
        SymbolNormalizer::new(),
        Arc::new(FixedHistory(history)),
        snapshots.clone(),
        debounce,
        ChartSettings {
            retention: RetentionPolicy::default(),
            poll_interval: poll,
        },
    ));

    Fixture {
        context,
        snapshots,
        _commands: commands,
    }
}

fn seed(points: &[(i64, f64)]) -> Result<Vec<ChartPoint>, ProviderError> {
    Ok(points.iter().map(|&(t, p)| ChartPoint::new(t, p)).collect())
}

fn price_update(symbol: &str, price: &str, timestamp_ms: i64) -> String {
    format!(
        r#"{{"event":"price_update","data":{{"symbol":"{symbol}","price":"{price}","timestamp_utc":{timestamp_ms}}}}}"#
    )
}

async fn wait_until(chart: &ChartBufferController, done: impl Fn(&ChartBufferController) -> bool) {
    tokio::time::timeout(WAIT, async {
        while !done(chart) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

fn at(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn stream_ticks_merge_and_classify() {
    let fx = fixture(seed(&[(T0, 100.0), (T0 + 1_000, 101.0)]), Duration::ZERO, NEVER);
    let chart = assert_ok!(fx.context.mount(ChartParams::new("btc", AssetClass::Crypto)));
    wait_until(&chart, |c| c.state() == ControllerState::Live).await;

    let ingress = fx.context.ingress();
    assert_eq!(ingress.on_message(&price_update("BTCUSDT", "103", T0 + 2_000)), 1);
    wait_until(&chart, |c| c.snapshot().points.len() == 3).await;

    let view = chart.snapshot();
    assert_eq!(view.last_price, Some(103.0));
    assert_eq!(view.direction, Direction::Rising);
    assert_eq!(view.source, Some(SourceTag::Stream));

    assert_eq!(ingress.on_message(&price_update("BTCUSDT", "99", T0 + 2_300)), 1);
    wait_until(&chart, |c| c.snapshot().last_price == Some(99.0)).await;

    let view = chart.snapshot();
    assert_eq!(view.points.len(), 3);
    assert_eq!(view.points[2], ChartPoint::new(T0 + 2_000, 99.0));
    assert_eq!(view.direction, Direction::Falling);
}

#[tokio::test]
async fn invalid_and_repeated_ticks_never_reach_chart() {
    let fx = fixture(seed(&[(T0, 100.0)]), Duration::ZERO, NEVER);
    let chart = fx.context.mount(ChartParams::new("ETH", AssetClass::Crypto)).unwrap();
    wait_until(&chart, |c| c.state() == ControllerState::Live).await;

    let ingress = fx.context.ingress();
    assert_eq!(ingress.on_message(&price_update("ETHUSDT", "NaN", T0 + 5_000)), 0);
    assert_eq!(ingress.on_message(&price_update("ETHUSDT", "12", 0)), 0);
    assert_eq!(ingress.on_message(r#"{"event":"price_update","data":"oops"}"#), 0);
    assert_eq!(ingress.on_message("not json"), 0);

    assert_eq!(ingress.on_message(&price_update("ETHUSDT", "12", T0 + 5_000)), 1);
    assert_eq!(ingress.on_message(&price_update("ETHUSDT", "12", T0 + 6_000)), 0);
    wait_until(&chart, |c| c.snapshot().points.len() == 2).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let view = chart.snapshot();
    assert_eq!(view.points.len(), 2);
    assert_eq!(view.points[1], ChartPoint::new(T0 + 5_000, 12.0));
    assert!(view.points.iter().all(|p| p.price.is_finite()));
}

#[tokio::test]
async fn debounce_drops_bursts() {
    let fx = fixture(seed(&[(T0, 1.0)]), Duration::from_secs(10), NEVER);
    let chart = fx.context.mount(ChartParams::new("SOL", AssetClass::Crypto)).unwrap();
    wait_until(&chart, |c| c.state() == ControllerState::Live).await;

    let ingress = fx.context.ingress();
    assert_eq!(ingress.on_message(&price_update("SOLUSDT", "2", T0 + 2_000)), 1);
    assert_eq!(ingress.on_message(&price_update("SOLUSDT", "3", T0 + 4_000)), 0);

    wait_until(&chart, |c| c.snapshot().last_price == Some(2.0)).await;
    let table = fx.context.price_table();
    let symbol = Symbol::canonical("SOLUSDT").unwrap();
    assert!((table.latest(&symbol).unwrap().price - 2.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn closed_market_equity_plots_flat_poll_points() {
    let now = Utc::now().timestamp_millis();
    let fx = fixture(
        seed(&[(now - 60_000, 188.0), (now - 30_000, 189.0)]),
        Duration::ZERO,
        Duration::from_millis(20),
    );
    let aapl = Symbol::canonical("AAPL").unwrap();
    fx.snapshots.set(vec![
        Tick::new(aapl, 190.0, 1.0, 0.5, at(now - 120_000), SourceTag::Poll).unwrap(),
    ]);

    let params = ChartParams::new("aapl", AssetClass::Equity)
        .with_market_hours(Arc::new(|_: DateTime<Utc>| false));
    let chart = fx.context.mount(params).unwrap();
    wait_until(&chart, |c| c.snapshot().last_price == Some(190.0)).await;

    assert_eq!(
        fx.context
            .ingress()
            .on_message(&price_update("AAPL", "500", now + 1_000)),
        1
    );
    tokio::time::sleep(Duration::from_millis(80)).await;

    let view = chart.snapshot();
    assert_eq!(view.direction, Direction::Unchanged);
    assert_eq!(view.source, Some(SourceTag::Poll));
    assert!(view.points.iter().all(|p| p.price < 500.0));
    assert!(view.points.last().unwrap().timestamp_ms >= now);
}

#[tokio::test]
async fn poll_only_chart_skips_the_stream() {
    let fx = fixture(seed(&[(T0, 10.0)]), Duration::ZERO, Duration::from_millis(20));
    let gold = Symbol::canonical("GC=F").unwrap();
    fx.snapshots.set(vec![
        Tick::new(gold.clone(), 11.0, 0.0, 0.0, at(T0 + 5_000), SourceTag::Poll).unwrap(),
    ]);

    let chart = fx
        .context
        .mount(ChartParams::new("GC=F", AssetClass::Commodity).poll_only())
        .unwrap();
    wait_until(&chart, |c| c.snapshot().points.len() == 2).await;

    assert_eq!(fx.context.registry().count(&gold), 0);
    assert_eq!(fx.context.ingress().route_count(&gold), 0);
    let view = chart.snapshot();
    assert_eq!(view.points[1], ChartPoint::new(T0 + 5_000, 11.0));
    assert_eq!(view.source, Some(SourceTag::Poll));
}

#[tokio::test]
async fn failed_seed_is_inert_until_disposed() {
    let fx = fixture(
        Err(ProviderError::new("history", "503 Service Unavailable")),
        Duration::ZERO,
        NEVER,
    );
    let chart = fx.context.mount(ChartParams::new("DOGE", AssetClass::Crypto)).unwrap();
    wait_until(&chart, |c| c.state() == ControllerState::Inert).await;

    let symbol = chart.symbol().clone();
    assert_eq!(fx.context.registry().count(&symbol), 1);

    fx.context
        .ingress()
        .on_message(&price_update("DOGEUSDT", "0.1", T0));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(chart.snapshot().points.is_empty());

    chart.dispose();
    assert_eq!(chart.state(), ControllerState::Disposed);
    assert_eq!(fx.context.registry().count(&symbol), 0);
}

#[tokio::test]
async fn shared_symbol_released_once_per_chart() {
    let fx = fixture(seed(&[(T0, 1.0)]), Duration::ZERO, NEVER);
    let first = fx.context.mount(ChartParams::new("BTC", AssetClass::Crypto)).unwrap();
    let second = fx
        .context
        .mount(ChartParams::new("BTC-USDT", AssetClass::Crypto))
        .unwrap();
    let symbol = first.symbol().clone();
    assert_eq!(second.symbol(), &symbol);
    assert_eq!(fx.context.registry().count(&symbol), 2);

    first.dispose();
    first.dispose();
    assert_eq!(fx.context.registry().count(&symbol), 1);

    drop(second);
    assert_eq!(fx.context.registry().count(&symbol), 0);
    assert_eq!(fx.context.ingress().route_count(&symbol), 0);
}

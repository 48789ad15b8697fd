//! Feed Context
//!
//! Explicit bundle of the process-wide feed state: price table,
//! subscription registry, ingress, the feed channel and the REST ports.
//! Shared by `Arc` between the runtime and every mounted chart.

use std::sync::Arc;
use std::time::Duration;

use super::controller::{ChartBufferController, ChartParams, ControllerError};
use super::ingress::TickIngress;
use super::registry::SubscriptionRegistry;
use crate::application::ports::{FeedChannel, HistoryProvider, SnapshotProvider};
use crate::domain::chart::RetentionPolicy;
use crate::domain::price_table::PriceTable;
use crate::domain::symbol::SymbolNormalizer;

/// Default backup poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Chart defaults applied to every mounted controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartSettings {
    /// Bucket and retention thresholds.
    pub retention: RetentionPolicy,
    /// Backup poll interval when a chart does not set its own.
    pub poll_interval: Duration,
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Shared feed state.
pub struct FeedContext {
    price_table: Arc<PriceTable>,
    registry: Arc<SubscriptionRegistry>,
    ingress: Arc<TickIngress>,
    channel: Arc<dyn FeedChannel>,
    history: Arc<dyn HistoryProvider>,
    snapshots: Arc<dyn SnapshotProvider>,
    charts: ChartSettings,
}

impl FeedContext {
    /// Wire up the shared state around a feed channel and REST ports.
    #[must_use]
    pub fn new(
        channel: Arc<dyn FeedChannel>,
        normalizer: SymbolNormalizer,
        history: Arc<dyn HistoryProvider>,
        snapshots: Arc<dyn SnapshotProvider>,
        debounce: Duration,
        charts: ChartSettings,
    ) -> Self {
        let price_table = Arc::new(PriceTable::new());
        let registry = Arc::new(SubscriptionRegistry::new(normalizer, channel.clone()));
        let ingress = Arc::new(TickIngress::new(price_table.clone(), debounce));

        Self {
            price_table,
            registry,
            ingress,
            channel,
            history,
            snapshots,
            charts,
        }
    }

    /// Mount a chart consumer.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError`] when the symbol is blank.
    pub fn mount(self: &Arc<Self>, params: ChartParams) -> Result<ChartBufferController, ControllerError> {
        ChartBufferController::mount(self, params)
    }

    /// Latest tick per symbol.
    #[must_use]
    pub const fn price_table(&self) -> &Arc<PriceTable> {
        &self.price_table
    }

    /// Symbol refcounts.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Stream tick ingress.
    #[must_use]
    pub const fn ingress(&self) -> &Arc<TickIngress> {
        &self.ingress
    }

    /// Handle onto the feed connection.
    #[must_use]
    pub const fn channel(&self) -> &Arc<dyn FeedChannel> {
        &self.channel
    }

    /// History seed port.
    #[must_use]
    pub const fn history(&self) -> &Arc<dyn HistoryProvider> {
        &self.history
    }

    /// Backup snapshot port.
    #[must_use]
    pub const fn snapshots(&self) -> &Arc<dyn SnapshotProvider> {
        &self.snapshots
    }

    /// Chart defaults.
    #[must_use]
    pub const fn charts(&self) -> &ChartSettings {
        &self.charts
    }
}

//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SubscriptionRegistry`: Symbol refcounts driving upstream subscriptions
//! - `TickIngress`: Parse, debounce, dedupe and fan out stream ticks
//! - `BackupPoller`: REST fallback while streaming is unavailable
//! - `ChartBufferController`: Per-chart rolling buffer
//! - `FeedContext`: Shared state passed to every chart

pub mod context;
pub mod controller;
pub mod ingress;
pub mod poller;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{ChartSettings, DEFAULT_POLL_INTERVAL, FeedContext};
pub use controller::{
    ChartBufferController, ChartParams, ChartSnapshot, ControllerError, ControllerState,
};
pub use ingress::{DEFAULT_DEBOUNCE, IngressOutcome, RouteId, TickIngress};
pub use poller::{BackupPoller, PollGate, PollResult};
pub use registry::SubscriptionRegistry;

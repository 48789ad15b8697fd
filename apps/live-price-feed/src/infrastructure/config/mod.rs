//! Configuration Module
//!
//! Environment-driven configuration for the feed service.

mod settings;

pub use settings::{
    ChartSpec, ConfigError, FeedConfig, FeedSettings, RestSettings, ServerSettings,
};

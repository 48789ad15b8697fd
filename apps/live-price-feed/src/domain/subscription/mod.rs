//! Subscription Reference Counting
//!
//! Domain types for tracking how many chart consumers want each symbol.
//!
//! # Design
//!
//! The book only records counts. Upstream changes are reported when a
//! count crosses 0→1 (subscribe) or 1→0 (unsubscribe); any other change
//! stays local. Counts never go negative and zero entries are removed.
//!
//! This allows multiple consumers to subscribe to the same symbol
//! while maintaining only one upstream subscription.

use std::collections::{BTreeSet, HashMap};

use super::symbol::Symbol;

// =============================================================================
// Feed Commands
// =============================================================================

/// Outbound instruction for the upstream feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCommand {
    /// Start streaming these symbols.
    Subscribe(Vec<Symbol>),
    /// Stop streaming these symbols.
    Unsubscribe(Vec<Symbol>),
    /// Ask the server for an immediate snapshot of these symbols.
    RequestBackupData(Vec<Symbol>),
}

impl FeedCommand {
    /// Symbols carried by the command.
    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        match self {
            Self::Subscribe(s) | Self::Unsubscribe(s) | Self::RequestBackupData(s) => s,
        }
    }

    /// Command name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
            Self::RequestBackupData(_) => "request_backup_data",
        }
    }
}

// =============================================================================
// Subscription Changes
// =============================================================================

/// Changes to upstream subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Symbols whose count went 0→1.
    pub subscribe: BTreeSet<Symbol>,
    /// Symbols whose count went 1→0.
    pub unsubscribe: BTreeSet<Symbol>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }
}

// =============================================================================
// Subscription Book
// =============================================================================

/// Symbol → consumer count.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionBook {
    counts: HashMap<Symbol, usize>,
}

impl SubscriptionBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment counts.
    ///
    /// Returns symbols that need an upstream subscribe (count went 0→1).
    /// A symbol listed twice in one call is counted twice.
    pub fn add(&mut self, symbols: &[Symbol]) -> SubscriptionChanges {
        let mut changes = SubscriptionChanges::default();

        for symbol in symbols {
            let count = self.counts.entry(symbol.clone()).or_insert(0);
            *count += 1;

            if *count == 1 {
                changes.subscribe.insert(symbol.clone());
            }
        }

        changes
    }

    /// Decrement counts.
    ///
    /// Returns symbols that need an upstream unsubscribe (count went 1→0).
    /// Unknown symbols are ignored.
    pub fn remove(&mut self, symbols: &[Symbol]) -> SubscriptionChanges {
        let mut changes = SubscriptionChanges::default();

        for symbol in symbols {
            let Some(count) = self.counts.get_mut(symbol) else {
                continue;
            };

            *count = count.saturating_sub(1);

            if *count == 0 {
                self.counts.remove(symbol);
                changes.unsubscribe.insert(symbol.clone());
            }
        }

        changes
    }

    /// Current count for a symbol (0 when absent).
    #[must_use]
    pub fn count(&self, symbol: &Symbol) -> usize {
        self.counts.get(symbol).copied().unwrap_or(0)
    }

    /// All symbols with a positive count, sorted.
    #[must_use]
    pub fn active_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<_> = self.counts.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Number of distinct symbols.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.counts.len()
    }

    /// Sum of all counts.
    #[must_use]
    pub fn total_refs(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Subscription statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SubscriptionStats {
    /// Number of distinct subscribed symbols.
    pub symbol_count: usize,
    /// Sum of all reference counts.
    pub total_refs: usize,
    /// Symbols waiting for the next connection to subscribe.
    pub pending_subscribe: usize,
    /// Symbols waiting for the next connection to unsubscribe.
    pub pending_unsubscribe: usize,
}

// =============================================================================
// Tests
// =============================================================================

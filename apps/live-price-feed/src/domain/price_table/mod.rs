//! Latest Price Table
//!
//! Process-wide map of the most recent accepted tick per symbol.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::streaming::Tick;
use super::symbol::Symbol;

/// Latest tick per symbol.
#[derive(Debug, Default)]
pub struct PriceTable {
    latest: RwLock<HashMap<Symbol, Tick>>,
}

impl PriceTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a tick, returning the one it replaced.
    pub fn update(&self, tick: Tick) -> Option<Tick> {
        self.latest.write().insert(tick.symbol.clone(), tick)
    }

    /// Latest tick for a symbol.
    #[must_use]
    pub fn latest(&self, symbol: &Symbol) -> Option<Tick> {
        self.latest.read().get(symbol).cloned()
    }

    /// Check a candidate against the stored tick without cloning it.
    #[must_use]
    pub fn is_repeat(&self, tick: &Tick) -> bool {
        self.latest
            .read()
            .get(&tick.symbol)
            .is_some_and(|stored| stored.same_quote(tick))
    }

    /// Number of symbols with a stored tick.
    #[must_use]
    pub fn len(&self) -> usize {
        self.latest.read().len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.latest.read().is_empty()
    }
}

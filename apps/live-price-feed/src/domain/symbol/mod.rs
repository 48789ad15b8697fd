//! Canonical Symbols
//!
//! Normalizes raw identifiers coming from chart consumers into the keys
//! the upstream feed understands.
//!
//! # Rules
//!
//! Applied in order after trimming and upper-casing:
//!
//! 1. Known equity/ETF tickers pass through unchanged (`AAPL` → `AAPL`).
//! 2. Dash-quoted pairs collapse (`SOL-USD` → `SOLUSD`).
//! 3. Identifiers already carrying a quote suffix pass through (`BTCUSDT`).
//! 4. Bare short alphabetic tokens are treated as crypto and get the
//!    default quote suffix (`SOL` → `SOLUSDT`).
//! 5. Anything else passes through (`GC=F`, `^GSPC`).

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::streaming::AssetClass;

/// Quote currency appended to bare crypto tokens.
pub const DEFAULT_QUOTE_SUFFIX: &str = "USDT";

/// Quote suffixes recognized as "already suffixed", longest first.
pub const KNOWN_QUOTE_SUFFIXES: &[&str] = &["USDT", "USDC", "BUSD", "USD"];

/// Longest bare token treated as a crypto base asset.
const MAX_BARE_TOKEN_LEN: usize = 5;

/// Equity and ETF tickers that must never receive a crypto suffix.
const BUILTIN_EQUITY_TICKERS: &[&str] = &[
    "AAPL", "MSFT", "GOOG", "GOOGL", "AMZN", "META", "NVDA", "TSLA", "AMD", "INTC", "NFLX", "ORCL",
    "IBM", "JPM", "BAC", "WFC", "GS", "MS", "V", "MA", "DIS", "KO", "PEP", "WMT", "COST", "XOM",
    "CVX", "T", "VZ", "F", "GM", "BA", "CAT", "PFE", "MRK", "JNJ", "UNH", "HD", "NKE", "SBUX",
    "COIN", "MSTR", "PLTR", "UBER", "SPY", "QQQ", "IWM", "DIA", "VOO", "VTI", "GLD", "SLV", "USO",
    "TLT", "XLF", "XLE", "XLK", "ARKK",
];

// =============================================================================
// Symbol
// =============================================================================

/// A canonical feed symbol.
///
/// Construct through [`SymbolNormalizer`] or [`Symbol::canonical`]; the
/// inner string is always upper-case and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Wrap an identifier that is already canonical.
    ///
    /// Only trims and upper-cases; returns `None` for blank input.
    #[must_use]
    pub fn canonical(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_ascii_uppercase()))
        }
    }

    /// Borrow the symbol text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Normalizer
// =============================================================================

/// Maps raw consumer identifiers onto canonical feed symbols.
#[derive(Debug, Clone)]
pub struct SymbolNormalizer {
    equity_tickers: HashSet<String>,
}

impl Default for SymbolNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolNormalizer {
    /// Create a normalizer with the built-in equity allow-list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            equity_tickers: BUILTIN_EQUITY_TICKERS
                .iter()
                .map(|t| (*t).to_string())
                .collect(),
        }
    }

    /// Extend the equity allow-list.
    #[must_use]
    pub fn with_equity_tickers<I, S>(mut self, tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.equity_tickers.extend(
            tickers
                .into_iter()
                .map(|t| t.as_ref().trim().to_ascii_uppercase())
                .filter(|t| !t.is_empty()),
        );
        self
    }

    /// Check whether a ticker is on the equity allow-list.
    #[must_use]
    pub fn is_known_equity(&self, ticker: &str) -> bool {
        self.equity_tickers.contains(&ticker.to_ascii_uppercase())
    }

    /// Normalize a raw identifier.
    ///
    /// Returns `None` for blank input.
    #[must_use]
    pub fn normalize(&self, raw: &str) -> Option<Symbol> {
        let upper = raw.trim().to_ascii_uppercase();
        if upper.is_empty() {
            return None;
        }

        if self.equity_tickers.contains(&upper) {
            return Some(Symbol(upper));
        }

        if let Some((base, quote)) = upper.split_once('-')
            && !base.is_empty()
            && KNOWN_QUOTE_SUFFIXES.contains(&quote)
        {
            return Some(Symbol(format!("{base}{quote}")));
        }

        if has_quote_suffix(&upper) {
            return Some(Symbol(upper));
        }

        if upper.len() <= MAX_BARE_TOKEN_LEN && upper.chars().all(|c| c.is_ascii_alphabetic()) {
            return Some(Symbol(format!("{upper}{DEFAULT_QUOTE_SUFFIX}")));
        }

        Some(Symbol(upper))
    }

    /// Normalize with knowledge of the consumer's asset class.
    ///
    /// Only crypto identifiers go through the suffix rules; equities and
    /// commodities are taken verbatim.
    #[must_use]
    pub fn normalize_for(&self, raw: &str, asset_class: AssetClass) -> Option<Symbol> {
        match asset_class {
            AssetClass::Crypto => self.normalize(raw),
            AssetClass::Equity | AssetClass::Commodity => Symbol::canonical(raw),
        }
    }
}

fn has_quote_suffix(symbol: &str) -> bool {
    KNOWN_QUOTE_SUFFIXES
        .iter()
        .any(|suffix| symbol.len() > suffix.len() && symbol.ends_with(suffix))
}

// =============================================================================
// Tests
// =============================================================================

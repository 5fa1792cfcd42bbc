//! Provider traits and structured error types.
//!
//! `ListingProvider` abstracts the ranked market listing (CoinGecko) and
//! `HistoryProvider` the per-symbol daily series (Yahoo Finance), so the
//! pipeline stages can be driven by fakes in tests.

use crate::domain::{AssetListing, PriceBar};
use std::fmt;
use thiserror::Error;

/// Structured error types for upstream provider calls.
///
/// Callers in the pipeline treat every variant as "no data for this unit of
/// work"; the variants exist so logs say why.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("hard stop: provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("HTTP {status} from {provider}")]
    Http { provider: String, status: u16 },

    #[error("client setup failed: {0}")]
    Client(String),
}

/// How far back a history request reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookback {
    Days(u32),
    Years(u32),
    /// Everything the provider has.
    Max,
}

impl fmt::Display for Lookback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookback::Days(d) => write!(f, "{d}d"),
            Lookback::Years(y) => write!(f, "{y}y"),
            Lookback::Max => f.write_str("max"),
        }
    }
}

/// Paginated access to a ranked list of assets with market statistics.
pub trait ListingProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch one page (1-based) of assets ordered by market cap, descending.
    ///
    /// An empty page means the provider has no more assets.
    fn fetch_page(&self, page: u32, per_page: u32) -> Result<Vec<AssetListing>, DataError>;
}

/// Per-symbol daily OHLCV access.
pub trait HistoryProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch daily bars for `symbol` over `lookback`, sorted by date.
    ///
    /// An unknown symbol yields `Ok` with an empty vector, not an error.
    fn fetch_history(&self, symbol: &str, lookback: Lookback) -> Result<Vec<PriceBar>, DataError>;

    /// Check if the provider is currently available (not blocked).
    fn is_available(&self) -> bool {
        true
    }
}

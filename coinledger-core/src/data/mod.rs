//! Upstream providers and the tabular store

pub mod circuit_breaker;
pub mod coingecko;
pub mod provider;
pub mod store;
pub mod yahoo;

pub use circuit_breaker::CircuitBreaker;
pub use coingecko::CoinGeckoProvider;
pub use provider::{DataError, HistoryProvider, ListingProvider, Lookback};
pub use store::{CsvStore, HistoryMeta, StoreError};
pub use yahoo::YahooProvider;

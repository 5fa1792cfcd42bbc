//! Symbol resolution: listing-provider assets → history-provider tickers.
//!
//! The listing provider and the history provider name assets differently.
//! Resolution is split in two so the search order can be tested without a
//! network: `candidate_symbols` produces the ordered ticker guesses and
//! `resolve_symbol` walks them against a probe.

use coinledger_core::data::{HistoryProvider, Lookback};
use coinledger_core::domain::AssetListing;
use std::collections::BTreeMap;
use tracing::debug;

/// Curated ticker overrides keyed by lowercase listing symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolOverrides(BTreeMap<String, String>);

impl SymbolOverrides {
    pub fn new(map: BTreeMap<String, String>) -> Self {
        Self(
            map.into_iter()
                .map(|(symbol, ticker)| (symbol.to_lowercase(), ticker))
                .collect(),
        )
    }

    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Known stablecoin mappings.
    pub fn stablecoins() -> Self {
        Self::new(default_override_map())
    }

    pub fn get(&self, symbol: &str) -> Option<&str> {
        self.0.get(&symbol.to_lowercase()).map(String::as_str)
    }
}

impl Default for SymbolOverrides {
    fn default() -> Self {
        Self::stablecoins()
    }
}

/// Default override table, also used as the config default.
pub fn default_override_map() -> BTreeMap<String, String> {
    ["usdt", "usdc", "busd", "dai", "ust", "mim", "frax"]
        .into_iter()
        .map(|s| (s.to_string(), format!("{}-USD", s.to_uppercase())))
        .collect()
}

/// Ordered ticker candidates for an asset.
///
/// Override first, then `SYM-USD`, `SYMUSD`, `SYM-USDT`, `NAME-USD` (name
/// uppercased, spaces removed), `SYM-EUR`, bare `SYM`. Repeats are dropped,
/// keeping the earliest position.
pub fn candidate_symbols(asset: &AssetListing, overrides: &SymbolOverrides) -> Vec<String> {
    let symbol = asset.symbol.trim().to_uppercase();
    let name = asset.name.to_uppercase().replace(' ', "");

    let mut ordered: Vec<String> = Vec::with_capacity(7);
    if let Some(ticker) = overrides.get(asset.symbol.trim()) {
        ordered.push(ticker.to_string());
    }
    if !symbol.is_empty() {
        ordered.push(format!("{symbol}-USD"));
        ordered.push(format!("{symbol}USD"));
        ordered.push(format!("{symbol}-USDT"));
    }
    if !name.is_empty() {
        ordered.push(format!("{name}-USD"));
    }
    if !symbol.is_empty() {
        ordered.push(format!("{symbol}-EUR"));
        ordered.push(symbol);
    }

    let mut candidates = Vec::with_capacity(ordered.len());
    for ticker in ordered {
        if !candidates.contains(&ticker) {
            candidates.push(ticker);
        }
    }
    candidates
}

/// First candidate the probe accepts, in order. `None` when none do.
pub fn resolve_symbol<F>(candidates: &[String], mut probe: F) -> Option<String>
where
    F: FnMut(&str) -> bool,
{
    candidates.iter().find(|c| probe(c.as_str())).cloned()
}

/// Live probe: a short history query that returns any rows.
///
/// Provider errors count as a failed probe.
pub fn provider_probe<'a>(
    provider: &'a dyn HistoryProvider,
    lookback: Lookback,
) -> impl FnMut(&str) -> bool + 'a {
    move |ticker| match provider.fetch_history(ticker, lookback) {
        Ok(bars) => {
            debug!(ticker, rows = bars.len(), "probe");
            !bars.is_empty()
        }
        Err(e) => {
            debug!(ticker, error = %e, "probe failed");
            false
        }
    }
}

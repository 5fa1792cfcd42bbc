//! Read-only queries over the stored dataset.
//!
//! Serves what a client of the dataset asks for: the full listing, the top N
//! by rank, substring search, single-asset detail and history, and aggregate
//! market statistics. Nothing here writes to the store.

use crate::data::{CsvStore, StoreError};
use crate::domain::{AssetListing, HistoricalRecord};
use serde::Serialize;

/// Asset used for dominance when the caller does not name one.
pub const DEFAULT_REFERENCE_ASSET: &str = "bitcoin";

/// An asset's 24h move, as reported in market statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mover {
    pub name: String,
    pub symbol: String,
    pub change: f64,
}

/// Aggregate statistics over a listing snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketStats {
    pub total_assets: usize,
    pub total_market_cap: f64,
    pub total_volume_24h: f64,
    pub reference_asset: String,
    /// Reference asset's share of total market cap, in percent.
    pub reference_dominance: f64,
    pub top_gainer: Option<Mover>,
    pub top_loser: Option<Mover>,
}

/// Query handle over one listing snapshot (rank order preserved).
#[derive(Debug, Clone, Default)]
pub struct MarketQuery {
    listings: Vec<AssetListing>,
}

impl MarketQuery {
    pub fn new(listings: Vec<AssetListing>) -> Self {
        Self { listings }
    }

    /// Snapshot the store's current listing table.
    pub fn load(store: &CsvStore) -> Result<Self, StoreError> {
        Ok(Self::new(store.load_listings()?))
    }

    pub fn all(&self) -> &[AssetListing] {
        &self.listings
    }

    /// First `n` assets by market-cap rank.
    pub fn top(&self, n: usize) -> &[AssetListing] {
        &self.listings[..n.min(self.listings.len())]
    }

    /// Case-insensitive substring search over name and symbol.
    /// A blank query matches nothing.
    pub fn search(&self, query: &str) -> Vec<&AssetListing> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.listings.iter().filter(|a| a.matches(&needle)).collect()
    }

    pub fn detail(&self, id: &str) -> Option<&AssetListing> {
        self.listings.iter().find(|a| a.id == id)
    }

    pub fn stats(&self, reference_id: &str) -> MarketStats {
        let total_market_cap: f64 = self.listings.iter().filter_map(|a| a.market_cap).sum();
        let total_volume_24h: f64 = self.listings.iter().filter_map(|a| a.total_volume).sum();

        let reference_dominance = match self.detail(reference_id).and_then(|a| a.market_cap) {
            Some(cap) if total_market_cap > 0.0 => cap / total_market_cap * 100.0,
            _ => 0.0,
        };

        MarketStats {
            total_assets: self.listings.len(),
            total_market_cap,
            total_volume_24h,
            reference_asset: reference_id.to_string(),
            reference_dominance,
            top_gainer: self.extreme_mover(|candidate, best| candidate > best),
            top_loser: self.extreme_mover(|candidate, best| candidate < best),
        }
    }

    /// First asset whose 24h change beats every other under `better`.
    fn extreme_mover(&self, better: impl Fn(f64, f64) -> bool) -> Option<Mover> {
        self.listings
            .iter()
            .filter_map(|a| a.price_change_percentage_24h.map(|c| (a, c)))
            .filter(|(_, c)| !c.is_nan())
            .reduce(|best, cand| if better(cand.1, best.1) { cand } else { best })
            .map(|(a, change)| Mover {
                name: a.name.clone(),
                symbol: a.symbol.clone(),
                change,
            })
    }
}

/// Stored history for one asset, exactly as persisted.
pub fn asset_history(
    store: &CsvStore,
    asset_id: &str,
) -> Result<Option<Vec<HistoricalRecord>>, StoreError> {
    store.load_history(asset_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(id: &str, symbol: &str, name: &str, cap: f64, change: Option<f64>) -> AssetListing {
        AssetListing {
            id: id.into(),
            symbol: symbol.into(),
            name: name.into(),
            current_price: Some(1.0),
            market_cap: Some(cap),
            total_volume: Some(cap / 10.0),
            price_change_percentage_24h: change,
        }
    }

    fn sample() -> MarketQuery {
        MarketQuery::new(vec![
            asset("bitcoin", "btc", "Bitcoin", 600.0, Some(1.0)),
            asset("ethereum", "eth", "Ethereum", 300.0, Some(4.5)),
            asset("wrapped-bitcoin", "wbtc", "Wrapped Bitcoin", 80.0, Some(-3.0)),
            asset("tether", "usdt", "Tether", 20.0, None),
        ])
    }

    #[test]
    fn top_n_is_rank_prefix_and_clamped() {
        let q = sample();
        let ids: Vec<_> = q.top(2).iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["bitcoin", "ethereum"]);
        assert_eq!(q.top(50).len(), 4);
    }

    #[test]
    fn search_matches_name_and_symbol_case_insensitively() {
        let q = sample();
        let ids: Vec<_> = q.search("BiTcOiN").iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["bitcoin", "wrapped-bitcoin"]);
        assert_eq!(q.search("usdt").len(), 1);
        assert!(q.search("   ").is_empty());
    }

    #[test]
    fn detail_by_id() {
        let q = sample();
        assert_eq!(q.detail("tether").unwrap().symbol, "usdt");
        assert!(q.detail("dogecoin").is_none());
    }

    #[test]
    fn market_stats_aggregate_and_movers() {
        let stats = sample().stats(DEFAULT_REFERENCE_ASSET);
        assert_eq!(stats.total_assets, 4);
        assert_eq!(stats.total_market_cap, 1000.0);
        assert_eq!(stats.total_volume_24h, 100.0);
        assert!((stats.reference_dominance - 60.0).abs() < 1e-9);
        assert_eq!(stats.top_gainer.unwrap().symbol, "eth");
        assert_eq!(stats.top_loser.unwrap().symbol, "wbtc");
    }

    #[test]
    fn stats_on_empty_snapshot() {
        let stats = MarketQuery::default().stats("bitcoin");
        assert_eq!(stats.total_assets, 0);
        assert_eq!(stats.reference_dominance, 0.0);
        assert!(stats.top_gainer.is_none());
        assert!(stats.top_loser.is_none());
    }

    #[test]
    fn movers_tie_keeps_first_in_rank_order() {
        let q = MarketQuery::new(vec![
            asset("a", "a", "A", 1.0, Some(2.0)),
            asset("b", "b", "B", 1.0, Some(2.0)),
        ]);
        assert_eq!(q.stats("a").top_gainer.unwrap().symbol, "a");
    }
}

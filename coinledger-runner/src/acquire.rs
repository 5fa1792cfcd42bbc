//! Acquisition stage: build the tracked-asset universe.
//!
//! Pages through the listing provider (rank order), filters candidates for
//! basic validity and persists the result as the listing snapshot.
//! Provider failures end pagination early; only store writes are fatal.

use crate::error::StageError;
use crate::pacing::{Pacer, PauseReason};
use coinledger_core::data::{CsvStore, ListingProvider};
use coinledger_core::domain::AssetListing;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Minimums an asset must meet to enter the universe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidityThresholds {
    pub min_market_cap: f64,
    pub min_volume: f64,
}

impl Default for ValidityThresholds {
    fn default() -> Self {
        Self {
            min_market_cap: 100_000.0,
            min_volume: 1_000.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AcquireOptions {
    pub target_count: usize,
    pub page_size: u32,
    pub page_delay: Duration,
    pub thresholds: ValidityThresholds,
    /// Rejected share of candidates above which a quality warning is raised.
    pub quality_warning_ratio: f64,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            target_count: 1000,
            page_size: 250,
            page_delay: Duration::from_secs(1),
            thresholds: ValidityThresholds::default(),
            quality_warning_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    LowMarketCap,
    LowVolume,
    NoPrice,
    DuplicateSymbol,
}

#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    pub accepted: Vec<AssetListing>,
    pub rejected: Vec<(AssetListing, RejectReason)>,
}

/// Validity filter, applied in listing order.
///
/// Absent or NaN values fail their threshold. Symbols are compared
/// lowercase; the first accepted asset for a symbol wins.
pub fn filter_valid(candidates: Vec<AssetListing>, thresholds: &ValidityThresholds) -> FilterOutcome {
    let mut seen: HashSet<String> = HashSet::new();
    let mut outcome = FilterOutcome::default();

    for asset in candidates {
        let reason = if !asset.market_cap.is_some_and(|c| c >= thresholds.min_market_cap) {
            Some(RejectReason::LowMarketCap)
        } else if !asset.total_volume.is_some_and(|v| v >= thresholds.min_volume) {
            Some(RejectReason::LowVolume)
        } else if !asset.current_price.is_some_and(|p| p > 0.0) {
            Some(RejectReason::NoPrice)
        } else if seen.contains(&asset.symbol_key()) {
            Some(RejectReason::DuplicateSymbol)
        } else {
            None
        };

        match reason {
            Some(r) => outcome.rejected.push((asset, r)),
            None => {
                seen.insert(asset.symbol_key());
                outcome.accepted.push(asset);
            }
        }
    }
    outcome
}

/// Collect up to `target_count` candidates, one page at a time.
///
/// Returns the candidates and the number of pages that answered.
pub fn fetch_candidates(
    provider: &dyn ListingProvider,
    opts: &AcquireOptions,
    pacer: &dyn Pacer,
) -> (Vec<AssetListing>, u32) {
    let mut candidates: Vec<AssetListing> = Vec::new();
    let mut pages_fetched = 0u32;
    let mut page = 1u32;

    while candidates.len() < opts.target_count {
        pacer.pause(PauseReason::ListingPage, opts.page_delay);
        match provider.fetch_page(page, opts.page_size) {
            Ok(rows) if rows.is_empty() => {
                info!(page, "listing provider exhausted");
                break;
            }
            Ok(rows) => {
                pages_fetched += 1;
                info!(page, rows = rows.len(), total = candidates.len() + rows.len(), "fetched listing page");
                candidates.extend(rows);
            }
            Err(e) => {
                warn!(provider = provider.name(), page, error = %e, "listing page failed, keeping partial results");
                break;
            }
        }
        page += 1;
    }

    candidates.truncate(opts.target_count);
    (candidates, pages_fetched)
}

#[derive(Debug, Clone)]
pub struct AcquireReport {
    /// Accepted assets, in rank order.
    pub assets: Vec<AssetListing>,
    pub candidates: usize,
    pub rejected: usize,
    pub quality_warning: bool,
    pub pages_fetched: u32,
    pub elapsed: Duration,
}

impl AcquireReport {
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

/// Run the acquisition stage.
///
/// An empty valid set leaves the stored snapshot untouched and returns an
/// empty report.
pub fn acquire(
    provider: &dyn ListingProvider,
    store: &CsvStore,
    opts: &AcquireOptions,
    pacer: &dyn Pacer,
) -> Result<AcquireReport, StageError> {
    let start = Instant::now();
    info!(target_count = opts.target_count, provider = provider.name(), "acquiring asset universe");

    let (candidates, pages_fetched) = fetch_candidates(provider, opts, pacer);
    let candidate_count = candidates.len();
    let outcome = filter_valid(candidates, &opts.thresholds);
    let rejected = outcome.rejected.len();

    let quality_warning =
        candidate_count > 0 && rejected as f64 / candidate_count as f64 > opts.quality_warning_ratio;
    if quality_warning {
        warn!(rejected, candidates = candidate_count, "more than {:.0}% of candidates rejected", opts.quality_warning_ratio * 100.0);
    }

    if outcome.accepted.is_empty() {
        warn!("no valid assets acquired");
    } else {
        store.write_listings(&outcome.accepted)?;
        info!(assets = outcome.accepted.len(), rejected, path = %store.listings_path().display(), "listing snapshot written");
    }

    Ok(AcquireReport {
        assets: outcome.accepted,
        candidates: candidate_count,
        rejected,
        quality_warning,
        pages_fetched,
        elapsed: start.elapsed(),
    })
}

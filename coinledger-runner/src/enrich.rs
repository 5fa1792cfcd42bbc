//! Enrichment stage: fetch and persist daily history per tracked asset.
//!
//! Per asset, in listing order:
//! 1. Skip when the stored history is fresh (no provider call)
//! 2. Resolve a history-provider ticker
//! 3. Fetch the long lookback, falling back to the provider's full range
//! 4. Check sufficiency
//! 5. Overwrite the stored history table
//!
//! Every upstream problem becomes an outcome, never an error. While the
//! history provider reports itself unavailable (circuit breaker open), assets
//! are recorded as `ProviderUnavailable` instead of being probed.

use crate::error::StageError;
use crate::pacing::{Pacer, PauseReason};
use crate::symbols::{candidate_symbols, provider_probe, resolve_symbol, SymbolOverrides};
use chrono::NaiveDate;
use coinledger_core::data::{CsvStore, HistoryProvider, Lookback};
use coinledger_core::domain::{AssetListing, HistoricalRecord, PriceBar};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct EnrichOptions {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub asset_delay: Duration,
    pub skip_if_updated_within_days: i64,
    pub probe_days: u32,
    pub lookback_years: u32,
    pub sufficiency: Sufficiency,
    pub today: NaiveDate,
    pub overrides: SymbolOverrides,
}

impl EnrichOptions {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            batch_size: 5,
            batch_delay: Duration::from_secs(15),
            asset_delay: Duration::from_secs(3),
            skip_if_updated_within_days: 7,
            probe_days: 7,
            lookback_years: 10,
            sufficiency: Sufficiency::default(),
            today,
            overrides: SymbolOverrides::stablecoins(),
        }
    }
}

/// Minimum history for an asset to be kept: enough span OR enough rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sufficiency {
    pub min_span_years: f64,
    pub min_records: usize,
}

impl Default for Sufficiency {
    fn default() -> Self {
        Self {
            min_span_years: 1.0,
            min_records: 100,
        }
    }
}

/// Days between the earliest and latest bar (0 for fewer than two).
pub fn span_days(bars: &[PriceBar]) -> i64 {
    let first = bars.iter().map(|b| b.date).min();
    let last = bars.iter().map(|b| b.date).max();
    match (first, last) {
        (Some(first), Some(last)) => (last - first).num_days(),
        _ => 0,
    }
}

pub fn is_sufficient(bars: &[PriceBar], rule: &Sufficiency) -> bool {
    if bars.is_empty() {
        return false;
    }
    span_days(bars) as f64 / 365.25 >= rule.min_span_years || bars.len() >= rule.min_records
}

/// How one asset's enrichment ended.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichOutcome {
    Success {
        symbol: String,
        records: usize,
        first_date: NaiveDate,
        last_date: NaiveDate,
    },
    NoSymbol,
    NoData {
        symbol: String,
    },
    InsufficientData {
        symbol: String,
        records: usize,
        span_days: i64,
    },
    /// The provider refused requests before this asset could be resolved or fetched.
    ProviderUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrichStatus {
    Success,
    NoSymbol,
    NoData,
    InsufficientData,
    ProviderUnavailable,
}

impl fmt::Display for EnrichStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            EnrichStatus::Success => "SUCCESS",
            EnrichStatus::NoSymbol => "NO_SYMBOL",
            EnrichStatus::NoData => "NO_DATA",
            EnrichStatus::InsufficientData => "INSUFFICIENT_DATA",
            EnrichStatus::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
        })
    }
}

impl EnrichOutcome {
    pub fn status(&self) -> EnrichStatus {
        match self {
            EnrichOutcome::Success { .. } => EnrichStatus::Success,
            EnrichOutcome::NoSymbol => EnrichStatus::NoSymbol,
            EnrichOutcome::NoData { .. } => EnrichStatus::NoData,
            EnrichOutcome::InsufficientData { .. } => EnrichStatus::InsufficientData,
            EnrichOutcome::ProviderUnavailable => EnrichStatus::ProviderUnavailable,
        }
    }

    /// The resolved ticker, when resolution got that far.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            EnrichOutcome::Success { symbol, .. }
            | EnrichOutcome::NoData { symbol }
            | EnrichOutcome::InsufficientData { symbol, .. } => Some(symbol),
            EnrichOutcome::NoSymbol | EnrichOutcome::ProviderUnavailable => None,
        }
    }

    pub fn records(&self) -> usize {
        match self {
            EnrichOutcome::Success { records, .. } | EnrichOutcome::InsufficientData { records, .. } => *records,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichResult {
    pub asset_id: String,
    pub asset_name: String,
    pub outcome: EnrichOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct EnrichReport {
    /// One entry per attempted asset; fresh skips are not listed.
    pub results: Vec<EnrichResult>,
    pub skipped_fresh: usize,
    pub elapsed: Duration,
}

impl EnrichReport {
    fn count(&self, status: EnrichStatus) -> usize {
        self.results.iter().filter(|r| r.outcome.status() == status).count()
    }

    pub fn successful(&self) -> usize {
        self.count(EnrichStatus::Success)
    }

    pub fn no_symbol(&self) -> usize {
        self.count(EnrichStatus::NoSymbol)
    }

    pub fn no_data(&self) -> usize {
        self.count(EnrichStatus::NoData)
    }

    pub fn insufficient(&self) -> usize {
        self.count(EnrichStatus::InsufficientData)
    }

    pub fn unavailable(&self) -> usize {
        self.count(EnrichStatus::ProviderUnavailable)
    }

    /// Rows persisted by successful assets.
    pub fn total_records(&self) -> usize {
        self.results
            .iter()
            .filter_map(|r| match &r.outcome {
                EnrichOutcome::Success { records, .. } => Some(*records),
                _ => None,
            })
            .sum()
    }
}

/// True when the stored history ends within the freshness window.
fn is_fresh(store: &CsvStore, asset_id: &str, opts: &EnrichOptions) -> bool {
    match store.latest_date(asset_id) {
        Ok(Some(last)) => (opts.today - last).num_days() <= opts.skip_if_updated_within_days,
        Ok(None) => false,
        Err(e) => {
            debug!(asset_id, error = %e, "stored history unreadable, treating as stale");
            false
        }
    }
}

/// Long lookback first, then the provider's full range. Errors read as empty.
fn fetch_bars(provider: &dyn HistoryProvider, symbol: &str, lookback_years: u32) -> Vec<PriceBar> {
    for lookback in [Lookback::Years(lookback_years), Lookback::Max] {
        match provider.fetch_history(symbol, lookback) {
            Ok(bars) if !bars.is_empty() => return bars,
            Ok(_) => debug!(symbol, %lookback, "no history in range"),
            Err(e) => warn!(symbol, %lookback, error = %e, "history fetch failed"),
        }
    }
    Vec::new()
}

/// Resolve, fetch, check and persist one asset.
fn enrich_asset(
    provider: &dyn HistoryProvider,
    store: &CsvStore,
    asset: &AssetListing,
    opts: &EnrichOptions,
    pacer: &dyn Pacer,
) -> Result<EnrichOutcome, StageError> {
    let candidates = candidate_symbols(asset, &opts.overrides);
    let Some(symbol) = resolve_symbol(&candidates, provider_probe(provider, Lookback::Days(opts.probe_days)))
    else {
        if !provider.is_available() {
            warn!(asset = %asset.id, "history provider blocked during symbol resolution");
            return Ok(EnrichOutcome::ProviderUnavailable);
        }
        info!(asset = %asset.id, tried = candidates.len(), "no ticker found");
        return Ok(EnrichOutcome::NoSymbol);
    };
    debug!(asset = %asset.id, %symbol, "resolved ticker");

    let bars = fetch_bars(provider, &symbol, opts.lookback_years);
    let outcome = if bars.is_empty() && !provider.is_available() {
        warn!(asset = %asset.id, %symbol, "history provider blocked during fetch");
        Ok(EnrichOutcome::ProviderUnavailable)
    } else {
        persist_if_sufficient(provider, store, asset, symbol, bars, opts)
    };
    pacer.pause(PauseReason::Asset, opts.asset_delay);
    outcome
}

fn persist_if_sufficient(
    provider: &dyn HistoryProvider,
    store: &CsvStore,
    asset: &AssetListing,
    symbol: String,
    mut bars: Vec<PriceBar>,
    opts: &EnrichOptions,
) -> Result<EnrichOutcome, StageError> {
    if bars.is_empty() {
        info!(asset = %asset.id, %symbol, "no history data");
        return Ok(EnrichOutcome::NoData { symbol });
    }

    if !is_sufficient(&bars, &opts.sufficiency) {
        let span = span_days(&bars);
        info!(asset = %asset.id, %symbol, records = bars.len(), span_days = span, "insufficient history");
        return Ok(EnrichOutcome::InsufficientData {
            symbol,
            records: bars.len(),
            span_days: span,
        });
    }

    bars.sort_by_key(|b| b.date);
    let source = format!("{}_{}", provider.name(), Lookback::Years(opts.lookback_years));
    let rows: Vec<HistoricalRecord> = bars.iter().map(|b| HistoricalRecord::from_bar(b, &source)).collect();
    store.overwrite_history(&asset.id, &rows)?;

    let first_date = rows[0].date;
    let last_date = rows[rows.len() - 1].date;
    info!(asset = %asset.id, %symbol, records = rows.len(), %first_date, %last_date, "history stored");
    Ok(EnrichOutcome::Success {
        symbol,
        records: rows.len(),
        first_date,
        last_date,
    })
}

/// Run the enrichment stage over `assets`, in order.
pub fn enrich(
    provider: &dyn HistoryProvider,
    store: &CsvStore,
    assets: &[AssetListing],
    opts: &EnrichOptions,
    pacer: &dyn Pacer,
) -> Result<EnrichReport, StageError> {
    let start = Instant::now();
    let mut report = EnrichReport::default();
    let batch_size = opts.batch_size.max(1);
    let batch_count = assets.len().div_ceil(batch_size);

    info!(assets = assets.len(), batches = batch_count, provider = provider.name(), "enriching assets");

    let mut blocked = false;

    for (batch_idx, batch) in assets.chunks(batch_size).enumerate() {
        debug!(batch = batch_idx + 1, of = batch_count, "starting batch");

        for asset in batch {
            if is_fresh(store, &asset.id, opts) {
                debug!(asset = %asset.id, "history is fresh, skipping");
                report.skipped_fresh += 1;
                continue;
            }

            let outcome = if provider.is_available() {
                blocked = false;
                enrich_asset(provider, store, asset, opts, pacer)?
            } else {
                if !blocked {
                    warn!(
                        provider = provider.name(),
                        "history provider unavailable, remaining assets wait for the next run"
                    );
                    blocked = true;
                }
                EnrichOutcome::ProviderUnavailable
            };
            report.results.push(EnrichResult {
                asset_id: asset.id.clone(),
                asset_name: asset.name.clone(),
                outcome,
            });
        }

        if batch_idx + 1 < batch_count {
            pacer.pause(PauseReason::Batch, opts.batch_delay);
        }
    }

    report.elapsed = start.elapsed();
    info!(
        successful = report.successful(),
        no_symbol = report.no_symbol(),
        no_data = report.no_data(),
        insufficient = report.insufficient(),
        unavailable = report.unavailable(),
        skipped_fresh = report.skipped_fresh,
        records = report.total_records(),
        "enrichment finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars_on(dates: &[NaiveDate]) -> Vec<PriceBar> {
        dates
            .iter()
            .map(|&date| PriceBar {
                date,
                open: Some(1.0),
                high: Some(1.0),
                low: Some(1.0),
                close: Some(1.0),
                volume: Some(1.0),
            })
            .collect()
    }

    fn daily(start: NaiveDate, n: usize) -> Vec<PriceBar> {
        let dates: Vec<_> = start.iter_days().take(n).collect();
        bars_on(&dates)
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn long_span_with_few_rows_is_sufficient() {
        let bars = bars_on(&[d(2020, 1, 1), d(2020, 6, 1), d(2021, 1, 1)]);
        assert_eq!(span_days(&bars), 366);
        assert!(is_sufficient(&bars, &Sufficiency::default()));
    }

    #[test]
    fn many_rows_in_short_span_is_sufficient() {
        let mut bars = daily(d(2024, 1, 1), 40);
        let extra: Vec<_> = bars.iter().cycle().take(110).cloned().collect();
        bars.extend(extra);
        assert_eq!(bars.len(), 150);
        assert!(is_sufficient(&bars, &Sufficiency::default()));
    }

    #[test]
    fn few_rows_in_short_span_is_insufficient() {
        let mut bars = daily(d(2024, 1, 1), 40);
        bars.extend(daily(d(2024, 1, 1), 10));
        assert_eq!(bars.len(), 50);
        assert!(!is_sufficient(&bars, &Sufficiency::default()));
    }

    #[test]
    fn empty_is_never_sufficient() {
        assert!(!is_sufficient(&[], &Sufficiency { min_span_years: 0.0, min_records: 0 }));
        assert_eq!(span_days(&[]), 0);
    }

    #[test]
    fn status_labels() {
        assert_eq!(EnrichOutcome::NoSymbol.status().to_string(), "NO_SYMBOL");
        let insufficient = EnrichOutcome::InsufficientData { symbol: "X-USD".into(), records: 3, span_days: 2 };
        assert_eq!(insufficient.status().to_string(), "INSUFFICIENT_DATA");
        assert_eq!(insufficient.symbol(), Some("X-USD"));
        assert_eq!(insufficient.records(), 3);
        assert_eq!(EnrichOutcome::ProviderUnavailable.status().to_string(), "PROVIDER_UNAVAILABLE");
        assert_eq!(EnrichOutcome::ProviderUnavailable.symbol(), None);
    }

    #[test]
    fn report_counts_by_status() {
        let result = |id: &str, outcome| EnrichResult { asset_id: id.into(), asset_name: id.into(), outcome };
        let report = EnrichReport {
            results: vec![
                result(
                    "a",
                    EnrichOutcome::Success { symbol: "A-USD".into(), records: 10, first_date: d(2020, 1, 1), last_date: d(2020, 1, 10) },
                ),
                result(
                    "b",
                    EnrichOutcome::Success { symbol: "B-USD".into(), records: 5, first_date: d(2020, 1, 1), last_date: d(2020, 1, 5) },
                ),
                result("c", EnrichOutcome::NoSymbol),
                result("d", EnrichOutcome::NoData { symbol: "D-USD".into() }),
            ],
            skipped_fresh: 2,
            elapsed: Duration::ZERO,
        };
        assert_eq!(report.successful(), 2);
        assert_eq!(report.no_symbol(), 1);
        assert_eq!(report.no_data(), 1);
        assert_eq!(report.insufficient(), 0);
        assert_eq!(report.total_records(), 15);
    }
}

//! Normalization stage: gap detection, cleaning and summary statistics.
//!
//! Works only on stored history tables. Each asset gets a gap scan, a
//! cleaned rewrite of its table and a statistics row; all rows land in one
//! report table that is replaced every run. Missing dates are reported, not
//! filled.

use crate::error::StageError;
use chrono::{Days, NaiveDate};
use coinledger_core::data::CsvStore;
use coinledger_core::domain::{AssetListing, HistoricalRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest synthetic window accepted; longer settings are clamped.
pub const MAX_EVALUATION_WINDOW_YEARS: u32 = 100;

#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Length of the synthetic window used when history can't be characterized.
    pub evaluation_window_years: u32,
    /// Shortest actual span that is scanned on its own range.
    pub min_characterized_years: f64,
    /// Record count a history must exceed to rate as good quality.
    pub good_quality_min_records: usize,
    pub today: NaiveDate,
}

impl NormalizeOptions {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            evaluation_window_years: 10,
            min_characterized_years: 8.0,
            good_quality_min_records: 100,
            today,
        }
    }
}

// ── Gap detection ───────────────────────────────────────────────────

/// Missing calendar days within an evaluation window.
#[derive(Debug, Clone, PartialEq)]
pub struct GapScan {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    /// Ascending, no duplicates.
    pub missing: Vec<NaiveDate>,
    /// True when the window is the fixed fallback, not the data's own range.
    pub synthetic: bool,
}

impl GapScan {
    pub fn missing_count(&self) -> usize {
        self.missing.len()
    }
}

/// `[today - 365 * years days, today]`, every day missing.
///
/// Years are clamped to [`MAX_EVALUATION_WINDOW_YEARS`]; a start before the
/// calendar's range is clamped to its first day.
pub fn synthetic_window(opts: &NormalizeOptions) -> GapScan {
    let window_end = opts.today;
    let years = opts.evaluation_window_years.min(MAX_EVALUATION_WINDOW_YEARS);
    let window_start = window_end
        .checked_sub_days(Days::new(365 * u64::from(years)))
        .unwrap_or(NaiveDate::MIN);
    GapScan {
        window_start,
        window_end,
        missing: window_start.iter_days().take_while(|d| *d <= window_end).collect(),
        synthetic: true,
    }
}

/// Every date in `[start, end]` absent from `present`.
pub fn missing_dates(start: NaiveDate, end: NaiveDate, present: &BTreeSet<NaiveDate>) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| !present.contains(d))
        .collect()
}

/// Scan an asset's stored rows for missing days.
///
/// `None` or empty rows, or a span shorter than `min_characterized_years`,
/// fall back to the synthetic window.
pub fn detect_gaps(rows: Option<&[HistoricalRecord]>, opts: &NormalizeOptions) -> GapScan {
    let present: BTreeSet<NaiveDate> = rows.unwrap_or_default().iter().map(|r| r.date).collect();
    let (Some(&first), Some(&last)) = (present.first(), present.last()) else {
        return synthetic_window(opts);
    };

    let span_years = (last - first).num_days() as f64 / 365.25;
    if span_years < opts.min_characterized_years {
        return synthetic_window(opts);
    }

    GapScan {
        window_start: first,
        window_end: last,
        missing: missing_dates(first, last, &present),
        synthetic: false,
    }
}

// ── Cleaning ────────────────────────────────────────────────────────

/// Unify price, sort by date, keep the last row per date, drop unpriced rows.
pub fn clean_history(rows: Vec<HistoricalRecord>) -> Vec<HistoricalRecord> {
    let mut by_date: BTreeMap<NaiveDate, HistoricalRecord> = BTreeMap::new();
    for mut row in rows {
        row.price = row.unified_price();
        by_date.insert(row.date, row);
    }
    by_date
        .into_values()
        .filter(|r| r.price.is_some_and(|p| p > 0.0))
        .collect()
}

// ── Statistics ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataQuality {
    Good,
    Insufficient,
}

impl fmt::Display for DataQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            DataQuality::Good => "GOOD",
            DataQuality::Insufficient => "INSUFFICIENT",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryStats {
    pub records: usize,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub price_min: f64,
    pub price_max: f64,
    pub price_mean: f64,
    /// Mean `high - low`, when every row has full OHLC.
    pub avg_daily_range: Option<f64>,
    /// Sample standard deviation of `high - low`; needs two or more rows.
    pub daily_range_std: Option<f64>,
    pub quality: DataQuality,
}

impl HistoryStats {
    pub fn date_range(&self) -> String {
        format!("{} to {}", self.first_date, self.last_date)
    }
}

/// Summary statistics over cleaned rows. `None` when nothing is priced.
pub fn compute_stats(rows: &[HistoricalRecord], opts: &NormalizeOptions) -> Option<HistoryStats> {
    let prices: Vec<f64> = rows.iter().filter_map(|r| r.unified_price()).collect();
    if prices.is_empty() {
        return None;
    }
    let first_date = rows.iter().map(|r| r.date).min()?;
    let last_date = rows.iter().map(|r| r.date).max()?;

    let price_min = prices.iter().copied().fold(f64::INFINITY, f64::min);
    let price_max = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let price_mean = prices.iter().sum::<f64>() / prices.len() as f64;

    let (avg_daily_range, daily_range_std) = if rows.iter().all(HistoricalRecord::has_full_ohlc) {
        let ranges: Vec<f64> = rows.iter().filter_map(HistoricalRecord::daily_range).collect();
        (mean(&ranges), sample_std(&ranges))
    } else {
        (None, None)
    };

    let quality = if rows.len() > opts.good_quality_min_records {
        DataQuality::Good
    } else {
        DataQuality::Insufficient
    };

    Some(HistoryStats {
        records: rows.len(),
        first_date,
        last_date,
        price_min,
        price_max,
        price_mean,
        avg_daily_range,
        daily_range_std,
        quality,
    })
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

// ── Stage ───────────────────────────────────────────────────────────

/// Everything normalization learned about one asset.
#[derive(Debug, Clone, PartialEq)]
pub struct GapReport {
    pub asset_id: String,
    pub asset_name: String,
    pub gaps: GapScan,
    pub cleaned: bool,
    pub stats: Option<HistoryStats>,
}

/// One row of the stored normalization report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub asset_id: String,
    pub asset_name: String,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub missing_dates: usize,
    pub synthetic_window: bool,
    pub cleaned: bool,
    pub total_records: Option<usize>,
    pub date_range: Option<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub price_mean: Option<f64>,
    pub avg_daily_range: Option<f64>,
    pub daily_range_std: Option<f64>,
    /// `GOOD`, `INSUFFICIENT`, or `UNKNOWN` when no stats were computed.
    pub data_quality: String,
}

impl From<&GapReport> for ReportRow {
    fn from(r: &GapReport) -> Self {
        let stats = r.stats.as_ref();
        Self {
            asset_id: r.asset_id.clone(),
            asset_name: r.asset_name.clone(),
            window_start: r.gaps.window_start,
            window_end: r.gaps.window_end,
            missing_dates: r.gaps.missing_count(),
            synthetic_window: r.gaps.synthetic,
            cleaned: r.cleaned,
            total_records: stats.map(|s| s.records),
            date_range: stats.map(HistoryStats::date_range),
            price_min: stats.map(|s| s.price_min),
            price_max: stats.map(|s| s.price_max),
            price_mean: stats.map(|s| s.price_mean),
            avg_daily_range: stats.and_then(|s| s.avg_daily_range),
            daily_range_std: stats.and_then(|s| s.daily_range_std),
            data_quality: stats.map_or_else(|| "UNKNOWN".to_string(), |s| s.quality.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NormalizeReport {
    pub assets: Vec<GapReport>,
    pub elapsed: Duration,
}

impl NormalizeReport {
    pub fn processed(&self) -> usize {
        self.assets.len()
    }

    pub fn cleaned(&self) -> usize {
        self.assets.iter().filter(|a| a.cleaned).count()
    }

    pub fn good_quality(&self) -> usize {
        self.assets
            .iter()
            .filter(|a| a.stats.as_ref().is_some_and(|s| s.quality == DataQuality::Good))
            .count()
    }

    pub fn rows(&self) -> Vec<ReportRow> {
        self.assets.iter().map(ReportRow::from).collect()
    }
}

fn normalize_asset(store: &CsvStore, asset: &AssetListing, opts: &NormalizeOptions) -> GapReport {
    let rows = match store.load_history(&asset.id) {
        Ok(rows) => rows,
        Err(e) => {
            warn!(asset = %asset.id, error = %e, "history unreadable");
            None
        }
    };

    let gaps = detect_gaps(rows.as_deref(), opts);
    if !gaps.missing.is_empty() {
        debug!(asset = %asset.id, missing = gaps.missing_count(), synthetic = gaps.synthetic, "gaps detected");
    }

    let (cleaned, stats) = match rows {
        Some(rows) if !rows.is_empty() => {
            let clean = clean_history(rows);
            let stats = compute_stats(&clean, opts);
            let written = match store.overwrite_history(&asset.id, &clean) {
                Ok(()) => true,
                Err(e) => {
                    warn!(asset = %asset.id, error = %e, "failed to write cleaned history");
                    false
                }
            };
            (written, stats)
        }
        _ => {
            debug!(asset = %asset.id, "no stored history to clean");
            (false, None)
        }
    };

    GapReport {
        asset_id: asset.id.clone(),
        asset_name: asset.name.clone(),
        gaps,
        cleaned,
        stats,
    }
}

/// Run the normalization stage over `assets` and replace the report table.
pub fn normalize(
    store: &CsvStore,
    assets: &[AssetListing],
    opts: &NormalizeOptions,
) -> Result<NormalizeReport, StageError> {
    let start = Instant::now();
    info!(assets = assets.len(), "normalizing stored history");

    let mut report = NormalizeReport {
        assets: assets.iter().map(|a| normalize_asset(store, a, opts)).collect(),
        elapsed: Duration::ZERO,
    };

    store.write_report(&report.rows())?;
    report.elapsed = start.elapsed();
    info!(
        processed = report.processed(),
        cleaned = report.cleaned(),
        good_quality = report.good_quality(),
        path = %store.report_path().display(),
        "normalization report written"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn row(date: NaiveDate, close: Option<f64>) -> HistoricalRecord {
        HistoricalRecord {
            date,
            open: close,
            high: close.map(|c| c + 2.0),
            low: close.map(|c| c - 1.0),
            close,
            volume: Some(10.0),
            price: None,
            source: "test".into(),
        }
    }

    fn opts() -> NormalizeOptions {
        NormalizeOptions::new(d(2024, 6, 1))
    }

    #[test]
    fn synthetic_window_is_inclusive() {
        let scan = synthetic_window(&opts());
        assert_eq!(scan.window_end, d(2024, 6, 1));
        assert_eq!(scan.window_start, d(2024, 6, 1) - Days::new(3650));
        assert_eq!(scan.missing_count(), 3651);
        assert!(scan.synthetic);
    }

    #[test]
    fn oversized_window_is_clamped() {
        let huge = NormalizeOptions {
            evaluation_window_years: 4_000_000,
            ..opts()
        };
        let scan = synthetic_window(&huge);
        assert_eq!(scan.window_start, d(2024, 6, 1) - Days::new(365 * 100));
        assert_eq!(scan.missing_count(), 36_501);
    }

    #[test]
    fn window_reaching_before_the_calendar_starts_at_its_first_day() {
        let early = NormalizeOptions::new(NaiveDate::MIN + Days::new(30));
        let scan = synthetic_window(&early);
        assert_eq!(scan.window_start, NaiveDate::MIN);
        assert_eq!(scan.missing_count(), 31);
    }

    #[test]
    fn absent_and_short_histories_use_synthetic_window() {
        assert!(detect_gaps(None, &opts()).synthetic);
        assert!(detect_gaps(Some(&[]), &opts()).synthetic);
        let short: Vec<_> = d(2020, 1, 1).iter_days().take(400).map(|x| row(x, Some(1.0))).collect();
        let scan = detect_gaps(Some(&short), &opts());
        assert!(scan.synthetic);
        assert_eq!(scan.window_end, d(2024, 6, 1));
    }

    #[test]
    fn missing_dates_within_range() {
        let present: BTreeSet<_> = [d(2024, 1, 1), d(2024, 1, 4)].into_iter().collect();
        assert_eq!(
            missing_dates(d(2024, 1, 1), d(2024, 1, 4), &present),
            vec![d(2024, 1, 2), d(2024, 1, 3)]
        );
    }

    #[test]
    fn clean_unifies_sorts_and_dedupes_keeping_last() {
        let rows = vec![
            row(d(2024, 1, 3), Some(3.0)),
            row(d(2024, 1, 1), Some(1.0)),
            row(d(2024, 1, 3), Some(30.0)),
            row(d(2024, 1, 2), None),
            row(d(2024, 1, 4), Some(0.0)),
        ];
        let clean = clean_history(rows);
        let got: Vec<_> = clean.iter().map(|r| (r.date, r.price)).collect();
        assert_eq!(got, vec![(d(2024, 1, 1), Some(1.0)), (d(2024, 1, 3), Some(30.0))]);
    }

    #[test]
    fn clean_prefers_existing_price_over_close() {
        let mut r = row(d(2024, 1, 1), Some(5.0));
        r.price = Some(7.0);
        assert_eq!(clean_history(vec![r])[0].price, Some(7.0));
    }

    #[test]
    fn stats_over_full_ohlc() {
        let rows = clean_history(vec![
            row(d(2024, 1, 1), Some(10.0)),
            row(d(2024, 1, 2), Some(20.0)),
            row(d(2024, 1, 3), Some(30.0)),
        ]);
        let s = compute_stats(&rows, &opts()).unwrap();
        assert_eq!(s.records, 3);
        assert_eq!(s.date_range(), "2024-01-01 to 2024-01-03");
        assert_eq!((s.price_min, s.price_max, s.price_mean), (10.0, 30.0, 20.0));
        assert_eq!(s.avg_daily_range, Some(3.0));
        assert_eq!(s.daily_range_std, Some(0.0));
        assert_eq!(s.quality, DataQuality::Insufficient);
    }

    #[test]
    fn single_row_has_no_std() {
        let rows = clean_history(vec![row(d(2024, 1, 1), Some(10.0))]);
        let s = compute_stats(&rows, &opts()).unwrap();
        assert_eq!(s.avg_daily_range, Some(3.0));
        assert_eq!(s.daily_range_std, None);
    }

    #[test]
    fn partial_ohlc_skips_range_stats() {
        let mut r = row(d(2024, 1, 2), Some(4.0));
        r.open = None;
        let rows = clean_history(vec![row(d(2024, 1, 1), Some(2.0)), r]);
        let s = compute_stats(&rows, &opts()).unwrap();
        assert_eq!(s.avg_daily_range, None);
        assert_eq!(s.daily_range_std, None);
    }

    #[test]
    fn quality_needs_more_than_threshold() {
        let make = |n| -> Vec<HistoricalRecord> {
            d(2020, 1, 1).iter_days().take(n).map(|x| row(x, Some(1.0))).collect()
        };
        assert_eq!(compute_stats(&make(100), &opts()).unwrap().quality, DataQuality::Insufficient);
        assert_eq!(compute_stats(&make(101), &opts()).unwrap().quality, DataQuality::Good);
    }

    #[test]
    fn sample_std_uses_n_minus_one() {
        let s = sample_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((s - 2.138_089_935).abs() < 1e-6);
    }

    #[test]
    fn report_row_without_stats_is_unknown() {
        let report = GapReport {
            asset_id: "x".into(),
            asset_name: "X".into(),
            gaps: synthetic_window(&opts()),
            cleaned: false,
            stats: None,
        };
        let row = ReportRow::from(&report);
        assert_eq!(row.data_quality, "UNKNOWN");
        assert_eq!(row.missing_dates, 3651);
        assert!(row.total_records.is_none());
    }
}

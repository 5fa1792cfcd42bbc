//! Daily price rows: provider-side bars and stored history records.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Raw daily OHLCV bar from the history provider (before persistence).
///
/// Every value is optional: the provider emits `null` for days it has a
/// timestamp for but no trade data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

/// One stored row of an asset's history table.
///
/// `price` is the unified price column. Enrichment writes it empty;
/// normalization fills it from `close`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRecord {
    pub date: NaiveDate,
    #[serde(default)]
    pub open: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub close: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub source: String,
}

impl HistoricalRecord {
    pub fn from_bar(bar: &PriceBar, source: &str) -> Self {
        Self {
            date: bar.date,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            price: None,
            source: source.to_string(),
        }
    }

    /// `price` when set, otherwise `close`.
    pub fn unified_price(&self) -> Option<f64> {
        self.price.or(self.close)
    }

    /// True when open, high, low and close are all present and finite.
    pub fn has_full_ohlc(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|v| v.is_some_and(f64::is_finite))
    }

    /// Daily range `high - low`, when both are known.
    pub fn daily_range(&self) -> Option<f64> {
        Some(self.high? - self.low?)
    }
}

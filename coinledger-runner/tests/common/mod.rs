//! Shared fakes for the runner's integration tests.
//!
//! Fake providers serve canned data and log every call; the recording
//! pacer captures the pause schedule instead of sleeping.

#![allow(dead_code)]

use chrono::NaiveDate;
use coinledger_core::data::{DataError, HistoryProvider, ListingProvider, Lookback};
use coinledger_core::domain::{AssetListing, PriceBar};
use coinledger_runner::{Pacer, PauseReason};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn listing(id: &str, symbol: &str, market_cap: f64, volume: f64) -> AssetListing {
    AssetListing {
        id: id.to_string(),
        symbol: symbol.to_string(),
        name: id.replace('-', " "),
        current_price: Some(1.5),
        market_cap: Some(market_cap),
        total_volume: Some(volume),
        price_change_percentage_24h: Some(0.0),
    }
}

/// `n` consecutive daily bars from `start`, close rising by one per day.
pub fn daily_bars(start: NaiveDate, n: usize) -> Vec<PriceBar> {
    start
        .iter_days()
        .take(n)
        .enumerate()
        .map(|(i, date)| {
            let close = 100.0 + i as f64;
            PriceBar {
                date,
                open: Some(close - 0.5),
                high: Some(close + 1.0),
                low: Some(close - 1.0),
                close: Some(close),
                volume: Some(1_000.0),
            }
        })
        .collect()
}

// ── Listing provider ────────────────────────────────────────────────

/// Serves fixed pages; `fail_on_page` answers that page with an error.
pub struct FakeListing {
    pages: Vec<Vec<AssetListing>>,
    fail_on_page: Option<u32>,
    pub calls: Mutex<Vec<(u32, u32)>>,
}

impl FakeListing {
    pub fn new(pages: Vec<Vec<AssetListing>>) -> Self {
        Self {
            pages,
            fail_on_page: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// All listings split into pages of `per_page`.
    pub fn paged(all: Vec<AssetListing>, per_page: usize) -> Self {
        Self::new(all.chunks(per_page).map(<[AssetListing]>::to_vec).collect())
    }

    pub fn failing_on(mut self, page: u32) -> Self {
        self.fail_on_page = Some(page);
        self
    }

    pub fn pages_requested(&self) -> Vec<u32> {
        self.calls.lock().unwrap().iter().map(|(p, _)| *p).collect()
    }
}

impl ListingProvider for FakeListing {
    fn name(&self) -> &str {
        "fake_listing"
    }

    fn fetch_page(&self, page: u32, per_page: u32) -> Result<Vec<AssetListing>, DataError> {
        self.calls.lock().unwrap().push((page, per_page));
        if self.fail_on_page == Some(page) {
            return Err(DataError::NetworkUnreachable("connection reset".into()));
        }
        Ok(self
            .pages
            .get(page as usize - 1)
            .cloned()
            .unwrap_or_default())
    }
}

// ── History provider ────────────────────────────────────────────────

/// Serves bars per ticker. Tickers in `max_only` answer only `Lookback::Max`,
/// tickers in `probe_only` answer only short probes, tickers in `failing`
/// always error. With `blocked_after`, the provider reports itself
/// unavailable and refuses every request once that many calls were made.
#[derive(Default)]
pub struct FakeHistory {
    series: HashMap<String, Vec<PriceBar>>,
    max_only: HashSet<String>,
    probe_only: HashSet<String>,
    failing: HashSet<String>,
    blocked_after: Option<usize>,
    pub calls: Mutex<Vec<(String, Lookback)>>,
}

impl FakeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, ticker: &str, bars: Vec<PriceBar>) -> Self {
        self.series.insert(ticker.to_string(), bars);
        self
    }

    pub fn with_max_only(mut self, ticker: &str, bars: Vec<PriceBar>) -> Self {
        self.max_only.insert(ticker.to_string());
        self.with(ticker, bars)
    }

    pub fn with_probe_only(mut self, ticker: &str, bars: Vec<PriceBar>) -> Self {
        self.probe_only.insert(ticker.to_string());
        self.with(ticker, bars)
    }

    pub fn failing(mut self, ticker: &str) -> Self {
        self.failing.insert(ticker.to_string());
        self
    }

    pub fn blocked_after(mut self, calls: usize) -> Self {
        self.blocked_after = Some(calls);
        self
    }

    pub fn call_log(&self) -> Vec<(String, Lookback)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tickers_requested(&self) -> Vec<String> {
        self.call_log().into_iter().map(|(t, _)| t).collect()
    }
}

impl HistoryProvider for FakeHistory {
    fn name(&self) -> &str {
        "fake_history"
    }

    fn fetch_history(&self, symbol: &str, lookback: Lookback) -> Result<Vec<PriceBar>, DataError> {
        if !self.is_available() {
            return Err(DataError::CircuitBreakerTripped);
        }
        self.calls.lock().unwrap().push((symbol.to_string(), lookback));
        if self.failing.contains(symbol) {
            return Err(DataError::Http {
                provider: "fake_history".into(),
                status: 500,
            });
        }
        let Some(bars) = self.series.get(symbol) else {
            return Ok(Vec::new());
        };
        if self.max_only.contains(symbol) && matches!(lookback, Lookback::Years(_)) {
            return Ok(Vec::new());
        }
        if self.probe_only.contains(symbol) && !matches!(lookback, Lookback::Days(_)) {
            return Ok(Vec::new());
        }
        Ok(match lookback {
            Lookback::Days(n) => bars.iter().rev().take(n as usize).rev().cloned().collect(),
            _ => bars.clone(),
        })
    }

    fn is_available(&self) -> bool {
        self.blocked_after
            .map_or(true, |limit| self.calls.lock().unwrap().len() < limit)
    }
}

// ── Pacer ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingPacer {
    pub pauses: RefCell<Vec<(PauseReason, Duration)>>,
}

impl RecordingPacer {
    pub fn count(&self, reason: PauseReason) -> usize {
        self.pauses.borrow().iter().filter(|(r, _)| *r == reason).count()
    }

    pub fn reasons(&self) -> Vec<PauseReason> {
        self.pauses.borrow().iter().map(|(r, _)| *r).collect()
    }
}

impl Pacer for RecordingPacer {
    fn pause(&self, reason: PauseReason, duration: Duration) {
        self.pauses.borrow_mut().push((reason, duration));
    }
}

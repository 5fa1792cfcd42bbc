//! Yahoo Finance history provider.
//!
//! Fetches daily OHLCV bars from Yahoo's v8 chart API using a `range`
//! lookback (`7d`, `10y`, `max`). Unknown tickers come back as 404 or as a
//! `"Not Found"` chart error; both are reported as an empty series because
//! symbol resolution relies on emptiness to reject a candidate.
//!
//! Yahoo Finance has no official API and is subject to unannounced format
//! changes. There is no retry loop here: a failed request is "no data" for
//! the caller and the next pipeline run tries again.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{DataError, HistoryProvider, Lookback};
use crate::domain::PriceBar;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

/// Yahoo Finance history provider.
pub struct YahooProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    base_url: String,
}

impl YahooProvider {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>, timeout: Duration) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| DataError::Client(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point the client at another chart endpoint (mirrors, local stubs).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn chart_url(&self, symbol: &str, lookback: Lookback) -> String {
        format!(
            "{}/{symbol}?range={lookback}&interval=1d&includeAdjustedClose=false",
            self.base_url
        )
    }

    /// Parse the chart API response into bars.
    fn parse_response(symbol: &str, resp: ChartResponse) -> Result<Vec<PriceBar>, DataError> {
        let Some(results) = resp.chart.result else {
            return match resp.chart.error {
                Some(err) if err.code == "Not Found" => Ok(Vec::new()),
                Some(err) => Err(DataError::ResponseFormatChanged(format!(
                    "{}: {}",
                    err.code,
                    err.description.unwrap_or_default()
                ))),
                None => Err(DataError::ResponseFormatChanged(format!(
                    "empty result with no error for {symbol}"
                ))),
            };
        };

        let Some(data) = results.into_iter().next() else {
            return Ok(Vec::new());
        };

        // No timestamps: the ticker exists but has no rows in the range.
        let Some(timestamps) = data.timestamp else {
            return Ok(Vec::new());
        };

        let quote = data.indicators.quote.into_iter().next().ok_or_else(|| {
            DataError::ResponseFormatChanged(format!("no quote data for {symbol}"))
        })?;

        let mut bars = Vec::with_capacity(timestamps.len());

        for (i, &ts) in timestamps.iter().enumerate() {
            let date = chrono::DateTime::from_timestamp(ts, 0)
                .map(|dt| dt.date_naive())
                .ok_or_else(|| {
                    DataError::ResponseFormatChanged(format!("invalid timestamp: {ts}"))
                })?;

            let bar = PriceBar {
                date,
                open: quote.open.get(i).copied().flatten(),
                high: quote.high.get(i).copied().flatten(),
                low: quote.low.get(i).copied().flatten(),
                close: quote.close.get(i).copied().flatten(),
                volume: quote.volume.get(i).copied().flatten(),
            };

            // Timestamps with no values at all carry nothing worth storing
            if bar.open.is_none()
                && bar.high.is_none()
                && bar.low.is_none()
                && bar.close.is_none()
                && bar.volume.is_none()
            {
                continue;
            }

            bars.push(bar);
        }

        Ok(bars)
    }
}

impl HistoryProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch_history(&self, symbol: &str, lookback: Lookback) -> Result<Vec<PriceBar>, DataError> {
        if !self.is_available() {
            return Err(DataError::CircuitBreakerTripped);
        }

        let url = self.chart_url(symbol, lookback);
        debug!(%symbol, %lookback, "requesting chart");

        let resp = self.client.get(&url).send().map_err(|e| {
            self.circuit_breaker.record_failure();
            DataError::NetworkUnreachable(e.to_string())
        })?;
        let status = resp.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            self.circuit_breaker.record_success();
            return Ok(Vec::new());
        }

        if status == reqwest::StatusCode::FORBIDDEN {
            self.circuit_breaker.trip();
            return Err(DataError::CircuitBreakerTripped);
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            self.circuit_breaker.record_failure();
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(DataError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !status.is_success() {
            self.circuit_breaker.record_failure();
            return Err(DataError::Http {
                provider: self.name().to_string(),
                status: status.as_u16(),
            });
        }

        let parsed = resp
            .json::<ChartResponse>()
            .map_err(|e| {
                DataError::ResponseFormatChanged(format!("failed to parse response for {symbol}: {e}"))
            })
            .and_then(|chart| Self::parse_response(symbol, chart));

        match parsed {
            Ok(bars) => {
                self.circuit_breaker.record_success();
                Ok(bars)
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                Err(e)
            }
        }
    }

    fn is_available(&self) -> bool {
        let allowed = self.circuit_breaker.is_allowed();
        if !allowed {
            debug!(
                cooldown_secs = self.circuit_breaker.remaining_cooldown().as_secs(),
                "history provider blocked"
            );
        }
        allowed
    }
}

//! CoinGecko market-listing provider.
//!
//! Pages through `/coins/markets` in USD, ordered by market cap descending,
//! without sparklines. Only the fields of `AssetListing` are kept; the rest
//! of each market object is ignored during deserialization.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{DataError, ListingProvider};
use crate::domain::AssetListing;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// CoinGecko listing client.
pub struct CoinGeckoProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    base_url: String,
}

impl CoinGeckoProvider {
    pub fn new(
        base_url: &str,
        circuit_breaker: Arc<CircuitBreaker>,
        timeout: Duration,
    ) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("coinledger/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DataError::Client(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    fn markets_url(&self) -> String {
        format!("{}/coins/markets", self.base_url)
    }

    fn query(page: u32, per_page: u32) -> [(&'static str, String); 5] {
        [
            ("vs_currency", "usd".to_string()),
            ("order", "market_cap_desc".to_string()),
            ("per_page", per_page.to_string()),
            ("page", page.to_string()),
            ("sparkline", "false".to_string()),
        ]
    }

    fn parse_page(body: &str) -> Result<Vec<AssetListing>, DataError> {
        serde_json::from_str(body)
            .map_err(|e| DataError::ResponseFormatChanged(format!("markets page: {e}")))
    }
}

impl ListingProvider for CoinGeckoProvider {
    fn name(&self) -> &str {
        "coingecko"
    }

    fn fetch_page(&self, page: u32, per_page: u32) -> Result<Vec<AssetListing>, DataError> {
        if !self.circuit_breaker.is_allowed() {
            debug!(
                cooldown_secs = self.circuit_breaker.remaining_cooldown().as_secs(),
                "listing provider blocked"
            );
            return Err(DataError::CircuitBreakerTripped);
        }

        debug!(page, per_page, "requesting markets page");
        let resp = self
            .client
            .get(self.markets_url())
            .query(&Self::query(page, per_page))
            .send()
            .map_err(|e| {
                self.circuit_breaker.record_failure();
                DataError::NetworkUnreachable(e.to_string())
            })?;
        let status = resp.status();

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
            .text()
            .map_err(|e| DataError::NetworkUnreachable(format!("read body: {e}")))
            .and_then(|body| Self::parse_page(&body));

        match parsed {
            Ok(listings) => {
                self.circuit_breaker.record_success();
                Ok(listings)
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                Err(e)
            }
        }
    }
}

// =============================================================================
// Metrics-provider client — CoinGecko-compatible /coins/markets endpoint
// =============================================================================
//
// Fetches market-cap rankings in pages of at most 250 entries. A 429 on any
// page sleeps for the configured window and retries that page exactly once;
// a second failure (or any other non-2xx) stops the paging loop and returns
// what was collected so far.
// =============================================================================

use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::IngestError;

/// Hard upstream cap on entries per page.
const PER_PAGE_MAX: u32 = 250;

/// One entry of the /coins/markets response.
#[derive(Debug, Clone, Deserialize)]
pub struct CoinMarket {
    pub symbol: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub total_volume: Option<f64>,
    #[serde(default)]
    pub circulating_supply: Option<f64>,
    #[serde(default)]
    pub current_price: Option<f64>,
}

impl CoinMarket {
    /// Map a metrics entry to the exchange's USDT-perpetual symbol name.
    pub fn usdt_symbol(&self) -> Option<String> {
        let sym = self.symbol.trim().to_uppercase();
        if sym.is_empty() {
            None
        } else {
            Some(format!("{sym}USDT"))
        }
    }
}

#[derive(Clone)]
pub struct CoinGeckoClient {
    base_url: String,
    client: reqwest::Client,
    retry_sleep: Duration,
}

impl CoinGeckoClient {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64, retry_sleep_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("failed to build reqwest client");
        Self {
            base_url: base_url.into(),
            client,
            retry_sleep: Duration::from_secs(retry_sleep_secs),
        }
    }

    /// Fetch one markets page. `Ok(None)` means a non-retryable failure (the
    /// caller stops paging).
    async fn fetch_page(&self, url: &str) -> Result<Option<Vec<CoinMarket>>> {
        for attempt in 0..2 {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| IngestError::TransientNetwork(format!("GET {url}: {e}")))?;

            let status = resp.status();
            if status.is_success() {
                let coins: Vec<CoinMarket> = resp
                    .json()
                    .await
                    .map_err(|e| IngestError::Parse(format!("markets page {url}: {e}")))?;
                return Ok(Some(coins));
            }

            if status.as_u16() == 429 && attempt == 0 {
                warn!(
                    url,
                    sleep_secs = self.retry_sleep.as_secs(),
                    "metrics provider rate limited, sleeping before single retry"
                );
                tokio::time::sleep(self.retry_sleep).await;
                continue;
            }

            warn!(url, status = %status, "metrics page fetch failed, stopping pagination");
            return Ok(None);
        }
        Ok(None)
    }

    /// Fetch the top `limit` coins by market cap, descending.
    pub async fn fetch_top_metrics(&self, limit: u32) -> Result<Vec<CoinMarket>> {
        let per_page = limit.min(PER_PAGE_MAX).max(1);
        let pages = (limit + per_page - 1) / per_page;

        let mut all = Vec::with_capacity(limit as usize);
        for page in 1..=pages {
            let url = format!(
                "{}/coins/markets?vs_currency=usd&order=market_cap_desc&per_page={}&page={}&sparkline=false",
                self.base_url, per_page, page
            );
            match self.fetch_page(&url).await? {
                Some(coins) => {
                    info!(page, count = coins.len(), "metrics page fetched");
                    let empty = coins.is_empty();
                    all.extend(coins);
                    if empty {
                        break;
                    }
                }
                None => break,
            }
        }

        all.truncate(limit as usize);
        Ok(all)
    }

    /// Fetch metrics for specific exchange symbols. Symbols are mapped to
    /// provider IDs by stripping the USDT suffix and lowercasing; non-USDT
    /// symbols are skipped.
    pub async fn fetch_metrics_by_symbols(&self, symbols: &[String]) -> Result<Vec<CoinMarket>> {
        let ids: Vec<String> = symbols
            .iter()
            .filter_map(|s| s.strip_suffix("USDT"))
            .map(|base| base.to_lowercase())
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut all = Vec::with_capacity(ids.len());
        for batch in ids.chunks(PER_PAGE_MAX as usize) {
            let url = format!(
                "{}/coins/markets?vs_currency=usd&ids={}&order=market_cap_desc&per_page={}&page=1&sparkline=false",
                self.base_url,
                batch.join(","),
                batch.len()
            );
            match self.fetch_page(&url).await? {
                Some(coins) => {
                    info!(count = coins.len(), "metrics-by-symbols batch fetched");
                    all.extend(coins);
                }
                None => break,
            }
        }
        Ok(all)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn usdt_symbol_mapping() {
        let coin: CoinMarket = serde_json::from_value(json!({"symbol": "btc"})).unwrap();
        assert_eq!(coin.usdt_symbol().as_deref(), Some("BTCUSDT"));

        let blank: CoinMarket = serde_json::from_value(json!({"symbol": "  "})).unwrap();
        assert_eq!(blank.usdt_symbol(), None);
    }

    #[test]
    fn coin_market_tolerates_missing_fields() {
        let coin: CoinMarket = serde_json::from_value(json!({
            "symbol": "eth",
            "market_cap": 400e9,
            "current_price": null
        }))
        .unwrap();
        assert_eq!(coin.market_cap, Some(400e9));
        assert_eq!(coin.current_price, None);
        assert_eq!(coin.total_volume, None);
    }
}

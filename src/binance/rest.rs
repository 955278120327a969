// =============================================================================
// Binance Futures REST client — public market-data endpoints (fapi/v1)
// =============================================================================
//
// Stateless client over a shared reqwest session. Only public endpoints are
// consumed, so no request signing is involved. Non-2xx responses degrade to
// empty results with a logged error; HTTP 429 sleeps for the configured
// window and retries the same request exactly once.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::error::IngestError;
use crate::types::Bar;

/// 24h rolling ticker for a single symbol.
#[derive(Debug, Clone, Deserialize)]
pub struct Ticker24h {
    pub symbol: String,
    #[serde(rename = "lastPrice")]
    pub last_price: Option<String>,
    #[serde(rename = "quoteVolume")]
    pub quote_volume: Option<String>,
    #[serde(rename = "volume")]
    pub volume: Option<String>,
}

/// Subset of /fapi/v1/exchangeInfo the selector consumes.
#[derive(Debug, Deserialize)]
pub struct ExchangeInfo {
    #[serde(default)]
    pub symbols: Vec<ExchangeSymbol>,
}

#[derive(Debug, Deserialize)]
pub struct ExchangeSymbol {
    pub symbol: String,
    #[serde(rename = "contractType", default)]
    pub contract_type: String,
    #[serde(default)]
    pub status: String,
}

/// Binance Futures REST client.
#[derive(Clone)]
pub struct BinanceRest {
    base_url: String,
    client: reqwest::Client,
    retry_sleep: Duration,
}

impl BinanceRest {
    /// Create a new client. `timeout_secs` bounds connect + read per request.
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

    /// GET `url` and parse the body as JSON. 429 sleeps and retries the same
    /// request at most once; any other non-2xx returns `None` with a logged
    /// error.
    async fn get_json(&self, url: &str) -> Result<Option<serde_json::Value>> {
        for attempt in 0..2 {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| IngestError::TransientNetwork(format!("GET {url}: {e}")))?;

            let status = resp.status();
            if status.is_success() {
                let body = resp
                    .json()
                    .await
                    .map_err(|e| IngestError::Parse(format!("response of {url}: {e}")))?;
                return Ok(Some(body));
            }

            if status.as_u16() == 429 {
                if attempt == 0 {
                    warn!(url, sleep_secs = self.retry_sleep.as_secs(), "rate limited, sleeping before single retry");
                    tokio::time::sleep(self.retry_sleep).await;
                    continue;
                }
                return Err(IngestError::RateLimited(url.to_string()).into());
            }

            error!(url, status = %status, "request failed");
            return Ok(None);
        }
        Ok(None)
    }

    /// GET /fapi/v1/klines: historical OHLCV bars, oldest first.
    pub async fn fetch_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Bar>> {
        let url = format!(
            "{}/fapi/v1/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );
        let Some(body) = self.get_json(&url).await? else {
            return Ok(Vec::new());
        };
        let rows = body
            .as_array()
            .context("klines response is not an array")?;

        let mut bars = Vec::with_capacity(rows.len());
        for row in rows {
            match parse_kline_row(row) {
                Some(bar) => bars.push(bar),
                None => warn!(symbol, interval, "skipping malformed kline row"),
            }
        }
        debug!(symbol, interval, count = bars.len(), "klines fetched");
        Ok(bars)
    }

    /// GET /fapi/v1/ticker/24hr with no symbol filter: all tickers, keyed by
    /// symbol for O(1) lookup.
    pub async fn fetch_all_tickers_24h(&self) -> Result<HashMap<String, Ticker24h>> {
        let url = format!("{}/fapi/v1/ticker/24hr", self.base_url);
        let Some(body) = self.get_json(&url).await? else {
            return Ok(HashMap::new());
        };
        let tickers: Vec<Ticker24h> =
            serde_json::from_value(body).context("parsing 24h ticker array")?;
        let map: HashMap<String, Ticker24h> = tickers
            .into_iter()
            .map(|t| (t.symbol.clone(), t))
            .collect();
        info!(count = map.len(), "24h tickers fetched");
        Ok(map)
    }

    /// GET /fapi/v1/exchangeInfo.
    pub async fn fetch_exchange_info(&self) -> Result<Option<ExchangeInfo>> {
        let url = format!("{}/fapi/v1/exchangeInfo", self.base_url);
        let Some(body) = self.get_json(&url).await? else {
            return Ok(None);
        };
        let info: ExchangeInfo =
            serde_json::from_value(body).context("parsing exchangeInfo")?;
        Ok(Some(info))
    }

    /// Reduce exchange info to the set of tradeable perpetual-contract
    /// symbols. An empty set signals discovery failure.
    pub async fn perpetual_symbols(&self) -> Result<HashSet<String>> {
        let Some(info) = self.fetch_exchange_info().await? else {
            return Ok(HashSet::new());
        };
        let perpetuals: HashSet<String> = info
            .symbols
            .into_iter()
            .filter(|s| s.contract_type == "PERPETUAL" && s.status == "TRADING")
            .map(|s| s.symbol)
            .collect();
        info!(count = perpetuals.len(), "perpetual contracts discovered");
        Ok(perpetuals)
    }
}

/// Parse one row of the kline array response:
/// `[openTime, open, high, low, close, volume, closeTime, ...]` with string
/// numerics. Open time is milliseconds since epoch.
pub fn parse_kline_row(row: &serde_json::Value) -> Option<Bar> {
    let cells = row.as_array()?;
    if cells.len() < 6 {
        return None;
    }
    let open_ms = cells[0].as_i64()?;
    let field = |i: usize| -> Option<f64> { cells[i].as_str()?.parse::<f64>().ok() };
    Some(Bar {
        ts: open_ms / 1000,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kline_row_parses_string_numerics() {
        let row = json!([
            1700000000000i64,
            "42000.10",
            "42100.00",
            "41900.50",
            "42050.00",
            "123.456",
            1700000059999i64
        ]);
        let bar = parse_kline_row(&row).unwrap();
        assert_eq!(bar.ts, 1_700_000_000);
        assert!((bar.open - 42000.10).abs() < 1e-9);
        assert!((bar.volume - 123.456).abs() < 1e-9);
    }

    #[test]
    fn malformed_kline_row_rejected() {
        assert!(parse_kline_row(&json!([1700000000000i64, "1.0"])).is_none());
        assert!(parse_kline_row(&json!({"not": "an array"})).is_none());
        assert!(parse_kline_row(&json!([1700000000000i64, "x", "1", "1", "1", "1"])).is_none());
    }

    #[test]
    fn exchange_info_filters_to_trading_perpetuals() {
        let body = json!({
            "symbols": [
                {"symbol": "BTCUSDT", "contractType": "PERPETUAL", "status": "TRADING"},
                {"symbol": "ETHUSDT", "contractType": "PERPETUAL", "status": "TRADING"},
                {"symbol": "BTCUSDT_240628", "contractType": "CURRENT_QUARTER", "status": "TRADING"},
                {"symbol": "DEADUSDT", "contractType": "PERPETUAL", "status": "SETTLING"}
            ]
        });
        let info: ExchangeInfo = serde_json::from_value(body).unwrap();
        let perps: HashSet<String> = info
            .symbols
            .into_iter()
            .filter(|s| s.contract_type == "PERPETUAL" && s.status == "TRADING")
            .map(|s| s.symbol)
            .collect();
        assert_eq!(perps.len(), 2);
        assert!(perps.contains("BTCUSDT"));
        assert!(perps.contains("ETHUSDT"));
    }

    #[test]
    fn ticker_deserializes_exchange_field_names() {
        let t: Ticker24h = serde_json::from_value(json!({
            "symbol": "BTCUSDT",
            "lastPrice": "42000.5",
            "quoteVolume": "1000000.0",
            "volume": "23.8"
        }))
        .unwrap();
        assert_eq!(t.symbol, "BTCUSDT");
        assert_eq!(t.last_price.as_deref(), Some("42000.5"));
    }
}

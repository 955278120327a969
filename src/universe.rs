// =============================================================================
// Universe Selector — exchange perpetuals ∩ top market-cap list
// =============================================================================
//
// The active ingestion universe is the top market-cap coins that are also
// tradeable perpetual contracts on the exchange, in market-cap order.
// Fallback chain when discovery degrades:
//   exchange discovery empty -> unfiltered market-cap list (warn)
//   both sources empty       -> compiled-in default symbol list
// =============================================================================

use std::collections::HashSet;

use anyhow::Result;
use tracing::{info, warn};

use rust_decimal::prelude::ToPrimitive;

use crate::binance::{BinanceRest, Ticker24h};
use crate::coingecko::{CoinGeckoClient, CoinMarket};
use crate::config::Config;
use crate::db::{Database, MarketMetricsRow};
use crate::decimal::to_decimal_str;
use crate::events::EventBus;

/// Intersect the market-cap ranking with the exchange perpetual set,
/// preserving market-cap order. An empty `perps` set disables filtering (the
/// discovery failure has already been logged by the caller).
pub fn select_universe(top: &[CoinMarket], perps: &HashSet<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    top.iter()
        .filter_map(|coin| coin.usdt_symbol())
        .filter(|sym| perps.is_empty() || perps.contains(sym))
        .filter(|sym| seen.insert(sym.clone()))
        .collect()
}

/// Build one metrics row for a symbol, preferring the exchange ticker's
/// lastPrice/quoteVolume over the provider's price/volume when present.
pub fn merge_metrics_row(
    symbol: String,
    coin: &CoinMarket,
    ticker: Option<&Ticker24h>,
) -> MarketMetricsRow {
    let mut price = coin.current_price;
    let mut volume_24h = coin.total_volume;

    // Exchange numerics arrive as strings; parse them exactly before the
    // final float emission.
    if let Some(t) = ticker {
        if let Some(p) = t.last_price.as_deref().and_then(to_decimal_str) {
            price = p.to_f64().or(price);
        }
        if let Some(v) = t.quote_volume.as_deref().and_then(to_decimal_str) {
            volume_24h = v.to_f64().or(volume_24h);
        }
    }

    MarketMetricsRow {
        symbol,
        image_path: coin.image.clone(),
        market_cap: coin.market_cap,
        volume_24h,
        circulating_supply: coin.circulating_supply,
        price,
    }
}

/// Discover the active universe, persist a fresh metrics snapshot, and
/// return the symbols to ingest (market-cap descending, never empty).
pub async fn seed_universe(
    config: &Config,
    rest: &BinanceRest,
    gecko: &CoinGeckoClient,
    db: &Database,
    bus: &EventBus,
) -> Result<Vec<String>> {
    let perps = rest.perpetual_symbols().await.unwrap_or_else(|e| {
        warn!(error = %e, "perpetual discovery failed");
        HashSet::new()
    });
    if perps.is_empty() {
        warn!("exchange perpetual set is empty, skipping universe filtering");
    }

    let top = gecko.fetch_top_metrics(config.market_data_limit).await?;
    let active = select_universe(&top, &perps);

    if !active.is_empty() {
        // Persist a metrics snapshot for the active set, preferring exchange
        // ticker data for price and volume.
        let tickers = rest.fetch_all_tickers_24h().await.unwrap_or_default();
        let now = chrono::Utc::now().timestamp();

        let rows: Vec<MarketMetricsRow> = top
            .iter()
            .filter_map(|coin| {
                let sym = coin.usdt_symbol()?;
                if !active.contains(&sym) {
                    return None;
                }
                Some(merge_metrics_row(sym.clone(), coin, tickers.get(&sym)))
            })
            .collect();

        match db.save_market_metrics(&rows, now) {
            Ok((saved, skipped)) => {
                info!(saved, skipped, "universe metrics snapshot persisted");
                if saved > 0 {
                    bus.publish(
                        "market_metrics_update",
                        serde_json::json!({ "count": saved, "timestamp": now }),
                    );
                }
            }
            Err(e) => warn!(error = %e, "failed to persist universe metrics snapshot"),
        }
    }

    // Qualified symbols reflect what actually landed in storage; fall back
    // through the discovery list to the compiled-in defaults.
    let mut universe = db
        .list_qualified_symbols(config.min_market_cap, config.min_volume_24h)
        .unwrap_or_default();
    if universe.is_empty() {
        universe = active;
    }
    if universe.is_empty() {
        warn!("universe selection produced no symbols, using default list");
        universe = config.default_symbols.clone();
    }

    info!(count = universe.len(), first = ?universe.first(), "active universe selected");
    Ok(universe)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn coin(symbol: &str, cap: f64) -> CoinMarket {
        serde_json::from_value(json!({"symbol": symbol, "market_cap": cap})).unwrap()
    }

    #[test]
    fn intersection_preserves_market_cap_order() {
        // Seed scenario: exchange has BTC/ETH/FOO, ranking has btc/eth/bar.
        let top = vec![coin("btc", 900e9), coin("eth", 400e9), coin("bar", 1e9)];
        let perps: HashSet<String> = ["BTCUSDT", "ETHUSDT", "FOOUSDT"]
            .into_iter()
            .map(String::from)
            .collect();

        assert_eq!(select_universe(&top, &perps), vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn empty_perpetual_set_disables_filtering() {
        let top = vec![coin("btc", 900e9), coin("bar", 1e9)];
        assert_eq!(
            select_universe(&top, &HashSet::new()),
            vec!["BTCUSDT", "BARUSDT"]
        );
    }

    #[test]
    fn duplicate_provider_symbols_collapse() {
        let top = vec![coin("btc", 900e9), coin("BTC", 10e9)];
        let perps: HashSet<String> = [String::from("BTCUSDT")].into_iter().collect();
        assert_eq!(select_universe(&top, &perps), vec!["BTCUSDT"]);
    }

    #[test]
    fn ticker_overrides_provider_price_and_volume() {
        let c: CoinMarket = serde_json::from_value(json!({
            "symbol": "btc",
            "market_cap": 900e9,
            "total_volume": 1.0,
            "current_price": 2.0
        }))
        .unwrap();
        let ticker: Ticker24h = serde_json::from_value(json!({
            "symbol": "BTCUSDT",
            "lastPrice": "42000.5",
            "quoteVolume": "123456.78",
            "volume": "2.9"
        }))
        .unwrap();

        let row = merge_metrics_row("BTCUSDT".to_string(), &c, Some(&ticker));
        assert_eq!(row.price, Some(42000.5));
        assert_eq!(row.volume_24h, Some(123456.78));
        assert_eq!(row.market_cap, Some(900e9));

        let row_no_ticker = merge_metrics_row("BTCUSDT".to_string(), &c, None);
        assert_eq!(row_no_ticker.price, Some(2.0));
        assert_eq!(row_no_ticker.volume_24h, Some(1.0));
    }
}

// =============================================================================
// Hourly Refresher — periodic market-cap / price / volume update
// =============================================================================
//
// Every hour: take every symbol that already has a market_data row, re-fetch
// its metrics from the provider, overlay fresh exchange ticker data, and
// upsert one row per symbol stamped with the current time. On failure the
// task sleeps one minute and tries again.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::binance::BinanceRest;
use crate::coingecko::CoinGeckoClient;
use crate::config::Config;
use crate::db::{Database, IdCaches, MarketMetricsRow};
use crate::events::EventBus;
use crate::universe::merge_metrics_row;

const REFRESH_PERIOD: Duration = Duration::from_secs(3_600);
const ERROR_RETRY: Duration = Duration::from_secs(60);

/// Run the refresher until shutdown. The task owns its own DB session.
pub async fn run_hourly_refresher(
    config: Config,
    rest: BinanceRest,
    gecko: CoinGeckoClient,
    caches: Arc<IdCaches>,
    bus: EventBus,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("hourly market-metrics refresher started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(REFRESH_PERIOD) => {}
            _ = shutdown.changed() => break,
        }

        match refresh_once(&config, &rest, &gecko, &caches, &bus).await {
            Ok(0) => warn!("no symbols with market data to refresh"),
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, retry_secs = ERROR_RETRY.as_secs(), "metrics refresh failed");
                tokio::select! {
                    _ = tokio::time::sleep(ERROR_RETRY) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }
    info!("hourly market-metrics refresher stopped");
}

/// One refresh pass. Returns the number of symbols updated.
pub async fn refresh_once(
    config: &Config,
    rest: &BinanceRest,
    gecko: &CoinGeckoClient,
    caches: &Arc<IdCaches>,
    bus: &EventBus,
) -> Result<usize> {
    let started = std::time::Instant::now();

    let db = Database::open(&config.database_path, caches.clone())
        .context("opening refresher DB session")?;
    let symbols = db.symbols_with_market_data()?;
    if symbols.is_empty() {
        return Ok(0);
    }
    info!(count = symbols.len(), "refreshing market metrics");

    let coins = gecko.fetch_metrics_by_symbols(&symbols).await?;
    if coins.is_empty() {
        anyhow::bail!("metrics provider returned no data for tracked symbols");
    }

    // One bulk ticker fetch; per-symbol lookups are free afterwards.
    let tickers = rest.fetch_all_tickers_24h().await.unwrap_or_default();
    let now = chrono::Utc::now().timestamp();

    let rows: Vec<MarketMetricsRow> = coins
        .iter()
        .filter_map(|coin| {
            let sym = coin.usdt_symbol()?;
            Some(merge_metrics_row(sym.clone(), coin, tickers.get(&sym)))
        })
        .collect();

    let (saved, skipped) = db.save_market_metrics(&rows, now)?;
    if saved > 0 {
        bus.publish(
            "market_metrics_update",
            serde_json::json!({ "count": saved, "timestamp": now }),
        );
    }

    let elapsed = started.elapsed().as_secs_f64();
    let rate = if elapsed > 0.0 { saved as f64 / elapsed } else { 0.0 };
    info!(
        saved,
        skipped,
        duration_secs = format!("{elapsed:.2}"),
        symbols_per_sec = format!("{rate:.2}"),
        "hourly metrics refresh completed"
    );
    Ok(saved)
}

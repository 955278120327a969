// =============================================================================
// REST Backfill — seed historical bars for the active universe
// =============================================================================
//
// For each (symbol, timeframe) pair, fetch up to SYMBOL_LIMIT klines and
// insert them idempotently (existing rows are never touched — the WS hot
// path owns live bars). One symbol's failure never aborts the batch; the
// cycle reports aggregate success/failure counts per timeframe.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::binance::interval::to_binance_interval;
use crate::binance::BinanceRest;
use crate::config::Config;
use crate::db::{Database, IdCaches};
use crate::events::EventBus;

/// Backfill every symbol across every timeframe. Returns `(succeeded,
/// failed)` over all (symbol, timeframe) pairs.
pub async fn backfill_universe(
    config: &Config,
    rest: &BinanceRest,
    caches: &Arc<IdCaches>,
    bus: &EventBus,
    symbols: &[String],
    timeframes: &[String],
) -> Result<(usize, usize)> {
    let db = Database::open(&config.database_path, caches.clone())
        .context("opening backfill DB session")?;

    let mut succeeded = 0usize;
    let mut failed = 0usize;

    for timeframe in timeframes {
        let Some(interval) = to_binance_interval(timeframe) else {
            warn!(timeframe = %timeframe, "skipping backfill for unsupported timeframe");
            continue;
        };

        let mut tf_ok = 0usize;
        let mut tf_err = 0usize;
        for symbol in symbols {
            match backfill_symbol(config, rest, &db, bus, symbol, timeframe, interval).await {
                Ok(count) => {
                    tf_ok += 1;
                    debug!(symbol = %symbol, timeframe = %timeframe, count, "backfill done");
                }
                Err(e) => {
                    tf_err += 1;
                    warn!(symbol = %symbol, timeframe = %timeframe, error = %e, "backfill failed");
                }
            }
        }

        succeeded += tf_ok;
        failed += tf_err;
        if tf_err > 0 {
            warn!(timeframe = %timeframe, ok = tf_ok, failed = tf_err, "backfill finished with failures");
        } else {
            info!(timeframe = %timeframe, ok = tf_ok, "backfill finished");
        }
    }

    Ok((succeeded, failed))
}

async fn backfill_symbol(
    config: &Config,
    rest: &BinanceRest,
    db: &Database,
    bus: &EventBus,
    symbol: &str,
    timeframe: &str,
    interval: &str,
) -> Result<usize> {
    let bars = rest
        .fetch_klines(symbol, interval, config.symbol_limit)
        .await?;
    if bars.is_empty() {
        anyhow::bail!("no klines returned");
    }

    let saved = db.save_candles_idempotent(symbol, timeframe, &bars)?;
    if let Some(last) = bars.last() {
        bus.publish_candle_update(symbol, timeframe, last.ts);
    }
    Ok(saved)
}

// =============================================================================
// Strategy Engine — swing / fib / confluence / alert cycle
// =============================================================================
//
// Per cycle, for every qualified symbol:
//   1. Load recent bars for each tracked timeframe
//   2. Extract ZigZag++ swings, persist the swing set
//   3. Collect support/resistance levels
//   4. Per timeframe: fib levels -> confluence against all strictly higher
//      timeframes -> alerts -> persist
//
// Per-symbol failures are isolated; the cycle ends with aggregate counts.
// =============================================================================

pub mod alerts;
pub mod confluence;
pub mod fibonacci;
pub mod support_resistance;
pub mod swing;
pub mod zigzag;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::{Database, IdCaches};
use crate::types::{Swing, SwingKind, SwingPoint};
use self::confluence::HigherTfLevels;

/// Per-timeframe analysis artifacts for one symbol.
struct TfAnalysis {
    timeframe: String,
    seconds: i64,
    swing_highs: Vec<SwingPoint>,
    swing_lows: Vec<SwingPoint>,
    supports: Vec<f64>,
    resistances: Vec<f64>,
}

/// Timeframes at or above this bar length use body prices for S/R.
const HTF_SECONDS: i64 = 3_600;

/// Run the strategy loop until shutdown. The task owns its own DB session.
pub async fn run_strategy_loop(
    config: Config,
    caches: Arc<IdCaches>,
    mut shutdown: watch::Receiver<bool>,
) {
    let cycle = Duration::from_secs(config.strategy_cycle_secs.max(1));
    let mut tick = tokio::time::interval(cycle);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; give ingestion a head start instead.
    tick.reset();

    info!(cycle_secs = cycle.as_secs(), "strategy loop started");
    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = shutdown.changed() => break,
        }

        match run_cycle(&config, &caches) {
            Ok((symbols, alerts, failures)) => {
                info!(symbols, alerts, failures, "strategy cycle completed");
            }
            Err(e) => error!(error = %e, "strategy cycle failed"),
        }
    }
    info!("strategy loop stopped");
}

/// One full cycle over all qualified symbols. Returns
/// `(symbols_processed, alerts_saved, symbol_failures)`.
pub fn run_cycle(config: &Config, caches: &Arc<IdCaches>) -> Result<(usize, usize, usize)> {
    let db = Database::open(&config.database_path, caches.clone())
        .context("opening strategy DB session")?;

    let mut symbols = db
        .list_qualified_symbols(config.min_market_cap, config.min_volume_24h)
        .unwrap_or_default();
    if symbols.is_empty() {
        symbols = config.default_symbols.clone();
    }
    let timeframes = db.list_timeframes_asc()?;

    let mut processed = 0usize;
    let mut alerts_saved = 0usize;
    let mut failures = 0usize;

    for symbol in &symbols {
        match analyze_symbol(config, &db, symbol, &timeframes) {
            Ok(saved) => {
                processed += 1;
                alerts_saved += saved;
            }
            Err(e) => {
                failures += 1;
                warn!(symbol = %symbol, error = %e, "symbol analysis failed");
            }
        }
    }

    Ok((processed, alerts_saved, failures))
}

/// Analyze one symbol across all timeframes. Returns the number of alerts
/// persisted.
fn analyze_symbol(
    config: &Config,
    db: &Database,
    symbol: &str,
    timeframes: &[(String, i64)],
) -> Result<usize> {
    let params = &config.strategy;
    let min_bars = params.zigzag_depth + params.zigzag_backstep + 1;

    // Pass 1: swings + S/R per timeframe.
    let mut analyses: Vec<TfAnalysis> = Vec::with_capacity(timeframes.len());
    for (tf_name, seconds) in timeframes {
        let bars = db.load_recent_bars(symbol, tf_name, config.symbol_limit as usize)?;
        if bars.len() < min_bars {
            debug!(symbol, timeframe = %tf_name, bars = bars.len(), "insufficient bars for swing detection");
            continue;
        }

        let (swing_highs, swing_lows) = zigzag::get_zigzag_points(
            &bars,
            params.zigzag_depth,
            params.zigzag_deviation,
            params.zigzag_backstep,
            None,
            params.pruning_rate(symbol),
        );

        let mut swings: Vec<Swing> = swing_highs
            .iter()
            .map(|p| Swing { kind: SwingKind::High, ts: p.ts, price: p.price })
            .chain(swing_lows.iter().map(|p| Swing { kind: SwingKind::Low, ts: p.ts, price: p.price }))
            .collect();
        swings.sort_by_key(|s| s.ts);
        db.save_swing_points(symbol, tf_name, &swings)?;

        let (supports, resistances) = support_resistance::collect_levels(
            &bars,
            params.sr_window_before,
            params.sr_window_after,
            *seconds >= HTF_SECONDS,
        );

        analyses.push(TfAnalysis {
            timeframe: tf_name.clone(),
            seconds: *seconds,
            swing_highs,
            swing_lows,
            supports,
            resistances,
        });
    }

    // Pass 2: fib -> confluence -> alerts per timeframe.
    let mut saved = 0usize;
    for analysis in &analyses {
        let fibs = fibonacci::calculate_fibonacci_levels(
            &analysis.swing_highs,
            &analysis.swing_lows,
            &analysis.timeframe,
            params,
        );
        if fibs.is_empty() {
            continue;
        }

        let higher: Vec<HigherTfLevels> = analyses
            .iter()
            .filter(|other| other.seconds > analysis.seconds)
            .map(|other| {
                let mut supports = other.supports.clone();
                supports.extend(other.swing_lows.iter().map(|p| p.price));
                let mut resistances = other.resistances.clone();
                resistances.extend(other.swing_highs.iter().map(|p| p.price));
                HigherTfLevels {
                    timeframe: other.timeframe.clone(),
                    supports,
                    resistances,
                }
            })
            .collect();

        let confirmed: Vec<_> = fibs
            .iter()
            .map(|fib| confluence::confirm_fib_level(fib, &higher, params.confluence_epsilon))
            .collect();

        for alert in alerts::generate_alerts(symbol, &confirmed, params) {
            if db.save_alert(&alert)? {
                saved += 1;
                info!(
                    symbol,
                    timeframe = %alert.timeframe,
                    trend = %alert.trend_type,
                    entry = alert.entry_level,
                    risk = alert.risk_score,
                    "alert generated"
                );
            }
        }
    }

    Ok(saved)
}

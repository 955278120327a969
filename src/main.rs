// =============================================================================
// FibWatch Perp Engine — Main Entry Point
// =============================================================================
//
// Startup order matters: persistence first (fatal on failure), then the
// universe seed, then the long-lived tasks. Shutdown drains the batch writer
// before the process exits so no buffered candles are lost.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod backfill;
mod binance;
mod coingecko;
mod config;
mod db;
mod decimal;
mod error;
mod events;
mod market_data;
mod refresher;
mod strategy;
mod types;
mod universe;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::binance::BinanceRest;
use crate::coingecko::CoinGeckoClient;
use crate::config::Config;
use crate::db::{Database, IdCaches};
use crate::events::EventBus;
use crate::market_data::stream::{plan_connections, run_shard};
use crate::market_data::IngestMetrics;
use crate::types::KlineEvent;

/// Interval between aggregate metrics log lines.
const METRICS_LOG_PERIOD: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        FibWatch Perp Engine — Starting Up               ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = Config::from_env();
    info!(
        db = %config.database_path,
        exchange = %config.binance_api_url,
        metrics_provider = %config.coingecko_api_url,
        "configuration loaded"
    );

    // ── 2. Persistence (fatal on failure) ────────────────────────────────
    let caches = Arc::new(IdCaches::default());
    let db = Database::open(&config.database_path, caches.clone())
        .map_err(|e| error::IngestError::Fatal(format!("opening database: {e}")))?;
    db.init_schema()
        .map_err(|e| error::IngestError::Fatal(format!("database initialization: {e}")))?;
    info!("database initialized");

    let bus = EventBus::new();
    let metrics = Arc::new(IngestMetrics::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let rest = BinanceRest::new(
        &config.binance_api_url,
        config.http_timeout_secs,
        config.rate_limit_retry_sleep_secs,
    );
    let gecko = CoinGeckoClient::new(
        &config.coingecko_api_url,
        config.http_timeout_secs,
        config.rate_limit_retry_sleep_secs,
    );

    // ── 3. Seed the universe and backfill history ────────────────────────
    let universe = universe::seed_universe(&config, &rest, &gecko, &db, &bus).await?;
    let timeframes: Vec<String> = db
        .list_timeframes_asc()?
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    info!(symbols = universe.len(), timeframes = ?timeframes, "ingestion scope resolved");

    match backfill::backfill_universe(&config, &rest, &caches, &bus, &universe, &timeframes).await
    {
        Ok((ok, failed)) => info!(ok, failed, "historical backfill finished"),
        Err(e) => warn!(error = %e, "historical backfill failed"),
    }

    // ── 4. Hourly market-metrics refresher ───────────────────────────────
    let refresher_handle = tokio::spawn(refresher::run_hourly_refresher(
        config.clone(),
        rest.clone(),
        gecko.clone(),
        caches.clone(),
        bus.clone(),
        shutdown_rx.clone(),
    ));

    // ── 5. Batch writer + WebSocket multiplexer ──────────────────────────
    // The bounded channel is the backpressure seam: a stalled writer fills
    // it and suspends the socket readers.
    let (event_tx, event_rx) = mpsc::channel::<KlineEvent>(config.ws_batch_size.max(1) * 4);

    let writer_handle = tokio::spawn(market_data::batch::run_batch_writer(
        event_rx,
        config.clone(),
        caches.clone(),
        bus.clone(),
        metrics.clone(),
        shutdown_rx.clone(),
    ));

    let (streams_tx, streams_rx) = watch::channel((universe.clone(), timeframes.clone()));
    let supervisor_handle = tokio::spawn(ws_supervisor(
        config.clone(),
        streams_rx,
        event_tx,
        metrics.clone(),
        shutdown_rx.clone(),
    ));

    // ── 6. Periodic universe re-check ────────────────────────────────────
    let recheck_config = config.clone();
    let recheck_rest = rest.clone();
    let recheck_gecko = gecko.clone();
    let recheck_caches = caches.clone();
    let recheck_bus = bus.clone();
    let mut recheck_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let period = Duration::from_secs(
            recheck_config.ingest_cycle_secs.max(1) * recheck_config.universe_recheck_cycles.max(1) as u64,
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = recheck_shutdown.changed() => break,
            }

            let session = match Database::open(&recheck_config.database_path, recheck_caches.clone()) {
                Ok(db) => db,
                Err(e) => {
                    error!(error = %e, "universe re-check cannot open DB session");
                    continue;
                }
            };
            let new_universe = match universe::seed_universe(
                &recheck_config,
                &recheck_rest,
                &recheck_gecko,
                &session,
                &recheck_bus,
            )
            .await
            {
                Ok(u) => u,
                Err(e) => {
                    error!(error = %e, "universe re-check failed");
                    continue;
                }
            };
            let new_timeframes: Vec<String> = match session.list_timeframes_asc() {
                Ok(tfs) => tfs.into_iter().map(|(name, _)| name).collect(),
                Err(e) => {
                    error!(error = %e, "timeframe re-check failed");
                    continue;
                }
            };

            let changed = {
                let current = streams_tx.borrow();
                *current != (new_universe.clone(), new_timeframes.clone())
            };
            if changed {
                info!(symbols = new_universe.len(), "universe changed, resharding WebSocket connections");
                let _ = streams_tx.send((new_universe, new_timeframes));
            }
        }
    });

    // ── 7. Strategy loop + metrics logger ────────────────────────────────
    tokio::spawn(strategy::run_strategy_loop(
        config.clone(),
        caches.clone(),
        shutdown_rx.clone(),
    ));

    let log_metrics = metrics.clone();
    let mut log_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(METRICS_LOG_PERIOD) => log_metrics.log_snapshot(),
                _ = log_shutdown.changed() => break,
            }
        }
    });

    // ── 8. Run until SIGINT / SIGTERM ────────────────────────────────────
    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining");
    let _ = shutdown_tx.send(true);

    // The writer performs one final flush on shutdown; wait for it and the
    // socket tasks before closing.
    let _ = supervisor_handle.await;
    let _ = writer_handle.await;
    let _ = refresher_handle.await;
    info!("shutdown complete");
    Ok(())
}

/// Supervise the sharded WebSocket connections, tearing down and respawning
/// the whole set whenever the stream universe changes.
async fn ws_supervisor(
    config: Config,
    mut streams_rx: watch::Receiver<(Vec<String>, Vec<String>)>,
    event_tx: mpsc::Sender<KlineEvent>,
    metrics: Arc<IngestMetrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let (symbols, timeframes) = streams_rx.borrow_and_update().clone();

        let urls = match plan_connections(&config.binance_ws_url, &symbols, &timeframes) {
            Ok(urls) => urls,
            Err(e) => {
                error!(error = %e, "cannot plan WebSocket connections, waiting for universe change");
                tokio::select! {
                    _ = streams_rx.changed() => continue,
                    _ = shutdown.changed() => break,
                }
            }
        };

        metrics.clear_shards();
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(urls.len());
        for (shard_id, url) in urls.into_iter().enumerate() {
            handles.push(tokio::spawn(run_shard(
                shard_id,
                url,
                config.clone(),
                event_tx.clone(),
                metrics.register_shard(),
                stop_rx.clone(),
            )));
        }

        let reshard = tokio::select! {
            _ = streams_rx.changed() => true,
            _ = shutdown.changed() => false,
        };

        let _ = stop_tx.send(true);
        for handle in handles {
            let _ = handle.await;
        }
        if !reshard {
            break;
        }
        info!("WebSocket connections restarted with new stream set");
    }
    info!("WebSocket supervisor stopped");
}

/// Resolve on SIGINT or, on unix, SIGTERM.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

// =============================================================================
// Batch Writer — time/size-bounded persistence of parsed kline events
// =============================================================================
//
// Events accumulate in an append-only buffer and flush when either bound
// trips: `len >= WS_BATCH_SIZE`, or `WS_BATCH_TIMEOUT` has elapsed since the
// last flush. Each flush partitions the buffer into in-progress and closed
// candles and writes the partitions with their own conflict policies,
// in-progress first so that a closed bar arriving in the same batch has the
// final word.
//
// A failed flush drops the batch: klines are idempotent and the exchange
// re-emits them, so replaying a partial batch is never worth a poisoned
// session. The DB session is discarded and reopened on the next flush.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::db::{Database, IdCaches};
use crate::events::EventBus;
use crate::market_data::metrics::IngestMetrics;
use crate::types::KlineEvent;

/// Split a drained buffer into (in_progress, closed), preserving arrival
/// order within each partition.
pub fn partition_events(events: Vec<KlineEvent>) -> (Vec<KlineEvent>, Vec<KlineEvent>) {
    let mut in_progress = Vec::new();
    let mut closed = Vec::new();
    for ev in events {
        if ev.is_closed {
            closed.push(ev);
        } else {
            in_progress.push(ev);
        }
    }
    (in_progress, closed)
}

/// Run the batch writer until the event channel closes or shutdown fires.
/// Performs one final flush before releasing the session.
pub async fn run_batch_writer(
    mut rx: mpsc::Receiver<KlineEvent>,
    config: Config,
    caches: Arc<IdCaches>,
    bus: EventBus,
    metrics: Arc<IngestMetrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let batch_size = config.ws_batch_size.max(1);
    let batch_timeout = Duration::from_secs(config.ws_batch_timeout_secs.max(1));

    let mut session: Option<Database> = None;
    let mut buffer: Vec<KlineEvent> = Vec::with_capacity(batch_size);
    let mut last_flush = Instant::now();

    // The timer ticks faster than the timeout so a quiet market still flushes
    // close to WS_BATCH_TIMEOUT after the last write.
    let mut tick = tokio::time::interval(batch_timeout.min(Duration::from_secs(1)));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(batch_size, timeout_secs = batch_timeout.as_secs(), "batch writer started");

    loop {
        tokio::select! {
            maybe_event = rx.recv() => match maybe_event {
                Some(event) => {
                    buffer.push(event);
                    metrics.set_batch_buffer_size(buffer.len());
                    if buffer.len() >= batch_size {
                        flush(&mut session, &mut buffer, &config, &caches, &bus, &metrics);
                        last_flush = Instant::now();
                    }
                }
                None => break,
            },
            _ = tick.tick() => {
                if !buffer.is_empty() && last_flush.elapsed() >= batch_timeout {
                    flush(&mut session, &mut buffer, &config, &caches, &bus, &metrics);
                    last_flush = Instant::now();
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    // Drain anything still queued in the channel, then flush once more.
    while let Ok(event) = rx.try_recv() {
        buffer.push(event);
    }
    if !buffer.is_empty() {
        info!(pending = buffer.len(), "flushing final batch before shutdown");
        flush(&mut session, &mut buffer, &config, &caches, &bus, &metrics);
    }
    info!("batch writer stopped");
}

/// Flush the buffer to storage. A zero-length buffer is a no-op that never
/// touches the database.
fn flush(
    session: &mut Option<Database>,
    buffer: &mut Vec<KlineEvent>,
    config: &Config,
    caches: &Arc<IdCaches>,
    bus: &EventBus,
    metrics: &Arc<IngestMetrics>,
) {
    if buffer.is_empty() {
        return;
    }

    let batch = std::mem::take(buffer);
    metrics.set_batch_buffer_size(0);

    // The session is taken out for the duration of the flush and only put
    // back on success; an error path simply drops it.
    let db = match session.take() {
        Some(db) => db,
        None => match Database::open(&config.database_path, caches.clone()) {
            Ok(db) => db,
            Err(e) => {
                error!(error = %e, dropped = batch.len(), "cannot open DB session, dropping batch");
                return;
            }
        },
    };

    let (in_progress, closed) = partition_events(batch);
    let mut total_saved = 0usize;

    // In-progress first: a closed bar in the same batch must overwrite the
    // merged extremes, not the other way around.
    if !in_progress.is_empty() {
        match db.save_candles_merge(&in_progress, false) {
            Ok((saved, skipped)) => {
                total_saved += saved;
                if skipped > 0 {
                    debug!(skipped, "in-progress candles skipped during flush");
                }
            }
            Err(e) => {
                error!(error = %e, dropped = in_progress.len() + closed.len(), "flush failed, dropping batch and session");
                return;
            }
        }
    }

    if !closed.is_empty() {
        match db.save_candles_merge(&closed, true) {
            Ok((saved, skipped)) => {
                total_saved += saved;
                if skipped > 0 {
                    debug!(skipped, "closed candles skipped during flush");
                }
                // Downstream consumers only care about final bars.
                for ev in &closed {
                    bus.publish_candle_update(&ev.symbol, &ev.timeframe, ev.timestamp.timestamp());
                }
            }
            Err(e) => {
                error!(error = %e, dropped = closed.len(), "closed-candle flush failed, dropping remainder and session");
                return;
            }
        }
    }

    *session = Some(db);
    metrics.record_flush(total_saved);
    debug!(saved = total_saved, "batch flushed");
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(ts: i64, close: f64, is_closed: bool) -> KlineEvent {
        KlineEvent {
            symbol: "BTCUSDT".to_string(),
            timeframe: "1m".to_string(),
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
            open: 100.0,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1.0,
            is_closed,
        }
    }

    #[test]
    fn partition_preserves_order_within_each_class() {
        let events = vec![
            event(0, 100.0, false),
            event(0, 101.0, false),
            event(0, 102.0, true),
            event(60, 103.0, false),
        ];
        let (live, closed) = partition_events(events);
        assert_eq!(live.len(), 3);
        assert_eq!(closed.len(), 1);
        assert!((live[0].close - 100.0).abs() < f64::EPSILON);
        assert!((live[1].close - 101.0).abs() < f64::EPSILON);
        assert!((live[2].close - 103.0).abs() < f64::EPSILON);
        assert!((closed[0].close - 102.0).abs() < f64::EPSILON);
    }

    #[test]
    fn partition_of_empty_buffer_is_empty() {
        let (live, closed) = partition_events(Vec::new());
        assert!(live.is_empty());
        assert!(closed.is_empty());
    }
}

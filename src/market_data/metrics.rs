// =============================================================================
// Ingestion metrics — lock-free counters for stream and batch health
// =============================================================================
//
// One `ShardMetrics` per WebSocket connection, updated only by that
// connection's task; the registry aggregates read-only. Operators watch
// `reconnect_count`, `parse_errors`, `total_candles_batched`, and
// `time_since_last_flush` to assess pipeline health.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Counters owned by a single WebSocket connection task.
#[derive(Debug, Default)]
pub struct ShardMetrics {
    messages_received: AtomicU64,
    parse_errors: AtomicU64,
    reconnect_count: AtomicU64,
    /// UNIX seconds of the last received message; 0 = never.
    last_message_time: AtomicI64,
    is_connected: AtomicBool,
    reconnect_delay_ms: AtomicU64,
}

impl ShardMetrics {
    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.last_message_time
            .store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnect_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_connected(&self, connected: bool) {
        self.is_connected.store(connected, Ordering::Relaxed);
    }

    pub fn set_reconnect_delay_ms(&self, delay_ms: u64) {
        self.reconnect_delay_ms.store(delay_ms, Ordering::Relaxed);
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }
}

/// Aggregated snapshot across all connections plus the batch writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub shard_count: usize,
    pub connected_shards: usize,
    pub messages_received: u64,
    pub parse_errors: u64,
    pub reconnect_count: u64,
    /// UNIX seconds of the most recent message on any shard; 0 = never.
    pub last_message_time: i64,
    /// Largest current backoff delay across shards, in milliseconds.
    pub reconnect_delay_ms: u64,
    pub batch_buffer_size: u64,
    pub total_batches_flushed: u64,
    pub total_candles_batched: u64,
    /// Seconds since the batch writer last flushed; -1 = never.
    pub time_since_last_flush: i64,
}

/// Process-wide registry tying shard counters and batch counters together.
#[derive(Debug, Default)]
pub struct IngestMetrics {
    shards: RwLock<Vec<Arc<ShardMetrics>>>,
    batch_buffer_size: AtomicU64,
    total_batches_flushed: AtomicU64,
    total_candles_batched: AtomicU64,
    /// UNIX seconds of the last successful flush; 0 = never.
    last_flush_time: AtomicI64,
}

impl IngestMetrics {
    /// Register a new connection's counter block and return it.
    pub fn register_shard(&self) -> Arc<ShardMetrics> {
        let shard = Arc::new(ShardMetrics::default());
        self.shards.write().push(shard.clone());
        shard
    }

    /// Drop all shard counter blocks (used when the stream set is resharded).
    pub fn clear_shards(&self) {
        self.shards.write().clear();
    }

    pub fn set_batch_buffer_size(&self, size: usize) {
        self.batch_buffer_size.store(size as u64, Ordering::Relaxed);
    }

    pub fn record_flush(&self, candles: usize) {
        self.total_batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.total_candles_batched
            .fetch_add(candles as u64, Ordering::Relaxed);
        self.last_flush_time
            .store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let shards = self.shards.read();
        let now = chrono::Utc::now().timestamp();
        let last_flush = self.last_flush_time.load(Ordering::Relaxed);

        MetricsSnapshot {
            shard_count: shards.len(),
            connected_shards: shards
                .iter()
                .filter(|s| s.is_connected.load(Ordering::Relaxed))
                .count(),
            messages_received: shards
                .iter()
                .map(|s| s.messages_received.load(Ordering::Relaxed))
                .sum(),
            parse_errors: shards
                .iter()
                .map(|s| s.parse_errors.load(Ordering::Relaxed))
                .sum(),
            reconnect_count: shards
                .iter()
                .map(|s| s.reconnect_count.load(Ordering::Relaxed))
                .sum(),
            last_message_time: shards
                .iter()
                .map(|s| s.last_message_time.load(Ordering::Relaxed))
                .max()
                .unwrap_or(0),
            reconnect_delay_ms: shards
                .iter()
                .map(|s| s.reconnect_delay_ms.load(Ordering::Relaxed))
                .max()
                .unwrap_or(0),
            batch_buffer_size: self.batch_buffer_size.load(Ordering::Relaxed),
            total_batches_flushed: self.total_batches_flushed.load(Ordering::Relaxed),
            total_candles_batched: self.total_candles_batched.load(Ordering::Relaxed),
            time_since_last_flush: if last_flush == 0 { -1 } else { now - last_flush },
        }
    }

    /// Log an aggregate snapshot (called from the periodic metrics task).
    pub fn log_snapshot(&self) {
        let snap = self.snapshot();
        info!(
            connected = snap.connected_shards,
            shards = snap.shard_count,
            messages = snap.messages_received,
            parse_errors = snap.parse_errors,
            reconnects = snap.reconnect_count,
            batch_buffer = snap.batch_buffer_size,
            batches_flushed = snap.total_batches_flushed,
            candles_batched = snap.total_candles_batched,
            since_last_flush_secs = snap.time_since_last_flush,
            "ingestion metrics"
        );
    }
}

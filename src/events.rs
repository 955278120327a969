// =============================================================================
// Event Bus — publish-only fan-out for downstream consumers
// =============================================================================
//
// The ingestion hot path announces `candle_update` for every persisted closed
// candle and `market_metrics_update` after each metrics refresh. The bus is a
// tokio broadcast channel: publishing never blocks, and a bus with no
// subscribers simply drops the event.

use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// A published event: a channel name plus an arbitrary JSON payload.
#[derive(Debug, Clone, Serialize)]
pub struct BusEvent {
    pub channel: String,
    pub payload: serde_json::Value,
}

/// Broadcast capacity. Slow subscribers that lag past this many events skip
/// ahead; the ingestion path is never throttled by a consumer.
const BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish `payload` on `channel`. Returns the number of subscribers that
    /// received the event.
    pub fn publish(&self, channel: &str, payload: serde_json::Value) -> usize {
        let event = BusEvent {
            channel: channel.to_string(),
            payload,
        };
        match self.tx.send(event) {
            Ok(n) => {
                trace!(channel, receivers = n, "event published");
                n
            }
            Err(_) => {
                // No subscribers attached; the event is intentionally dropped.
                debug!(channel, "event published with no subscribers");
                0
            }
        }
    }

    /// Convenience wrapper for the candle-update announcement emitted after a
    /// closed candle is persisted.
    pub fn publish_candle_update(&self, symbol: &str, timeframe: &str, timestamp: i64) -> usize {
        self.publish(
            "candle_update",
            json!({
                "symbol": symbol,
                "timeframe": timeframe,
                "timestamp": timestamp,
                "closed": true,
            }),
        )
    }

    /// Subscribe to the full event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_harmless() {
        let bus = EventBus::new();
        assert_eq!(bus.publish("candle_update", json!({"x": 1})), 0);
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish_candle_update("BTCUSDT", "1m", 1_700_000_000);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.channel, "candle_update");
        assert_eq!(event.payload["symbol"], "BTCUSDT");
        assert_eq!(event.payload["closed"], true);
    }
}

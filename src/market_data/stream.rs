// =============================================================================
// WebSocket Multiplexer — N symbols x M timeframes of kline streams
// =============================================================================
//
// Stream names follow `<lowersym>@kline_<interval>`. A connection carries at
// most 200 streams; larger universes shard across several connections, each
// with its own backoff state and metrics block.
//
// Connection lifecycle per shard:
//
//   DISCONNECTED --connect()--> CONNECTING --ok--> OPEN --recv err--> CLOSING
//        ^                         | fail                |               |
//        +---------backoff------ DISCONNECTED <----------+---------------+
//
// Backoff starts at 1 s, doubles per failed attempt, caps at the configured
// maximum, and resets on a successful OPEN. A 30 s receive gap triggers an
// application-level ping; a ping that cannot be sent (or is never answered
// within the pong timeout) closes the connection.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::binance::interval::to_binance_interval;
use crate::config::Config;
use crate::market_data::metrics::ShardMetrics;
use crate::types::KlineEvent;

/// Exchange cap on streams multiplexed over one connection.
pub const MAX_STREAMS_PER_CONNECTION: usize = 200;

/// Receive gap after which an application ping is sent.
const RECV_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection attempt timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Connection lifecycle states (see the module diagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

// -----------------------------------------------------------------------------
// Stream naming / sharding (pure)
// -----------------------------------------------------------------------------

/// Build the kline stream name for a symbol/timeframe pair, or `None` for a
/// timeframe the exchange does not support.
pub fn stream_name(symbol: &str, timeframe: &str) -> Option<String> {
    let interval = to_binance_interval(timeframe)?;
    Some(format!("{}@kline_{}", symbol.to_lowercase(), interval))
}

/// Expand symbols x timeframes into stream names, rejecting unsupported
/// timeframes at subscribe time.
pub fn build_stream_names(symbols: &[String], timeframes: &[String]) -> Vec<String> {
    let mut streams = Vec::with_capacity(symbols.len() * timeframes.len());
    for tf in timeframes {
        if to_binance_interval(tf).is_none() {
            warn!(timeframe = %tf, "rejecting unsupported timeframe at subscribe time");
            continue;
        }
        for symbol in symbols {
            if let Some(name) = stream_name(symbol, tf) {
                streams.push(name);
            }
        }
    }
    streams
}

/// Chunk the stream list into connection-sized shards.
pub fn shard_streams(streams: &[String], max_per_connection: usize) -> Vec<Vec<String>> {
    streams
        .chunks(max_per_connection.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Build the connection URL for one shard: the single-stream path for one
/// stream, the multiplexed path otherwise.
pub fn connection_url(ws_base: &str, shard: &[String]) -> String {
    if shard.len() == 1 {
        format!("{}/ws/{}", ws_base, shard[0])
    } else {
        format!("{}/stream?streams={}", ws_base, shard.join("/"))
    }
}

/// Next reconnect delay: doubled, capped.
pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

// -----------------------------------------------------------------------------
// Message parsing (pure)
// -----------------------------------------------------------------------------

/// Outcome of parsing one WebSocket text frame.
#[derive(Debug, PartialEq)]
pub enum ParseOutcome {
    /// A valid kline event.
    Event(KlineEvent),
    /// A well-formed message that is not a kline (ignored, not an error).
    Ignored,
    /// A malformed or invalid message (counted under parse_errors).
    Invalid(String),
}

/// Binance sends numeric values as JSON strings inside kline objects.
fn string_f64(val: &serde_json::Value) -> Option<f64> {
    match val {
        serde_json::Value::String(s) => s.parse::<f64>().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Parse a kline frame in either envelope:
///   single stream: `{"e":"kline","s":"BTCUSDT","k":{...}}`
///   multi stream:  `{"stream":"btcusdt@kline_1m","data":{"e":"kline",...}}`
pub fn parse_kline_event(text: &str) -> ParseOutcome {
    let root: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return ParseOutcome::Invalid(format!("bad JSON: {e}")),
    };

    let data = if root.get("stream").is_some() && root.get("data").is_some() {
        &root["data"]
    } else {
        &root
    };

    if data.get("e").and_then(|e| e.as_str()) != Some("kline") {
        return ParseOutcome::Ignored;
    }

    let k = &data["k"];
    let Some(symbol) = k.get("s").and_then(|s| s.as_str()) else {
        return ParseOutcome::Invalid("missing k.s".to_string());
    };
    let Some(interval) = k.get("i").and_then(|i| i.as_str()) else {
        return ParseOutcome::Invalid("missing k.i".to_string());
    };
    let Some(open_ms) = k.get("t").and_then(|t| t.as_i64()) else {
        return ParseOutcome::Invalid("missing k.t".to_string());
    };
    let Some(timestamp) = Utc.timestamp_millis_opt(open_ms).single() else {
        return ParseOutcome::Invalid(format!("open time {open_ms} out of range"));
    };

    let (Some(open), Some(high), Some(low), Some(close), Some(volume)) = (
        k.get("o").and_then(string_f64),
        k.get("h").and_then(string_f64),
        k.get("l").and_then(string_f64),
        k.get("c").and_then(string_f64),
        k.get("v").and_then(string_f64),
    ) else {
        return ParseOutcome::Invalid("missing OHLCV field".to_string());
    };
    let is_closed = k.get("x").and_then(|x| x.as_bool()).unwrap_or(false);

    // Validity gates: positive prices, coherent extremes.
    if open <= 0.0 || high <= 0.0 || low <= 0.0 || close <= 0.0 {
        return ParseOutcome::Invalid(format!("non-positive price for {symbol}"));
    }
    if high < low {
        return ParseOutcome::Invalid(format!("high {high} < low {low} for {symbol}"));
    }

    ParseOutcome::Event(KlineEvent {
        symbol: symbol.to_uppercase(),
        timeframe: interval.to_string(),
        timestamp,
        open,
        high,
        low,
        close,
        volume,
        is_closed,
    })
}

// -----------------------------------------------------------------------------
// Connection task
// -----------------------------------------------------------------------------

/// Run one sharded connection until shutdown: connect with timeout, read and
/// forward kline events, reconnect with exponential backoff on any failure.
pub async fn run_shard(
    shard_id: usize,
    url: String,
    config: Config,
    tx: mpsc::Sender<KlineEvent>,
    metrics: Arc<ShardMetrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let max_backoff = Duration::from_secs(config.ws_max_reconnect_delay_secs.max(1));
    let mut delay = INITIAL_BACKOFF;
    let mut state = ConnState::Disconnected;

    loop {
        if *shutdown.borrow() {
            break;
        }

        state = ConnState::Connecting;
        debug!(shard = shard_id, state = ?state, "connecting");
        metrics.set_reconnect_delay_ms(delay.as_millis() as u64);

        match timeout(CONNECT_TIMEOUT, connect_async(&url)).await {
            Ok(Ok((ws, _response))) => {
                state = ConnState::Open;
                info!(shard = shard_id, state = ?state, "kline WebSocket connected");
                metrics.set_connected(true);
                delay = INITIAL_BACKOFF;

                let reason = read_loop(ws, &config, &tx, &metrics, &mut shutdown).await;
                state = ConnState::Closing;
                debug!(shard = shard_id, state = ?state, "closing connection");
                metrics.set_connected(false);

                match reason {
                    ReadExit::Shutdown => break,
                    ReadExit::SinkClosed => {
                        // The batch writer is gone; nothing left to feed.
                        warn!(shard = shard_id, "event sink closed, stopping shard");
                        break;
                    }
                    ReadExit::Disconnected(msg) => {
                        metrics.record_reconnect();
                        warn!(shard = shard_id, reason = %msg, delay_secs = delay.as_secs(), "connection lost, backing off");
                    }
                }
            }
            Ok(Err(e)) => {
                metrics.record_reconnect();
                error!(shard = shard_id, error = %e, delay_secs = delay.as_secs(), "connect failed");
            }
            Err(_) => {
                metrics.record_reconnect();
                error!(shard = shard_id, timeout_secs = CONNECT_TIMEOUT.as_secs(), "connect timed out");
            }
        }
        state = ConnState::Disconnected;

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
        delay = next_backoff(delay, max_backoff);
    }

    debug!(shard = shard_id, state = ?state, "shard task finished");
}

enum ReadExit {
    Shutdown,
    SinkClosed,
    Disconnected(String),
}

/// Read frames until the connection degrades. Sends an application ping on
/// the configured interval and after any 30 s receive gap; an unanswered
/// ping past the pong timeout closes the connection.
async fn read_loop<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    config: &Config,
    tx: &mpsc::Sender<KlineEvent>,
    metrics: &Arc<ShardMetrics>,
    shutdown: &mut watch::Receiver<bool>,
) -> ReadExit
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws.split();
    let ping_timeout = Duration::from_secs(config.ws_ping_timeout_secs.max(1));
    let mut ping_tick = tokio::time::interval(Duration::from_secs(config.ws_ping_interval_secs.max(1)));
    ping_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_tick.reset();

    let mut ping_sent_at: Option<Instant> = None;

    loop {
        if let Some(sent) = ping_sent_at {
            if sent.elapsed() > ping_timeout {
                return ReadExit::Disconnected("ping timeout".to_string());
            }
        }

        tokio::select! {
            frame = timeout(RECV_TIMEOUT, read.next()) => match frame {
                Ok(Some(Ok(msg))) => match msg {
                    Message::Text(text) => {
                        metrics.record_message();
                        match parse_kline_event(&text) {
                            ParseOutcome::Event(event) => {
                                // A full channel suspends this reader, which
                                // stalls TCP reads and lets the exchange
                                // throttle the feed.
                                if tx.send(event).await.is_err() {
                                    return ReadExit::SinkClosed;
                                }
                            }
                            ParseOutcome::Ignored => {}
                            ParseOutcome::Invalid(reason) => {
                                metrics.record_parse_error();
                                warn!(reason = %reason, "dropping invalid kline message");
                            }
                        }
                    }
                    Message::Pong(_) => {
                        ping_sent_at = None;
                    }
                    Message::Ping(payload) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            return ReadExit::Disconnected("pong send failed".to_string());
                        }
                    }
                    Message::Close(_) => {
                        return ReadExit::Disconnected("server close frame".to_string());
                    }
                    _ => {}
                },
                Ok(Some(Err(e))) => return ReadExit::Disconnected(format!("read error: {e}")),
                Ok(None) => return ReadExit::Disconnected("stream ended".to_string()),
                Err(_) => {
                    // 30 s without data: probe liveness.
                    if ping_sent_at.is_none() {
                        if write.send(Message::Ping(Vec::new())).await.is_err() {
                            return ReadExit::Disconnected("keepalive ping failed".to_string());
                        }
                        ping_sent_at = Some(Instant::now());
                    }
                }
            },
            _ = ping_tick.tick() => {
                if ping_sent_at.is_none() {
                    if write.send(Message::Ping(Vec::new())).await.is_err() {
                        return ReadExit::Disconnected("interval ping failed".to_string());
                    }
                    ping_sent_at = Some(Instant::now());
                }
            }
            _ = shutdown.changed() => {
                let _ = write.send(Message::Close(None)).await;
                return ReadExit::Shutdown;
            }
        }
    }
}

/// Validate + build the sharded connection URLs for a universe. Errors when
/// nothing is subscribable.
pub fn plan_connections(
    ws_base: &str,
    symbols: &[String],
    timeframes: &[String],
) -> Result<Vec<String>> {
    let streams = build_stream_names(symbols, timeframes);
    if streams.is_empty() {
        anyhow::bail!("no subscribable streams for the given symbols/timeframes");
    }
    let shards = shard_streams(&streams, MAX_STREAMS_PER_CONNECTION);
    info!(
        streams = streams.len(),
        connections = shards.len(),
        "planned WebSocket subscriptions"
    );
    Ok(shards
        .iter()
        .map(|shard| connection_url(ws_base, shard))
        .collect())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn stream_names_lowercase_and_mapped() {
        assert_eq!(
            stream_name("BTCUSDT", "1m").unwrap(),
            "btcusdt@kline_1m"
        );
        assert_eq!(stream_name("ETHUSDT", "1H").unwrap(), "ethusdt@kline_1h");
        assert!(stream_name("BTCUSDT", "7m").is_none());
    }

    #[test]
    fn unsupported_timeframes_rejected_at_subscribe_time() {
        let streams = build_stream_names(
            &strings(&["BTCUSDT", "ETHUSDT"]),
            &strings(&["1m", "2w", "1h"]),
        );
        assert_eq!(streams.len(), 4);
        assert!(streams.iter().all(|s| !s.contains("2w")));
    }

    #[test]
    fn single_stream_uses_ws_path() {
        let shard = strings(&["btcusdt@kline_1m"]);
        assert_eq!(
            connection_url("wss://fstream.binance.com", &shard),
            "wss://fstream.binance.com/ws/btcusdt@kline_1m"
        );
    }

    #[test]
    fn multi_stream_uses_stream_path() {
        let shard = strings(&["btcusdt@kline_1m", "ethusdt@kline_1m"]);
        assert_eq!(
            connection_url("wss://fstream.binance.com", &shard),
            "wss://fstream.binance.com/stream?streams=btcusdt@kline_1m/ethusdt@kline_1m"
        );
    }

    #[test]
    fn oversized_universe_shards_at_200() {
        let streams: Vec<String> = (0..450).map(|i| format!("sym{i}@kline_1m")).collect();
        let shards = shard_streams(&streams, MAX_STREAMS_PER_CONNECTION);
        assert_eq!(shards.len(), 3);
        assert_eq!(shards[0].len(), 200);
        assert_eq!(shards[2].len(), 50);
    }

    #[test]
    fn backoff_doubles_until_cap() {
        // Seed scenario: five consecutive failures from 1 s, capped at 60 s.
        let max = Duration::from_secs(60);
        let mut delay = Duration::from_secs(1);
        let mut observed = vec![delay.as_secs()];
        for _ in 0..5 {
            delay = next_backoff(delay, max);
            observed.push(delay.as_secs());
        }
        assert_eq!(observed, vec![1, 2, 4, 8, 16, 32]);

        // Two more failures hit the cap and stay there.
        delay = next_backoff(delay, max);
        assert_eq!(delay.as_secs(), 60);
        delay = next_backoff(delay, max);
        assert_eq!(delay.as_secs(), 60);
    }

    #[test]
    fn parses_single_stream_envelope() {
        let text = r#"{
            "e": "kline", "E": 1700000001000, "s": "BTCUSDT",
            "k": {
                "t": 1700000000000, "T": 1700000059999, "s": "BTCUSDT", "i": "1m",
                "o": "100.0", "h": "102.0", "l": "98.0", "c": "101.0", "v": "10.5",
                "x": false
            }
        }"#;
        let ParseOutcome::Event(ev) = parse_kline_event(text) else {
            panic!("expected event");
        };
        assert_eq!(ev.symbol, "BTCUSDT");
        assert_eq!(ev.timeframe, "1m");
        assert_eq!(ev.timestamp.timestamp(), 1_700_000_000);
        assert!(!ev.is_closed);
        assert!((ev.high - 102.0).abs() < 1e-9);
    }

    #[test]
    fn parses_multi_stream_envelope() {
        let text = r#"{
            "stream": "ethusdt@kline_5m",
            "data": {
                "e": "kline", "s": "ETHUSDT",
                "k": {
                    "t": 1700000000000, "T": 1700000299999, "s": "ETHUSDT", "i": "5m",
                    "o": "2000", "h": "2010", "l": "1990", "c": "2005", "v": "3.3",
                    "x": true
                }
            }
        }"#;
        let ParseOutcome::Event(ev) = parse_kline_event(text) else {
            panic!("expected event");
        };
        assert_eq!(ev.symbol, "ETHUSDT");
        assert_eq!(ev.timeframe, "5m");
        assert!(ev.is_closed);
    }

    #[test]
    fn non_kline_messages_ignored() {
        assert_eq!(
            parse_kline_event(r#"{"e":"aggTrade","s":"BTCUSDT"}"#),
            ParseOutcome::Ignored
        );
        assert_eq!(parse_kline_event(r#"{"result":null,"id":1}"#), ParseOutcome::Ignored);
    }

    #[test]
    fn invalid_prices_rejected() {
        let bad_price = r#"{
            "e": "kline", "s": "BTCUSDT",
            "k": {"t": 1700000000000, "i": "1m", "s": "BTCUSDT",
                  "o": "0", "h": "1", "l": "1", "c": "1", "v": "1", "x": true}
        }"#;
        assert!(matches!(parse_kline_event(bad_price), ParseOutcome::Invalid(_)));

        let inverted = r#"{
            "e": "kline", "s": "BTCUSDT",
            "k": {"t": 1700000000000, "i": "1m", "s": "BTCUSDT",
                  "o": "5", "h": "4", "l": "6", "c": "5", "v": "1", "x": true}
        }"#;
        assert!(matches!(parse_kline_event(inverted), ParseOutcome::Invalid(_)));

        assert!(matches!(
            parse_kline_event("not json at all"),
            ParseOutcome::Invalid(_)
        ));
    }
}

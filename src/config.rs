// =============================================================================
// Configuration — env-derived settings with serde defaults
// =============================================================================
//
// Every tunable lives here. Fields carry `#[serde(default = "...")]` so a
// partially specified config (or an older serialized snapshot) always loads;
// `Config::from_env()` layers environment overrides on top of the defaults.
// =============================================================================

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_binance_api_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_binance_ws_url() -> String {
    "wss://fstream.binance.com".to_string()
}

fn default_coingecko_api_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}

fn default_database_path() -> String {
    "fibwatch.db".to_string()
}

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_timeframe() -> String {
    "1h".to_string()
}

fn default_symbol_limit() -> u32 {
    500
}

fn default_market_data_limit() -> u32 {
    200
}

fn default_zero_f64() -> f64 {
    0.0
}

fn default_ws_batch_size() -> usize {
    100
}

fn default_ws_batch_timeout_secs() -> u64 {
    5
}

fn default_ws_max_reconnect_delay_secs() -> u64 {
    60
}

fn default_ws_ping_interval_secs() -> u64 {
    20
}

fn default_ws_ping_timeout_secs() -> u64 {
    10
}

fn default_db_batch_size() -> usize {
    500
}

fn default_http_timeout_secs() -> u64 {
    5
}

fn default_ingest_cycle_secs() -> u64 {
    60
}

fn default_universe_recheck_cycles() -> u32 {
    10
}

fn default_strategy_cycle_secs() -> u64 {
    300
}

fn default_rate_limit_retry_sleep_secs() -> u64 {
    60
}

fn default_zigzag_depth() -> usize {
    12
}

fn default_zigzag_deviation() -> f64 {
    5.0
}

fn default_zigzag_backstep() -> usize {
    2
}

fn default_swing_window() -> usize {
    2
}

fn default_swing_pruning_rate() -> f64 {
    0.03
}

fn default_bullish_fib_level_lower() -> f64 {
    0.618
}

fn default_bearish_fib_level() -> f64 {
    0.618
}

fn default_sl_fib_level() -> f64 {
    1.05
}

fn default_tp1_fib_level() -> f64 {
    0.5
}

fn default_tp2_fib_level() -> f64 {
    0.382
}

fn default_tp3_fib_level() -> f64 {
    0.236
}

fn default_confluence_epsilon() -> f64 {
    0.005
}

fn default_sr_window() -> usize {
    5
}

// =============================================================================
// StrategyParams
// =============================================================================

/// Tunable parameters for swing detection, Fibonacci levels, confluence
/// matching, and alert geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyParams {
    /// ZigZag++ look-back depth in bars.
    #[serde(default = "default_zigzag_depth")]
    pub zigzag_depth: usize,

    /// ZigZag++ minimum deviation, in ticks.
    #[serde(default = "default_zigzag_deviation")]
    pub zigzag_deviation: f64,

    /// ZigZag++ bars required before a direction change. Must be >= 2.
    #[serde(default = "default_zigzag_backstep")]
    pub zigzag_backstep: usize,

    /// Half-window for the simple local-extremum swing detector.
    #[serde(default = "default_swing_window")]
    pub swing_window: usize,

    /// Minimum price rate change between consecutive swings (0.03 = 3%).
    #[serde(default = "default_swing_pruning_rate")]
    pub swing_pruning_rate_default: f64,

    /// Per-symbol overrides of the pruning rate.
    #[serde(default)]
    pub swing_pruning_rates: HashMap<String, f64>,

    /// Bullish extension factor measured down from the right-side high.
    #[serde(default = "default_bullish_fib_level_lower")]
    pub bullish_fib_level_lower: f64,

    /// Bearish retracement factor measured up from the swing low.
    #[serde(default = "default_bearish_fib_level")]
    pub bearish_fib_level: f64,

    /// Stop-loss factor for long alerts (down from the swing high).
    #[serde(default = "default_sl_fib_level")]
    pub bullish_sl_fib_level: f64,

    /// Stop-loss factor for short alerts (up from the swing low).
    #[serde(default = "default_sl_fib_level")]
    pub bearish_sl_fib_level: f64,

    #[serde(default = "default_tp1_fib_level")]
    pub tp1_fib_level: f64,

    #[serde(default = "default_tp2_fib_level")]
    pub tp2_fib_level: f64,

    #[serde(default = "default_tp3_fib_level")]
    pub tp3_fib_level: f64,

    /// Relative distance under which a fib level counts as touching a
    /// higher-timeframe reference level.
    #[serde(default = "default_confluence_epsilon")]
    pub confluence_epsilon: f64,

    /// Bars inspected before a candidate support/resistance candle.
    #[serde(default = "default_sr_window")]
    pub sr_window_before: usize,

    /// Bars inspected after a candidate support/resistance candle.
    #[serde(default = "default_sr_window")]
    pub sr_window_after: usize,
}

impl StrategyParams {
    /// Pruning rate for `asset`, falling back to the default rate.
    pub fn pruning_rate(&self, asset: &str) -> f64 {
        self.swing_pruning_rates
            .get(asset)
            .copied()
            .unwrap_or(self.swing_pruning_rate_default)
    }
}

impl Default for StrategyParams {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty StrategyParams must deserialize")
    }
}

// =============================================================================
// Config
// =============================================================================

/// Engine configuration assembled from defaults and environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_binance_api_url")]
    pub binance_api_url: String,

    #[serde(default = "default_binance_ws_url")]
    pub binance_ws_url: String,

    #[serde(default = "default_coingecko_api_url")]
    pub coingecko_api_url: String,

    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Fallback universe when both discovery paths come back empty.
    #[serde(default = "default_symbols")]
    pub default_symbols: Vec<String>,

    #[serde(default = "default_timeframe")]
    pub default_timeframe: String,

    /// Klines fetched per symbol during REST backfill.
    #[serde(default = "default_symbol_limit")]
    pub symbol_limit: u32,

    /// Number of top market-cap entries requested from the metrics provider.
    #[serde(default = "default_market_data_limit")]
    pub market_data_limit: u32,

    /// Qualification floor on the latest market cap (0 disables).
    #[serde(default = "default_zero_f64")]
    pub min_market_cap: f64,

    /// Qualification floor on the latest 24h volume (0 disables).
    #[serde(default = "default_zero_f64")]
    pub min_volume_24h: f64,

    #[serde(default = "default_ws_batch_size")]
    pub ws_batch_size: usize,

    #[serde(default = "default_ws_batch_timeout_secs")]
    pub ws_batch_timeout_secs: u64,

    #[serde(default = "default_ws_max_reconnect_delay_secs")]
    pub ws_max_reconnect_delay_secs: u64,

    #[serde(default = "default_ws_ping_interval_secs")]
    pub ws_ping_interval_secs: u64,

    #[serde(default = "default_ws_ping_timeout_secs")]
    pub ws_ping_timeout_secs: u64,

    /// Max rows bound into a single bulk DB statement.
    #[serde(default = "default_db_batch_size")]
    pub db_batch_size: usize,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Nominal length of one ingestion cycle.
    #[serde(default = "default_ingest_cycle_secs")]
    pub ingest_cycle_secs: u64,

    /// Universe + timeframe re-check period, in ingestion cycles.
    #[serde(default = "default_universe_recheck_cycles")]
    pub universe_recheck_cycles: u32,

    #[serde(default = "default_strategy_cycle_secs")]
    pub strategy_cycle_secs: u64,

    /// Sleep before the single same-page retry after an HTTP 429.
    #[serde(default = "default_rate_limit_retry_sleep_secs")]
    pub rate_limit_retry_sleep_secs: u64,

    #[serde(default)]
    pub strategy: StrategyParams,
}

impl Default for Config {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty Config must deserialize")
    }
}

impl Config {
    /// Build a config from defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        if let Ok(v) = std::env::var("BINANCE_API_URL") {
            cfg.binance_api_url = v;
        }
        if let Ok(v) = std::env::var("BINANCE_WS_URL") {
            cfg.binance_ws_url = v;
        }
        if let Ok(v) = std::env::var("COINGECKO_API_URL") {
            cfg.coingecko_api_url = v;
        }
        if let Ok(v) = std::env::var("DATABASE_PATH") {
            cfg.database_path = v;
        }
        if let Ok(v) = std::env::var("DEFAULT_SYMBOLS") {
            let symbols: Vec<String> = v
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !symbols.is_empty() {
                cfg.default_symbols = symbols;
            }
        }
        if let Ok(v) = std::env::var("DEFAULT_TIMEFRAME") {
            cfg.default_timeframe = v;
        }

        env_parse("SYMBOL_LIMIT", &mut cfg.symbol_limit);
        env_parse("MARKET_DATA_LIMIT", &mut cfg.market_data_limit);
        env_parse("COINGECKO_MIN_MARKET_CAP", &mut cfg.min_market_cap);
        env_parse("COINGECKO_MIN_VOLUME_24H", &mut cfg.min_volume_24h);
        env_parse("WS_BATCH_SIZE", &mut cfg.ws_batch_size);
        env_parse("WS_BATCH_TIMEOUT", &mut cfg.ws_batch_timeout_secs);
        env_parse("WS_MAX_RECONNECT_DELAY", &mut cfg.ws_max_reconnect_delay_secs);
        env_parse("WS_PING_INTERVAL", &mut cfg.ws_ping_interval_secs);
        env_parse("WS_PING_TIMEOUT", &mut cfg.ws_ping_timeout_secs);
        env_parse("DB_BATCH_SIZE", &mut cfg.db_batch_size);
        env_parse("HTTP_TIMEOUT_SECS", &mut cfg.http_timeout_secs);
        env_parse("INGEST_CYCLE_SECS", &mut cfg.ingest_cycle_secs);
        env_parse("UNIVERSE_RECHECK_CYCLES", &mut cfg.universe_recheck_cycles);
        env_parse("STRATEGY_CYCLE_SECS", &mut cfg.strategy_cycle_secs);

        env_parse("STRATEGY_ZIGZAG_DEPTH", &mut cfg.strategy.zigzag_depth);
        env_parse("STRATEGY_ZIGZAG_DEVIATION", &mut cfg.strategy.zigzag_deviation);
        env_parse("STRATEGY_ZIGZAG_BACKSTEP", &mut cfg.strategy.zigzag_backstep);
        env_parse(
            "STRATEGY_SWING_PRUNING_RATE",
            &mut cfg.strategy.swing_pruning_rate_default,
        );
        env_parse(
            "STRATEGY_CONFLUENCE_EPSILON",
            &mut cfg.strategy.confluence_epsilon,
        );

        cfg
    }
}

/// Overwrite `target` with the parsed value of env var `key`, if present and
/// parseable. Unparseable values are logged and ignored.
fn env_parse<T: FromStr>(key: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse::<T>() {
            Ok(v) => *target = v,
            Err(_) => warn!(key, value = %raw, "ignoring unparseable env override"),
        }
    }
}

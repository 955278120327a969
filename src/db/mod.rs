// =============================================================================
// Persistence Gateway — SQLite-backed storage for candles, metrics, signals
// =============================================================================
//
// Every long-lived task opens its own `Database` handle (sessions are
// task-local); the symbol/timeframe ID caches are process-global and shared
// between handles through `Arc<IdCaches>`. On any statement failure the
// surrounding transaction rolls back and the error surfaces as
// `IngestError::Persistence`; the caller decides whether to retry or drop.
//
// Conflict policies:
//   backfill candles      INSERT ... ON CONFLICT DO NOTHING
//   closed candles        overwrite all OHLCV fields (last write wins)
//   in-progress candles   high = MAX(old, new), low = MIN(old, new),
//                         close/volume = new (preserve running extremes)
//   market metrics        full replace on (symbol_id, timestamp)
//   trading signals       INSERT ... ON CONFLICT DO NOTHING
// =============================================================================

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::error::{IngestError, Result};
use crate::types::{Alert, Bar, KlineEvent, Swing};

/// Quote assets recognized by the greedy base/quote suffix split, in match
/// priority order.
pub const KNOWN_QUOTE_ASSETS: &[&str] = &[
    "USDT", "USDC", "BUSD", "BTC", "ETH", "BNB", "USD", "EUR", "TRY", "BIDR",
];

/// Timeframes seeded into an empty `timeframe` table.
pub const DEFAULT_TIMEFRAMES: &[(&str, i64)] = &[
    ("1m", 60),
    ("5m", 300),
    ("15m", 900),
    ("1h", 3_600),
    ("4h", 14_400),
];

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS symbols (
    symbol_id    INTEGER PRIMARY KEY,
    symbol_name  TEXT NOT NULL UNIQUE,
    base_asset   TEXT NOT NULL,
    quote_asset  TEXT NOT NULL,
    image_path   TEXT,
    updated_at   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS timeframe (
    timeframe_id INTEGER PRIMARY KEY,
    tf_name      TEXT NOT NULL UNIQUE,
    seconds      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS ohlcv_candles (
    id           INTEGER PRIMARY KEY,
    symbol_id    INTEGER NOT NULL REFERENCES symbols(symbol_id),
    timeframe_id INTEGER NOT NULL REFERENCES timeframe(timeframe_id),
    timestamp    INTEGER NOT NULL,
    open         REAL NOT NULL,
    high         REAL NOT NULL,
    low          REAL NOT NULL,
    close        REAL NOT NULL,
    volume       REAL NOT NULL,
    UNIQUE (symbol_id, timeframe_id, timestamp)
);

CREATE INDEX IF NOT EXISTS idx_candles_series
    ON ohlcv_candles(symbol_id, timeframe_id, timestamp DESC);

CREATE TABLE IF NOT EXISTS market_data (
    id                 INTEGER PRIMARY KEY,
    symbol_id          INTEGER NOT NULL REFERENCES symbols(symbol_id),
    timestamp          INTEGER NOT NULL,
    market_cap         REAL,
    volume_24h         REAL,
    circulating_supply REAL,
    price              REAL,
    UNIQUE (symbol_id, timestamp)
);

CREATE TABLE IF NOT EXISTS swing_points (
    id           INTEGER PRIMARY KEY,
    symbol_id    INTEGER NOT NULL REFERENCES symbols(symbol_id),
    timeframe_id INTEGER NOT NULL REFERENCES timeframe(timeframe_id),
    timestamp    INTEGER NOT NULL,
    price        REAL NOT NULL,
    type         TEXT NOT NULL,
    strength     INTEGER NOT NULL DEFAULT 1,
    UNIQUE (symbol_id, timeframe_id, timestamp, type)
);

CREATE TABLE IF NOT EXISTS support_resistance (
    id           INTEGER PRIMARY KEY,
    symbol_id    INTEGER NOT NULL REFERENCES symbols(symbol_id),
    timeframe_id INTEGER NOT NULL REFERENCES timeframe(timeframe_id),
    level        REAL NOT NULL,
    type         TEXT NOT NULL,
    is_active    INTEGER NOT NULL DEFAULT 1,
    timestamp    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS trading_signals (
    signal_id        TEXT PRIMARY KEY,
    asset            TEXT NOT NULL,
    timeframe        TEXT NOT NULL,
    trend_type       TEXT NOT NULL,
    entry_level      REAL NOT NULL,
    sl               REAL NOT NULL,
    tp1              REAL NOT NULL,
    tp2              REAL NOT NULL,
    tp3              REAL NOT NULL,
    swing_low_price  REAL NOT NULL,
    swing_high_price REAL NOT NULL,
    swing_low_ts     INTEGER NOT NULL,
    swing_high_ts    INTEGER NOT NULL,
    risk_score       INTEGER NOT NULL,
    created_at       INTEGER NOT NULL,
    UNIQUE (asset, timeframe, trend_type, swing_low_ts, swing_high_ts)
);
"#;

/// One row of refreshed market metrics for a symbol.
#[derive(Debug, Clone, Default)]
pub struct MarketMetricsRow {
    pub symbol: String,
    pub image_path: Option<String>,
    pub market_cap: Option<f64>,
    pub volume_24h: Option<f64>,
    pub circulating_supply: Option<f64>,
    pub price: Option<f64>,
}

/// Process-global, read-mostly memoization of symbol and timeframe IDs.
/// Writes happen only on first resolution and are idempotent.
#[derive(Debug, Default)]
pub struct IdCaches {
    symbols: RwLock<HashMap<String, i64>>,
    timeframes: RwLock<HashMap<String, i64>>,
}

/// A task-local database session sharing the process-global ID caches.
pub struct Database {
    conn: Mutex<Connection>,
    caches: Arc<IdCaches>,
}

/// Split a trading symbol into base and quote assets by greedy suffix match.
/// Falls back to `(symbol, "USD")` when no known quote asset matches.
pub fn split_symbol_components(symbol: &str) -> (String, String) {
    for quote in KNOWN_QUOTE_ASSETS {
        if symbol.len() > quote.len() && symbol.ends_with(quote) {
            return (
                symbol[..symbol.len() - quote.len()].to_string(),
                (*quote).to_string(),
            );
        }
    }
    (symbol.to_string(), "USD".to_string())
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

impl Database {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>, caches: Arc<IdCaches>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
            caches,
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory(caches: Arc<IdCaches>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
            caches,
        })
    }

    /// Create the contract tables if absent and seed the timeframe table when
    /// it is empty.
    pub fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(SCHEMA_SQL)?;

        let tf_count: i64 = conn.query_row("SELECT COUNT(*) FROM timeframe", [], |r| r.get(0))?;
        if tf_count == 0 {
            let mut stmt =
                conn.prepare("INSERT INTO timeframe (tf_name, seconds) VALUES (?1, ?2)")?;
            for (name, seconds) in DEFAULT_TIMEFRAMES {
                stmt.execute(params![name, seconds])?;
            }
            info!(count = DEFAULT_TIMEFRAMES.len(), "seeded timeframe table");
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Symbol / timeframe resolution
    // -------------------------------------------------------------------------

    /// Resolve (creating if needed) the ID for `symbol`. `image_path` is
    /// applied only when non-empty and different from the stored value; an
    /// existing image is never cleared.
    pub fn get_or_create_symbol(&self, symbol: &str, image_path: Option<&str>) -> Result<i64> {
        let image = image_path.filter(|p| !p.is_empty());

        let cached = self.caches.symbols.read().get(symbol).copied();
        if let Some(id) = cached {
            if let Some(img) = image {
                let conn = self.conn.lock();
                conn.execute(
                    "UPDATE symbols
                     SET image_path = ?1, updated_at = ?2
                     WHERE symbol_id = ?3
                       AND (image_path IS NULL OR image_path != ?1)",
                    params![img, now_ts(), id],
                )?;
            }
            return Ok(id);
        }

        let (base, quote) = split_symbol_components(symbol);
        let conn = self.conn.lock();
        let id: i64 = conn.query_row(
            "INSERT INTO symbols (symbol_name, base_asset, quote_asset, image_path, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (symbol_name) DO UPDATE SET
                 image_path = COALESCE(excluded.image_path, symbols.image_path),
                 updated_at = excluded.updated_at
             RETURNING symbol_id",
            params![symbol, base, quote, image, now_ts()],
            |r| r.get(0),
        )?;
        drop(conn);

        self.caches.symbols.write().insert(symbol.to_string(), id);
        Ok(id)
    }

    /// Resolve the ID of a timeframe name, memoized. Returns `None` for a
    /// timeframe the table does not carry.
    pub fn get_timeframe_id(&self, tf_name: &str) -> Result<Option<i64>> {
        if let Some(id) = self.caches.timeframes.read().get(tf_name).copied() {
            return Ok(Some(id));
        }

        let conn = self.conn.lock();
        let id: Option<i64> = conn
            .query_row(
                "SELECT timeframe_id FROM timeframe WHERE tf_name = ?1",
                params![tf_name],
                |r| r.get(0),
            )
            .optional()?;
        drop(conn);

        if let Some(id) = id {
            self.caches
                .timeframes
                .write()
                .insert(tf_name.to_string(), id);
        }
        Ok(id)
    }

    // -------------------------------------------------------------------------
    // Candles
    // -------------------------------------------------------------------------

    /// Insert backfilled bars, skipping rows that already exist. Returns the
    /// number of rows submitted.
    pub fn save_candles_idempotent(
        &self,
        symbol: &str,
        timeframe: &str,
        bars: &[Bar],
    ) -> Result<usize> {
        if bars.is_empty() {
            return Ok(0);
        }
        let symbol_id = self.get_or_create_symbol(symbol, None)?;
        let timeframe_id = self
            .get_timeframe_id(timeframe)?
            .ok_or_else(|| IngestError::Validation(format!("unknown timeframe {timeframe}")))?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO ohlcv_candles
                     (symbol_id, timeframe_id, timestamp, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (symbol_id, timeframe_id, timestamp) DO NOTHING",
            )?;
            for bar in bars {
                stmt.execute(params![
                    symbol_id,
                    timeframe_id,
                    bar.ts,
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                ])?;
            }
        }
        tx.commit()?;
        debug!(symbol, timeframe, count = bars.len(), "backfill bars saved");
        Ok(bars.len())
    }

    /// Upsert a batch of live kline events sharing the same closed-status.
    ///
    /// Closed bars overwrite all OHLCV fields; in-progress bars keep the
    /// running extremes (`high = MAX`, `low = MIN`) and take the newest
    /// close/volume. Returns `(saved, skipped)`; rows whose timeframe cannot
    /// be resolved are skipped, not fatal.
    pub fn save_candles_merge(&self, events: &[KlineEvent], closed: bool) -> Result<(usize, usize)> {
        if events.is_empty() {
            return Ok((0, 0));
        }

        // Resolve IDs once per (symbol, timeframe) before entering the
        // transaction.
        let mut ids: HashMap<(String, String), (i64, i64)> = HashMap::new();
        let mut skipped = 0usize;
        for ev in events {
            let key = (ev.symbol.clone(), ev.timeframe.clone());
            if ids.contains_key(&key) {
                continue;
            }
            let symbol_id = self.get_or_create_symbol(&ev.symbol, None)?;
            match self.get_timeframe_id(&ev.timeframe)? {
                Some(tf_id) => {
                    ids.insert(key, (symbol_id, tf_id));
                }
                None => {
                    warn!(symbol = %ev.symbol, timeframe = %ev.timeframe, "skipping candle with unknown timeframe");
                }
            }
        }

        let sql = if closed {
            "INSERT INTO ohlcv_candles
                 (symbol_id, timeframe_id, timestamp, open, high, low, close, volume)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (symbol_id, timeframe_id, timestamp) DO UPDATE SET
                 open = excluded.open,
                 high = excluded.high,
                 low = excluded.low,
                 close = excluded.close,
                 volume = excluded.volume"
        } else {
            "INSERT INTO ohlcv_candles
                 (symbol_id, timeframe_id, timestamp, open, high, low, close, volume)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (symbol_id, timeframe_id, timestamp) DO UPDATE SET
                 high = MAX(ohlcv_candles.high, excluded.high),
                 low = MIN(ohlcv_candles.low, excluded.low),
                 close = excluded.close,
                 volume = excluded.volume"
        };

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut saved = 0usize;
        {
            let mut stmt = tx.prepare(sql)?;
            for ev in events {
                let key = (ev.symbol.clone(), ev.timeframe.clone());
                let Some((symbol_id, timeframe_id)) = ids.get(&key) else {
                    skipped += 1;
                    continue;
                };
                stmt.execute(params![
                    symbol_id,
                    timeframe_id,
                    ev.timestamp.timestamp(),
                    ev.open,
                    ev.high,
                    ev.low,
                    ev.close,
                    ev.volume
                ])?;
                saved += 1;
            }
        }
        tx.commit()?;
        Ok((saved, skipped))
    }

    /// Ascending bar series for analysis: the latest `limit` bars for a
    /// symbol/timeframe pair, oldest first.
    pub fn load_recent_bars(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Bar>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT c.timestamp, c.open, c.high, c.low, c.close, c.volume
             FROM ohlcv_candles c
             JOIN symbols s ON s.symbol_id = c.symbol_id
             JOIN timeframe t ON t.timeframe_id = c.timeframe_id
             WHERE s.symbol_name = ?1 AND t.tf_name = ?2
             ORDER BY c.timestamp DESC
             LIMIT ?3",
        )?;
        let mut bars: Vec<Bar> = stmt
            .query_map(params![symbol, timeframe, limit as i64], |r| {
                Ok(Bar {
                    ts: r.get(0)?,
                    open: r.get(1)?,
                    high: r.get(2)?,
                    low: r.get(3)?,
                    close: r.get(4)?,
                    volume: r.get(5)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;
        bars.reverse();
        Ok(bars)
    }

    // -------------------------------------------------------------------------
    // Market metrics
    // -------------------------------------------------------------------------

    /// Upsert one metrics row per symbol at `timestamp` (UNIX seconds).
    /// Rows with no usable fields are skipped. Returns `(saved, skipped)`.
    pub fn save_market_metrics(
        &self,
        rows: &[MarketMetricsRow],
        timestamp: i64,
    ) -> Result<(usize, usize)> {
        let mut saved = 0usize;
        let mut skipped = 0usize;

        // Resolve symbol IDs (and apply image updates) outside the write
        // transaction.
        let mut resolved: Vec<(i64, &MarketMetricsRow)> = Vec::with_capacity(rows.len());
        for row in rows {
            if row.market_cap.is_none()
                && row.volume_24h.is_none()
                && row.circulating_supply.is_none()
                && row.price.is_none()
            {
                skipped += 1;
                continue;
            }
            let id = self.get_or_create_symbol(&row.symbol, row.image_path.as_deref())?;
            resolved.push((id, row));
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO market_data
                     (symbol_id, timestamp, market_cap, volume_24h, circulating_supply, price)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (symbol_id, timestamp) DO UPDATE SET
                     market_cap = excluded.market_cap,
                     volume_24h = excluded.volume_24h,
                     circulating_supply = excluded.circulating_supply,
                     price = excluded.price",
            )?;
            for (symbol_id, row) in &resolved {
                stmt.execute(params![
                    symbol_id,
                    timestamp,
                    row.market_cap,
                    row.volume_24h,
                    row.circulating_supply,
                    row.price
                ])?;
                saved += 1;
            }
        }
        tx.commit()?;
        Ok((saved, skipped))
    }

    /// Symbols that already carry at least one market_data row, ordered by
    /// name. The hourly refresher re-fetches metrics for exactly this set.
    pub fn symbols_with_market_data(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT s.symbol_name
             FROM symbols s
             JOIN market_data md ON md.symbol_id = s.symbol_id
             ORDER BY s.symbol_name",
        )?;
        let symbols = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(symbols)
    }

    /// Symbols whose latest metrics row has both market cap and 24h volume,
    /// above the configured floors, ordered by market cap descending.
    pub fn list_qualified_symbols(&self, min_cap: f64, min_volume: f64) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT s.symbol_name
             FROM symbols s
             JOIN market_data md ON md.symbol_id = s.symbol_id
             WHERE md.timestamp = (
                     SELECT MAX(m2.timestamp) FROM market_data m2
                     WHERE m2.symbol_id = s.symbol_id)
               AND md.market_cap IS NOT NULL
               AND md.volume_24h IS NOT NULL
               AND md.market_cap >= ?1
               AND md.volume_24h >= ?2
             ORDER BY md.market_cap DESC, s.symbol_name",
        )?;
        let symbols = stmt
            .query_map(params![min_cap, min_volume], |r| r.get::<_, String>(0))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(symbols)
    }

    /// All timeframes ordered by bar length ascending.
    pub fn list_timeframes_asc(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT tf_name, seconds FROM timeframe ORDER BY seconds ASC")?;
        let tfs = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(tfs)
    }

    // -------------------------------------------------------------------------
    // Derived structures
    // -------------------------------------------------------------------------

    /// Replace the swing set for a symbol/timeframe with the latest analysis
    /// result. Derived points are recomputed every cycle, so the previous set
    /// is simply discarded.
    pub fn save_swing_points(&self, symbol: &str, timeframe: &str, swings: &[Swing]) -> Result<()> {
        let symbol_id = self.get_or_create_symbol(symbol, None)?;
        let timeframe_id = self
            .get_timeframe_id(timeframe)?
            .ok_or_else(|| IngestError::Validation(format!("unknown timeframe {timeframe}")))?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM swing_points WHERE symbol_id = ?1 AND timeframe_id = ?2",
            params![symbol_id, timeframe_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO swing_points (symbol_id, timeframe_id, timestamp, price, type, strength)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1)
                 ON CONFLICT (symbol_id, timeframe_id, timestamp, type) DO UPDATE SET
                     price = excluded.price",
            )?;
            for swing in swings {
                stmt.execute(params![
                    symbol_id,
                    timeframe_id,
                    swing.ts,
                    swing.price,
                    swing.kind.to_string()
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Persist an alert. Returns `false` when an identical alert (same asset,
    /// timeframe, direction, and swing pair) already exists.
    pub fn save_alert(&self, alert: &Alert) -> Result<bool> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT INTO trading_signals
                 (signal_id, asset, timeframe, trend_type, entry_level, sl, tp1, tp2, tp3,
                  swing_low_price, swing_high_price, swing_low_ts, swing_high_ts,
                  risk_score, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT (asset, timeframe, trend_type, swing_low_ts, swing_high_ts)
                 DO NOTHING",
            params![
                alert.id,
                alert.asset,
                alert.timeframe,
                alert.trend_type.to_string(),
                alert.entry_level,
                alert.sl,
                alert.tp1,
                alert.tp2,
                alert.tp3,
                alert.swing_low_price,
                alert.swing_high_price,
                alert.swing_low_ts,
                alert.swing_high_ts,
                alert.risk_score,
                now_ts()
            ],
        )?;
        Ok(inserted > 0)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SwingKind;
    use chrono::{TimeZone, Utc};

    fn test_db() -> Database {
        let db = Database::open_in_memory(Arc::new(IdCaches::default())).unwrap();
        db.init_schema().unwrap();
        db
    }

    fn event(symbol: &str, tf: &str, ts: i64, o: f64, h: f64, l: f64, c: f64, v: f64, closed: bool) -> KlineEvent {
        KlineEvent {
            symbol: symbol.to_string(),
            timeframe: tf.to_string(),
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: v,
            is_closed: closed,
        }
    }

    fn load_row(db: &Database, symbol: &str, tf: &str, ts: i64) -> Bar {
        let bars = db.load_recent_bars(symbol, tf, 10).unwrap();
        bars.into_iter().find(|b| b.ts == ts).expect("row missing")
    }

    #[test]
    fn symbol_split_greedy_suffix() {
        assert_eq!(
            split_symbol_components("BTCUSDT"),
            ("BTC".to_string(), "USDT".to_string())
        );
        assert_eq!(
            split_symbol_components("ETHBTC"),
            ("ETH".to_string(), "BTC".to_string())
        );
        // No recognizable quote: full name + USD fallback.
        assert_eq!(
            split_symbol_components("WEIRD"),
            ("WEIRD".to_string(), "USD".to_string())
        );
        // A bare quote asset must not split into an empty base.
        assert_eq!(
            split_symbol_components("USDT"),
            ("USDT".to_string(), "USD".to_string())
        );
    }

    #[test]
    fn get_or_create_symbol_is_idempotent_and_memoized() {
        let db = test_db();
        let a = db.get_or_create_symbol("BTCUSDT", None).unwrap();
        let b = db.get_or_create_symbol("BTCUSDT", None).unwrap();
        assert_eq!(a, b);
        assert!(db.caches.symbols.read().contains_key("BTCUSDT"));
    }

    #[test]
    fn image_path_updates_monotonically() {
        let db = test_db();
        let id = db.get_or_create_symbol("BTCUSDT", Some("img/btc.png")).unwrap();
        // Empty update must not clear the stored image.
        db.get_or_create_symbol("BTCUSDT", Some("")).unwrap();
        db.get_or_create_symbol("BTCUSDT", None).unwrap();

        let conn = db.conn.lock();
        let image: Option<String> = conn
            .query_row(
                "SELECT image_path FROM symbols WHERE symbol_id = ?1",
                params![id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(image.as_deref(), Some("img/btc.png"));
    }

    #[test]
    fn timeframe_lookup_memoized() {
        let db = test_db();
        assert!(db.get_timeframe_id("1m").unwrap().is_some());
        assert!(db.caches.timeframes.read().contains_key("1m"));
        assert!(db.get_timeframe_id("9h").unwrap().is_none());
    }

    #[test]
    fn idempotent_backfill_keeps_first_write() {
        let db = test_db();
        let bar = Bar {
            ts: 1_700_000_000,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 10.0,
        };
        let changed = Bar { close: 777.0, ..bar };
        db.save_candles_idempotent("BTCUSDT", "1m", &[bar]).unwrap();
        db.save_candles_idempotent("BTCUSDT", "1m", &[changed]).unwrap();

        let row = load_row(&db, "BTCUSDT", "1m", bar.ts);
        assert!((row.close - 100.5).abs() < f64::EPSILON);
    }

    #[test]
    fn closed_candle_flush_is_last_write_wins() {
        let db = test_db();
        let ts = 1_700_000_000;
        let first = event("BTCUSDT", "1m", ts, 100.0, 105.0, 95.0, 101.0, 5.0, true);
        let second = event("BTCUSDT", "1m", ts, 100.0, 102.0, 98.0, 101.5, 10.0, true);
        db.save_candles_merge(&[first], true).unwrap();
        db.save_candles_merge(&[second], true).unwrap();

        let row = load_row(&db, "BTCUSDT", "1m", ts);
        assert!((row.high - 102.0).abs() < f64::EPSILON);
        assert!((row.low - 98.0).abs() < f64::EPSILON);
        assert!((row.close - 101.5).abs() < f64::EPSILON);
        assert!((row.volume - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn in_progress_merge_preserves_running_extremes() {
        // Seed scenario: two live updates then the closed bar.
        let db = test_db();
        let ts = 1_700_000_000;
        db.save_candles_merge(
            &[event("BTCUSDT", "1m", ts, 100.0, 101.0, 99.0, 100.5, 3.0, false)],
            false,
        )
        .unwrap();
        db.save_candles_merge(
            &[event("BTCUSDT", "1m", ts, 100.0, 102.0, 98.0, 101.0, 6.0, false)],
            false,
        )
        .unwrap();

        // A later live update with a narrower range must not shrink extremes.
        db.save_candles_merge(
            &[event("BTCUSDT", "1m", ts, 100.0, 100.2, 99.8, 100.1, 7.0, false)],
            false,
        )
        .unwrap();
        let live = load_row(&db, "BTCUSDT", "1m", ts);
        assert!((live.high - 102.0).abs() < f64::EPSILON);
        assert!((live.low - 98.0).abs() < f64::EPSILON);
        assert!((live.close - 100.1).abs() < f64::EPSILON);

        // The closed bar replaces everything.
        db.save_candles_merge(
            &[event("BTCUSDT", "1m", ts, 100.0, 102.0, 98.0, 101.5, 10.0, true)],
            true,
        )
        .unwrap();
        let closed = load_row(&db, "BTCUSDT", "1m", ts);
        assert!((closed.open - 100.0).abs() < f64::EPSILON);
        assert!((closed.high - 102.0).abs() < f64::EPSILON);
        assert!((closed.low - 98.0).abs() < f64::EPSILON);
        assert!((closed.close - 101.5).abs() < f64::EPSILON);
        assert!((closed.volume - 10.0).abs() < f64::EPSILON);

        // Exactly one row for the bar.
        let bars = db.load_recent_bars("BTCUSDT", "1m", 10).unwrap();
        assert_eq!(bars.len(), 1);
    }

    #[test]
    fn qualified_symbols_ordered_by_latest_market_cap() {
        let db = test_db();
        let rows = vec![
            MarketMetricsRow {
                symbol: "ETHUSDT".to_string(),
                market_cap: Some(400e9),
                volume_24h: Some(1e9),
                price: Some(3000.0),
                ..Default::default()
            },
            MarketMetricsRow {
                symbol: "BTCUSDT".to_string(),
                market_cap: Some(900e9),
                volume_24h: Some(2e9),
                price: Some(45000.0),
                ..Default::default()
            },
            // Volume missing: must not qualify.
            MarketMetricsRow {
                symbol: "FOOUSDT".to_string(),
                market_cap: Some(1e9),
                price: Some(1.0),
                ..Default::default()
            },
        ];
        db.save_market_metrics(&rows, 1_700_000_000).unwrap();

        let qualified = db.list_qualified_symbols(0.0, 0.0).unwrap();
        assert_eq!(qualified, vec!["BTCUSDT", "ETHUSDT"]);

        // Floors filter out the smaller cap.
        let big_only = db.list_qualified_symbols(500e9, 0.0).unwrap();
        assert_eq!(big_only, vec!["BTCUSDT"]);
    }

    #[test]
    fn market_metrics_rewrite_same_timestamp_replaces() {
        let db = test_db();
        let mk = |cap: f64| MarketMetricsRow {
            symbol: "BTCUSDT".to_string(),
            market_cap: Some(cap),
            volume_24h: Some(1e9),
            ..Default::default()
        };
        db.save_market_metrics(&[mk(1.0)], 1_700_000_000).unwrap();
        db.save_market_metrics(&[mk(2.0)], 1_700_000_000).unwrap();

        let conn = db.conn.lock();
        let (count, cap): (i64, f64) = conn
            .query_row(
                "SELECT COUNT(*), MAX(market_cap) FROM market_data",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert!((cap - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn timeframes_listed_ascending_by_seconds() {
        let db = test_db();
        let tfs = db.list_timeframes_asc().unwrap();
        let names: Vec<&str> = tfs.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["1m", "5m", "15m", "1h", "4h"]);
        assert!(tfs.windows(2).all(|w| w[0].1 < w[1].1));
    }

    #[test]
    fn swing_points_replaced_per_cycle() {
        let db = test_db();
        let swings = vec![
            Swing { kind: SwingKind::Low, ts: 1, price: 100.0 },
            Swing { kind: SwingKind::High, ts: 2, price: 110.0 },
        ];
        db.save_swing_points("BTCUSDT", "1h", &swings).unwrap();
        db.save_swing_points("BTCUSDT", "1h", &swings[..1]).unwrap();

        let conn = db.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM swing_points", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn alert_insert_is_idempotent() {
        let db = test_db();
        let alert = Alert {
            id: "a-1".to_string(),
            timeframe: "1h".to_string(),
            trend_type: crate::types::TrendType::Long,
            asset: "BTCUSDT".to_string(),
            entry_level: 138.2,
            sl: 95.0,
            tp1: 150.0,
            tp2: 161.8,
            tp3: 176.4,
            swing_low_price: 100.0,
            swing_high_price: 200.0,
            swing_low_ts: 10,
            swing_high_ts: 20,
            risk_score: 2,
        };
        assert!(db.save_alert(&alert).unwrap());

        let dup = Alert { id: "a-2".to_string(), ..alert };
        assert!(!db.save_alert(&dup).unwrap());
    }
}

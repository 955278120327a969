// =============================================================================
// Shared types used across the FibWatch ingestion and analytics engine
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single kline update parsed from the exchange WebSocket feed.
///
/// `timestamp` is the UTC open time of the bar. `is_closed` distinguishes a
/// final bar (`x == true` in the exchange payload) from a live in-progress
/// update for the same bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KlineEvent {
    pub symbol: String,
    pub timeframe: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub is_closed: bool,
}

/// An OHLCV bar as loaded back from storage for analysis.
///
/// `ts` is the bar's open time in UNIX seconds (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A `(timestamp, price)` anchor point produced by swing detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub ts: i64,
    pub price: f64,
}

/// Whether a swing anchors a local maximum or a local minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwingKind {
    High,
    Low,
}

impl std::fmt::Display for SwingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "swing_high"),
            Self::Low => write!(f, "swing_low"),
        }
    }
}

/// A typed swing point, before splitting into separate high/low series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Swing {
    pub kind: SwingKind,
    pub ts: i64,
    pub price: f64,
}

/// Directional kind of a Fibonacci level.
///
/// `Bull` is an extension below a right-side high; `Bear` is a retracement
/// above a left-side high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FibKind {
    Bull,
    Bear,
}

impl std::fmt::Display for FibKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bull => write!(f, "bull"),
            Self::Bear => write!(f, "bear"),
        }
    }
}

/// A Fibonacci level derived from a paired swing low and swing high.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FibResult {
    pub timeframe: String,
    pub swing_low: SwingPoint,
    pub swing_high: SwingPoint,
    pub fib_level: f64,
    pub fib_kind: FibKind,
}

/// Confluence grade derived from the number of higher-timeframe matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfluenceMark {
    None,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ConfluenceMark {
    /// Map a raw (uncapped) match count to a grade.
    pub fn from_match_count(count: usize) -> Self {
        match count {
            0 => Self::None,
            1 => Self::Low,
            2 => Self::Medium,
            3 => Self::High,
            _ => Self::VeryHigh,
        }
    }
}

impl std::fmt::Display for ConfluenceMark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::VeryHigh => write!(f, "very_high"),
        }
    }
}

/// A Fibonacci level after confirmation against higher-timeframe structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmedFibResult {
    pub fib: FibResult,
    pub match_4h: bool,
    pub match_1h: bool,
    pub match_both: bool,
    /// Match flags for higher timeframes other than 4h/1h, keyed by tf name.
    pub additional_matches: HashMap<String, bool>,
    pub confluence_mark: ConfluenceMark,
    /// Matching higher-timeframe count, capped at 3.
    pub confluence_count: u32,
}

/// Trade direction of an emitted alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendType {
    Long,
    Short,
}

impl std::fmt::Display for TrendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// A directional trading alert with stop-loss and take-profit targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub timeframe: String,
    pub trend_type: TrendType,
    pub asset: String,
    pub entry_level: f64,
    pub sl: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub tp3: f64,
    pub swing_low_price: f64,
    pub swing_high_price: f64,
    pub swing_low_ts: i64,
    pub swing_high_ts: i64,
    pub risk_score: u32,
}

// =============================================================================
// Timeframe <-> Binance interval mapping
// =============================================================================
//
// Binance kline streams accept exactly these intervals:
//   1m 3m 5m 15m 30m 1h 2h 4h 6h 8h 12h 1d 3d 1w 1M
// Everything else must be rejected before a subscribe is attempted. "1M"
// (month) is the only case-sensitive entry; all others normalize to
// lowercase.

/// `(interval, seconds)` for every interval Binance supports.
const INTERVALS: &[(&str, i64)] = &[
    ("1m", 60),
    ("3m", 180),
    ("5m", 300),
    ("15m", 900),
    ("30m", 1_800),
    ("1h", 3_600),
    ("2h", 7_200),
    ("4h", 14_400),
    ("6h", 21_600),
    ("8h", 28_800),
    ("12h", 43_200),
    ("1d", 86_400),
    ("3d", 259_200),
    ("1w", 604_800),
    ("1M", 2_592_000),
];

/// Map a timeframe name to the Binance interval string, or `None` when the
/// exchange does not support it.
pub fn to_binance_interval(timeframe: &str) -> Option<&'static str> {
    let normalized = if timeframe == "1M" {
        "1M".to_string()
    } else {
        timeframe.to_lowercase()
    };
    INTERVALS
        .iter()
        .find(|(name, _)| *name == normalized)
        .map(|(name, _)| *name)
}

/// Bar length in seconds for a supported timeframe.
pub fn interval_seconds(timeframe: &str) -> Option<i64> {
    let mapped = to_binance_interval(timeframe)?;
    INTERVALS
        .iter()
        .find(|(name, _)| *name == mapped)
        .map(|(_, secs)| *secs)
}

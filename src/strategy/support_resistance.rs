// =============================================================================
// Support / Resistance — windowed extremum level detection
// =============================================================================
//
// A candle forms support when its reference price is the lowest across
// `before` candles back and `after` candles forward; resistance mirrors with
// the highest. Lower timeframes reference the wick (low/high); higher
// timeframes reference the body (open/close), which filters wick noise.
// =============================================================================

use crate::types::Bar;

/// True when the candle at `idx` forms a support level. `None` when the
/// window does not fit inside the series.
pub fn is_support(
    bars: &[Bar],
    idx: usize,
    before: usize,
    after: usize,
    high_timeframe: bool,
) -> Option<bool> {
    if bars.is_empty() || idx < before || idx + after >= bars.len() {
        return None;
    }
    let price = |b: &Bar| if high_timeframe { b.open } else { b.low };
    let candidate = price(&bars[idx]);

    for b in &bars[idx - before..idx] {
        if price(b) < candidate {
            return Some(false);
        }
    }
    for b in &bars[idx + 1..=idx + after] {
        if price(b) < candidate {
            return Some(false);
        }
    }
    Some(true)
}

/// True when the candle at `idx` forms a resistance level. `None` when the
/// window does not fit inside the series.
pub fn is_resistance(
    bars: &[Bar],
    idx: usize,
    before: usize,
    after: usize,
    high_timeframe: bool,
) -> Option<bool> {
    if bars.is_empty() || idx < before || idx + after >= bars.len() {
        return None;
    }
    let price = |b: &Bar| if high_timeframe { b.close } else { b.high };
    let candidate = price(&bars[idx]);

    for b in &bars[idx - before..idx] {
        if price(b) > candidate {
            return Some(false);
        }
    }
    for b in &bars[idx + 1..=idx + after] {
        if price(b) > candidate {
            return Some(false);
        }
    }
    Some(true)
}

/// Scan a bar series and collect all support and resistance price levels.
pub fn collect_levels(
    bars: &[Bar],
    before: usize,
    after: usize,
    high_timeframe: bool,
) -> (Vec<f64>, Vec<f64>) {
    let mut supports = Vec::new();
    let mut resistances = Vec::new();

    for idx in 0..bars.len() {
        if is_support(bars, idx, before, after, high_timeframe) == Some(true) {
            supports.push(if high_timeframe { bars[idx].open } else { bars[idx].low });
        }
        if is_resistance(bars, idx, before, after, high_timeframe) == Some(true) {
            resistances.push(if high_timeframe { bars[idx].close } else { bars[idx].high });
        }
    }
    (supports, resistances)
}

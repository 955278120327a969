// =============================================================================
// Simple swing detection — centered local extrema plus pure post-filters
// =============================================================================
//
// The windowed detector marks a bar as a swing high when its high is the
// maximum over `2 * window + 1` bars centered on it (swing lows mirror). The
// post-filters are pure and composable:
//   filter_between            keep one extreme opposite point per interval
//   enforce_strict_alternation  collapse same-kind runs to their extreme
//   filter_rate               drop swings whose move is below a rate floor
// =============================================================================

use crate::strategy::zigzag::enforce_alternation;
use crate::types::{Bar, Swing, SwingKind, SwingPoint};

/// Which extreme `filter_between` keeps inside each interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepExtreme {
    Min,
    Max,
}

/// Detect swing highs and lows over a centered window. Returns empty series
/// when the input is shorter than `2 * window + 1` bars.
pub fn calculate_swing_points(bars: &[Bar], window: usize) -> (Vec<SwingPoint>, Vec<SwingPoint>) {
    let n = bars.len();
    if window == 0 || n < 2 * window + 1 {
        return (Vec::new(), Vec::new());
    }

    let mut highs = Vec::new();
    let mut lows = Vec::new();

    for i in window..(n - window) {
        let lo = i - window;
        let hi = i + window;

        if bars[lo..=hi].iter().all(|b| b.high <= bars[i].high) {
            highs.push(SwingPoint { ts: bars[i].ts, price: bars[i].high });
        }
        if bars[lo..=hi].iter().all(|b| b.low >= bars[i].low) {
            lows.push(SwingPoint { ts: bars[i].ts, price: bars[i].low });
        }
    }

    (highs, lows)
}

/// Between consecutive boundary points in `main`, keep only the extreme
/// opposite point from `other`. The outermost points of `other` are always
/// preserved.
pub fn filter_between(
    main: &[SwingPoint],
    other: &[SwingPoint],
    keep: KeepExtreme,
) -> Vec<SwingPoint> {
    if main.is_empty() || other.is_empty() {
        return Vec::new();
    }
    if main.len() < 2 {
        return other.to_vec();
    }

    let mut filtered: Vec<SwingPoint> = Vec::new();
    for pair in main.windows(2) {
        let (start, end) = (pair[0].ts, pair[1].ts);
        let inside = other.iter().filter(|p| start < p.ts && p.ts < end);

        let selected = match keep {
            KeepExtreme::Min => inside.min_by(|a, b| a.price.total_cmp(&b.price)),
            KeepExtreme::Max => inside.max_by(|a, b| a.price.total_cmp(&b.price)),
        };
        if let Some(point) = selected {
            filtered.push(*point);
        }
    }

    // Outermost points are structural anchors; never drop them.
    let first = other[0];
    let last = other[other.len() - 1];
    if !filtered.contains(&first) {
        filtered.insert(0, first);
    }
    if !filtered.contains(&last) {
        filtered.push(last);
    }

    filtered
}

/// Enforce strict high/low alternation over two point series, keeping the
/// more extreme member of any same-kind run.
pub fn enforce_strict_alternation(
    highs: &[SwingPoint],
    lows: &[SwingPoint],
) -> (Vec<SwingPoint>, Vec<SwingPoint>) {
    if highs.is_empty() && lows.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let mut merged: Vec<Swing> = highs
        .iter()
        .map(|p| Swing { kind: SwingKind::High, ts: p.ts, price: p.price })
        .chain(lows.iter().map(|p| Swing { kind: SwingKind::Low, ts: p.ts, price: p.price }))
        .collect();
    merged.sort_by_key(|s| s.ts);

    let strict = enforce_alternation(&merged);

    let mut out_highs = Vec::new();
    let mut out_lows = Vec::new();
    for swing in strict {
        let point = SwingPoint { ts: swing.ts, price: swing.price };
        match swing.kind {
            SwingKind::High => out_highs.push(point),
            SwingKind::Low => out_lows.push(point),
        }
    }
    (out_highs, out_lows)
}

/// Drop swing highs whose rise from the nearest lows is below `rate`, along
/// with the offending lows:
///   both sides fail  -> drop the high, keep only the lower of the two lows
///   one side fails   -> drop the high and the failing low
///   both sides pass  -> keep the high
/// Highs missing a left or right low are kept unconditionally. Alternation
/// is re-enforced at the end.
pub fn filter_rate(
    highs: &[SwingPoint],
    lows: &[SwingPoint],
    rate: f64,
) -> (Vec<SwingPoint>, Vec<SwingPoint>) {
    if highs.is_empty() && lows.is_empty() {
        return (Vec::new(), Vec::new());
    }
    if rate <= 0.0 {
        return (highs.to_vec(), lows.to_vec());
    }

    let mut clean_highs: Vec<SwingPoint> = Vec::new();
    let mut clean_lows: Vec<SwingPoint> = lows.to_vec();

    for high in highs {
        let left = clean_lows.iter().filter(|l| l.ts < high.ts).last().copied();
        let right = clean_lows.iter().find(|l| l.ts > high.ts).copied();

        let (Some(left), Some(right)) = (left, right) else {
            clean_highs.push(*high);
            continue;
        };

        let left_rate = if left.price > 0.0 {
            (high.price - left.price) / left.price
        } else {
            0.0
        };
        let right_rate = if right.price > 0.0 {
            (high.price - right.price) / right.price
        } else {
            0.0
        };

        if left_rate < rate && right_rate < rate {
            let lower = if left.price < right.price { left } else { right };
            clean_lows.retain(|l| *l == lower || (*l != left && *l != right));
            continue;
        }
        if left_rate < rate {
            clean_lows.retain(|l| *l != left);
            continue;
        }
        if right_rate < rate {
            clean_lows.retain(|l| *l != right);
            continue;
        }

        clean_highs.push(*high);
    }

    enforce_strict_alternation(&clean_highs, &clean_lows)
}

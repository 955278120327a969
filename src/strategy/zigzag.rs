// =============================================================================
// ZigZag++ — depth/deviation/backstep swing detection
// =============================================================================
//
// Implements the PineScript ZigZag++ (ZigLib) semantics:
//
//   hr[i] = bars since the condition
//           high[i + highestbars] - high[i] > deviation * mintick
//           was false, evaluated on the previous bar
//   lr[i] = symmetric for lows
//   direction[i] = -1 when bars-since(hr <= lr) >= backstep, else +1
//
// Three chart points track the structure: `z` (current), `z1` (previous),
// `z2` (the live swing). On a direction change z1 <- z2, z2 <- z, and the
// prior z1 price becomes the comparison anchor for HH/LH/HL/LL labels.
//
// All scans are bounded by depth + backstep, so the pass over the bar series
// is a single sweep with O(depth + backstep) look-back state.
// =============================================================================

use tracing::warn;

use crate::types::{Bar, Swing, SwingKind, SwingPoint};

/// Per-bar output of the ZigZag++ kernel.
#[derive(Debug, Clone, Default)]
pub struct ZigZagResult {
    /// +1 up-trend, -1 down-trend, per bar.
    pub direction: Vec<i32>,
    /// Current point `z`, per bar.
    pub zigzag: Vec<SwingPoint>,
    /// Previous point `z1`, per bar.
    pub z1: Vec<SwingPoint>,
    /// Live swing point `z2`, per bar.
    pub z2: Vec<SwingPoint>,
    /// "HH" / "LH" / "HL" / "LL" labels; empty for warm-up bars.
    pub point_types: Vec<&'static str>,
}

impl ZigZagResult {
    pub fn is_empty(&self) -> bool {
        self.direction.is_empty()
    }
}

/// Estimate the minimum tick as 0.01% of the average mid price, with a 0.01
/// floor for degenerate inputs.
pub fn auto_mintick(bars: &[Bar]) -> f64 {
    if bars.is_empty() {
        return 0.01;
    }
    let n = bars.len() as f64;
    let mean_high: f64 = bars.iter().map(|b| b.high).sum::<f64>() / n;
    let mean_low: f64 = bars.iter().map(|b| b.low).sum::<f64>() / n;
    let tick = (mean_high + mean_low) / 2.0 * 0.0001;
    if tick > 0.0 {
        tick
    } else {
        0.01
    }
}

/// Run the ZigZag++ kernel. Returns an empty result when the parameters are
/// invalid (`depth < 1`, `deviation < 1`, `backstep < 2`) or the series is
/// shorter than `depth + backstep + 1` bars.
pub fn calculate_zigzag(
    bars: &[Bar],
    depth: usize,
    deviation: f64,
    backstep: usize,
    mintick: Option<f64>,
) -> ZigZagResult {
    if depth < 1 || deviation < 1.0 || backstep < 2 {
        warn!(depth, deviation, backstep, "invalid zigzag parameters");
        return ZigZagResult::default();
    }
    let n = bars.len();
    if n < depth + backstep + 1 {
        return ZigZagResult::default();
    }

    let mintick = mintick.unwrap_or_else(|| auto_mintick(bars));
    let threshold = deviation * mintick;

    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();

    // --- hr / lr: windowed "bars since condition was false" scans ----------
    let mut hr = vec![0i64; n];
    let mut lr = vec![0i64; n];

    for i in (depth + 1)..n {
        let prev = i - 1;

        // Offset (<= 0) of the highest high within the last `depth` bars
        // ending at the previous bar. Ties resolve to the oldest bar.
        let win_start = prev.saturating_sub(depth - 1);
        let mut hi_idx = win_start;
        for j in win_start..=prev {
            if highs[j] > highs[hi_idx] {
                hi_idx = j;
            }
        }
        let highestbars = hi_idx as i64 - prev as i64;

        let scan_floor = prev.saturating_sub(depth);
        for j in (scan_floor..=prev).rev() {
            let ref_idx = j as i64 + highestbars;
            if ref_idx < 0 || ref_idx >= n as i64 {
                continue;
            }
            let cond = highs[ref_idx as usize] - highs[j] > threshold;
            if !cond {
                hr[i] = (prev - j) as i64;
                break;
            }
        }

        // Mirror for lows.
        let mut lo_idx = win_start;
        for j in win_start..=prev {
            if lows[j] < lows[lo_idx] {
                lo_idx = j;
            }
        }
        let lowestbars = lo_idx as i64 - prev as i64;

        for j in (scan_floor..=prev).rev() {
            let ref_idx = j as i64 + lowestbars;
            if ref_idx < 0 || ref_idx >= n as i64 {
                continue;
            }
            let cond = lows[j] - lows[ref_idx as usize] > threshold;
            if !cond {
                lr[i] = (prev - j) as i64;
                break;
            }
        }
    }

    // --- direction: -1 once hr has dominated lr for `backstep` bars --------
    let mut direction = vec![1i32; n];
    for i in (depth + 1)..n {
        let mut bars_since = 0i64;
        let scan_floor = i.saturating_sub(depth + backstep);
        for j in (scan_floor..=i).rev() {
            if hr[j] <= lr[j] {
                bars_since = (i - j) as i64;
                break;
            }
        }
        direction[i] = if bars_since >= backstep as i64 { -1 } else { 1 };
    }

    // --- z / z1 / z2 point tracking -----------------------------------------
    let mut z = SwingPoint { ts: bars[0].ts, price: lows[0] };
    let mut z1 = z;
    let mut z2 = SwingPoint { ts: bars[0].ts, price: highs[0] };
    let mut last_point = z1.price;

    let mut result = ZigZagResult {
        direction: Vec::with_capacity(n),
        zigzag: Vec::with_capacity(n),
        z1: Vec::with_capacity(n),
        z2: Vec::with_capacity(n),
        point_types: Vec::with_capacity(n),
    };

    for _ in 0..=depth {
        result.direction.push(1);
        result.zigzag.push(z);
        result.z1.push(z1);
        result.z2.push(z2);
        result.point_types.push("");
    }

    for i in (depth + 1)..n {
        let dir = direction[i];
        let prev_dir = direction[i - 1];
        let prev_z1_price = z1.price;

        if dir != prev_dir {
            z1 = z2;
            z2 = z;
            last_point = prev_z1_price;
        }

        let t = bars[i].ts;
        if dir > 0 {
            if highs[i] > z2.price {
                z2 = SwingPoint { ts: t, price: highs[i] };
                z = SwingPoint { ts: t, price: lows[i] };
            }
            if lows[i] < z.price {
                z = SwingPoint { ts: t, price: lows[i] };
            }
        } else {
            if lows[i] < z2.price {
                z2 = SwingPoint { ts: t, price: lows[i] };
                z = SwingPoint { ts: t, price: highs[i] };
            }
            if highs[i] > z.price {
                z = SwingPoint { ts: t, price: highs[i] };
            }
        }

        let label = if dir < 0 {
            if z2.price < last_point { "LL" } else { "HL" }
        } else if z2.price > last_point {
            "HH"
        } else {
            "LH"
        };

        result.direction.push(dir);
        result.zigzag.push(z);
        result.z1.push(z1);
        result.z2.push(z2);
        result.point_types.push(label);
    }

    result
}

// -----------------------------------------------------------------------------
// Swing extraction and pruning
// -----------------------------------------------------------------------------

/// Keep only swings that move more than `rate` relative to the previously
/// kept swing. The first swing is always kept.
pub fn filter_by_rate(swings: &[Swing], rate: f64) -> Vec<Swing> {
    let mut kept: Vec<Swing> = Vec::with_capacity(swings.len());
    for swing in swings {
        match kept.last() {
            None => kept.push(*swing),
            Some(prev) => {
                let price_rate = if prev.price > 0.0 {
                    (swing.price - prev.price).abs() / prev.price
                } else {
                    0.0
                };
                if price_rate > rate {
                    kept.push(*swing);
                }
            }
        }
    }
    kept
}

/// Between two opposite-kind swings, keep only the most extreme swing of the
/// leading kind (highest high / lowest low).
pub fn collapse_intermediate(swings: &[Swing]) -> Vec<Swing> {
    if swings.is_empty() {
        return Vec::new();
    }
    let mut out = vec![swings[0]];

    let mut i = 1;
    while i < swings.len() {
        let kind = swings[i].kind;

        let next_opposite = (i + 1..swings.len()).find(|&j| swings[j].kind != kind);

        let range_end = match next_opposite {
            Some(j) => j,
            None => swings.len(),
        };

        let mut best = swings[i];
        for s in &swings[i..range_end] {
            if s.kind != kind {
                continue;
            }
            let more_extreme = match kind {
                SwingKind::High => s.price > best.price,
                SwingKind::Low => s.price < best.price,
            };
            if more_extreme {
                best = *s;
            }
        }
        out.push(best);

        match next_opposite {
            Some(j) => i = j,
            None => break,
        }
    }
    out
}

/// Where two consecutive swings share a kind, keep the more extreme one.
pub fn enforce_alternation(swings: &[Swing]) -> Vec<Swing> {
    let mut out: Vec<Swing> = Vec::with_capacity(swings.len());
    for swing in swings {
        match out.last_mut() {
            Some(last) if last.kind == swing.kind => {
                let more_extreme = match swing.kind {
                    SwingKind::High => swing.price > last.price,
                    SwingKind::Low => swing.price < last.price,
                };
                if more_extreme {
                    *last = *swing;
                }
            }
            _ => out.push(*swing),
        }
    }
    out
}

/// Extract pruned swing highs and lows from a bar series.
///
/// Direction changes confirm the prior `z2` as a swing; the final `z2` is
/// appended when it does not repeat the last swing's kind. The raw sequence
/// is then rate-filtered, collapsed, and forced into strict alternation.
pub fn get_zigzag_points(
    bars: &[Bar],
    depth: usize,
    deviation: f64,
    backstep: usize,
    mintick: Option<f64>,
    pruning_rate: f64,
) -> (Vec<SwingPoint>, Vec<SwingPoint>) {
    let result = calculate_zigzag(bars, depth, deviation, backstep, mintick);
    if result.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let mut all_swings: Vec<Swing> = Vec::new();
    let mut prev_dir: Option<i32> = None;
    for i in 0..result.z2.len() {
        let dir = result.direction[i];
        if let Some(prev) = prev_dir {
            if prev != dir && i > 0 {
                let point = result.z2[i - 1];
                let kind = if prev > 0 { SwingKind::High } else { SwingKind::Low };
                all_swings.push(Swing { kind, ts: point.ts, price: point.price });
            }
        }
        prev_dir = Some(dir);
    }

    if let (Some(last_dir), Some(last_point)) = (result.direction.last(), result.z2.last()) {
        let kind = if *last_dir > 0 { SwingKind::High } else { SwingKind::Low };
        if all_swings.last().map(|s| s.kind) != Some(kind) {
            all_swings.push(Swing { kind, ts: last_point.ts, price: last_point.price });
        }
    }

    if all_swings.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let pruned = enforce_alternation(&collapse_intermediate(&filter_by_rate(
        &all_swings,
        pruning_rate,
    )));

    let mut highs = Vec::new();
    let mut lows = Vec::new();
    for swing in pruned {
        let point = SwingPoint { ts: swing.ts, price: swing.price };
        match swing.kind {
            SwingKind::High => highs.push(point),
            SwingKind::Low => lows.push(point),
        }
    }
    (highs, lows)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts: i64, price: f64) -> Bar {
        Bar {
            ts,
            open: price,
            high: price + 0.5,
            low: price - 0.5,
            close: price,
            volume: 1.0,
        }
    }

    /// Single clean peak: ramp 1..=10, then fall back to 1.
    fn peak_series() -> Vec<Bar> {
        let mut bars: Vec<Bar> = (0..10).map(|i| bar(i as i64, (i + 1) as f64)).collect();
        for (offset, price) in (1..10).rev().enumerate() {
            bars.push(bar(10 + offset as i64, price as f64));
        }
        bars
    }

    #[test]
    fn too_few_bars_returns_empty() {
        let bars: Vec<Bar> = (0..14).map(|i| bar(i, 100.0 + i as f64)).collect();
        // depth + backstep + 1 = 15 with defaults.
        let result = calculate_zigzag(&bars, 12, 5.0, 2, None);
        assert!(result.is_empty());

        let (highs, lows) = get_zigzag_points(&bars, 12, 5.0, 2, None, 0.03);
        assert!(highs.is_empty());
        assert!(lows.is_empty());
    }

    #[test]
    fn invalid_parameters_return_empty() {
        let bars = peak_series();
        assert!(calculate_zigzag(&bars, 0, 5.0, 2, None).is_empty());
        assert!(calculate_zigzag(&bars, 12, 0.5, 2, None).is_empty());
        // backstep must be >= 2.
        assert!(calculate_zigzag(&bars, 12, 5.0, 1, None).is_empty());
    }

    #[test]
    fn auto_mintick_floors_at_hundredth() {
        assert!((auto_mintick(&[]) - 0.01).abs() < f64::EPSILON);
        let bars = vec![bar(0, 10_000.0)];
        // 0.01% of 10_000 = 1.0
        assert!((auto_mintick(&bars) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn single_peak_detected_as_swing_high() {
        let bars = peak_series();
        // The aggressive 30% pruning rate strips the small counter-move the
        // direction flip-back produces at the tail of the decline.
        let (highs, lows) = get_zigzag_points(&bars, 3, 1.0, 2, Some(0.01), 0.3);

        assert_eq!(highs.len(), 1);
        assert_eq!(highs[0].ts, 9);
        assert!((highs[0].price - 10.5).abs() < 1e-9);

        assert_eq!(lows.len(), 1);
        assert!(lows[0].ts > highs[0].ts);
        assert!(lows[0].price < highs[0].price);
    }

    /// Alternation in the coalescing sense: between any two consecutive
    /// highs there is at least one low (inclusive of shared bars), and vice
    /// versa.
    fn assert_alternates(highs: &[SwingPoint], lows: &[SwingPoint]) {
        for pair in highs.windows(2) {
            assert!(
                lows.iter().any(|l| pair[0].ts <= l.ts && l.ts <= pair[1].ts),
                "two highs with no low between them"
            );
        }
        for pair in lows.windows(2) {
            assert!(
                highs.iter().any(|h| pair[0].ts <= h.ts && h.ts <= pair[1].ts),
                "two lows with no high between them"
            );
        }
    }

    #[test]
    fn extracted_swings_alternate() {
        // Two peaks with a valley between them.
        let mut bars = Vec::new();
        let mut ts = 0i64;
        for p in [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 8, 6, 4, 2, 4, 6, 8, 10, 12, 10, 8, 6, 4, 2] {
            bars.push(bar(ts, p as f64));
            ts += 1;
        }
        let (highs, lows) = get_zigzag_points(&bars, 3, 1.0, 2, Some(0.01), 0.03);

        assert!(highs.len() + lows.len() >= 2);
        assert_alternates(&highs, &lows);
    }

    // ---- pruning pipeline -------------------------------------------------

    fn swing(kind: SwingKind, ts: i64, price: f64) -> Swing {
        Swing { kind, ts, price }
    }

    #[test]
    fn rate_filter_drops_small_moves() {
        // Seed scenario: [(1,100),(2,100.5),(3,100),(4,110),(5,100)] @ 3%.
        let swings = vec![
            swing(SwingKind::Low, 1, 100.0),
            swing(SwingKind::High, 2, 100.5),
            swing(SwingKind::Low, 3, 100.0),
            swing(SwingKind::High, 4, 110.0),
            swing(SwingKind::Low, 5, 100.0),
        ];
        let pruned = enforce_alternation(&collapse_intermediate(&filter_by_rate(&swings, 0.03)));

        let highs: Vec<(i64, f64)> = pruned
            .iter()
            .filter(|s| s.kind == SwingKind::High)
            .map(|s| (s.ts, s.price))
            .collect();
        let lows: Vec<(i64, f64)> = pruned
            .iter()
            .filter(|s| s.kind == SwingKind::Low)
            .map(|s| (s.ts, s.price))
            .collect();

        assert_eq!(highs, vec![(4, 110.0)]);
        assert_eq!(lows, vec![(1, 100.0), (5, 100.0)]);
    }

    #[test]
    fn collapse_keeps_most_extreme_run_member() {
        let swings = vec![
            swing(SwingKind::Low, 1, 100.0),
            swing(SwingKind::High, 2, 105.0),
            swing(SwingKind::High, 3, 112.0),
            swing(SwingKind::High, 4, 108.0),
            swing(SwingKind::Low, 5, 95.0),
        ];
        let collapsed = collapse_intermediate(&swings);
        assert_eq!(collapsed.len(), 3);
        assert_eq!(collapsed[1].ts, 3);
        assert!((collapsed[1].price - 112.0).abs() < f64::EPSILON);
    }

    #[test]
    fn alternation_keeps_extreme_of_duplicate_kind() {
        let swings = vec![
            swing(SwingKind::High, 1, 110.0),
            swing(SwingKind::Low, 2, 100.0),
            swing(SwingKind::Low, 3, 97.0),
            swing(SwingKind::High, 4, 111.0),
        ];
        let strict = enforce_alternation(&swings);
        assert_eq!(strict.len(), 3);
        assert_eq!(strict[1].ts, 3);
        assert!((strict[1].price - 97.0).abs() < f64::EPSILON);
    }

    #[test]
    fn first_swing_always_survives_rate_filter() {
        let swings = vec![
            swing(SwingKind::Low, 1, 100.0),
            swing(SwingKind::High, 2, 100.1),
        ];
        let kept = filter_by_rate(&swings, 0.03);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].ts, 1);
    }
}

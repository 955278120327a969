// =============================================================================
// Fibonacci Calculator — bull extensions and bear retracements from swings
// =============================================================================
//
// For each swing low, two candidate levels:
//   bull: against the first swing high to the RIGHT of the low,
//         level = max(low, high - (high - low) * bullish_fib_level_lower)
//   bear: against the last swing high to the LEFT of the low,
//         level = clamp(low + (high - low) * bearish_fib_level, low, high)
//
// All arithmetic runs in exact decimals; the clamps keep degenerate inputs
// inside the swing envelope. Levels convert to floats only on emission.
// =============================================================================

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::config::StrategyParams;
use crate::decimal::{to_decimal, to_decimal_safe};
use crate::types::{FibKind, FibResult, SwingPoint};

/// Compute Fibonacci levels for all swing pairs. `swing_highs` and
/// `swing_lows` must be ordered by time (the detectors emit them that way).
pub fn calculate_fibonacci_levels(
    swing_highs: &[SwingPoint],
    swing_lows: &[SwingPoint],
    timeframe: &str,
    params: &StrategyParams,
) -> Vec<FibResult> {
    let mut output = Vec::new();
    if swing_lows.is_empty() {
        return output;
    }

    // Validate highs once; invalid prices never pair with anything.
    let mut valid_highs: Vec<(SwingPoint, Decimal)> = swing_highs
        .iter()
        .filter_map(|h| {
            let d = to_decimal(h.price)?;
            (d > Decimal::ZERO).then_some((*h, d))
        })
        .collect();
    valid_highs.sort_by_key(|(h, _)| h.ts);

    let bull_factor = to_decimal_safe(params.bullish_fib_level_lower);
    let bear_factor = to_decimal_safe(params.bearish_fib_level);

    for low in swing_lows {
        let Some(low_price) = to_decimal(low.price) else {
            continue;
        };
        if low_price <= Decimal::ZERO {
            continue;
        }

        let right_high = valid_highs.iter().find(|(h, _)| h.ts > low.ts);
        let left_high = valid_highs.iter().rev().find(|(h, _)| h.ts < low.ts);

        // Bullish extension below the right-side high.
        if let Some((high, high_price)) = right_high {
            if *high_price > low_price {
                let diff = high_price - low_price;
                let level = (high_price - diff * bull_factor).max(low_price);
                if let Some(level) = level.to_f64() {
                    output.push(FibResult {
                        timeframe: timeframe.to_string(),
                        swing_low: *low,
                        swing_high: *high,
                        fib_level: level,
                        fib_kind: FibKind::Bull,
                    });
                }
            }
        }

        // Bearish retracement above the left-side high's swing.
        if let Some((high, high_price)) = left_high {
            if *high_price > low_price {
                let diff = high_price - low_price;
                let level = (low_price + diff * bear_factor)
                    .min(*high_price)
                    .max(low_price);
                if let Some(level) = level.to_f64() {
                    output.push(FibResult {
                        timeframe: timeframe.to_string(),
                        swing_low: *low,
                        swing_high: *high,
                        fib_level: level,
                        fib_kind: FibKind::Bear,
                    });
                }
            }
        }
    }

    output
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn point(ts: i64, price: f64) -> SwingPoint {
        SwingPoint { ts, price }
    }

    fn params() -> StrategyParams {
        StrategyParams::default()
    }

    #[test]
    fn bull_extension_from_right_high() {
        // Seed scenario: low (10, 100), right high (20, 200), factor 0.618
        // -> 200 - 100 * 0.618 = 138.2.
        let fibs = calculate_fibonacci_levels(
            &[point(20, 200.0)],
            &[point(10, 100.0)],
            "1h",
            &params(),
        );
        let bull: Vec<&FibResult> = fibs.iter().filter(|f| f.fib_kind == FibKind::Bull).collect();
        assert_eq!(bull.len(), 1);
        assert!((bull[0].fib_level - 138.2).abs() < 1e-9);
        assert_eq!(bull[0].swing_high.ts, 20);
        assert_eq!(bull[0].timeframe, "1h");
    }

    #[test]
    fn bear_retracement_from_left_high() {
        let fibs = calculate_fibonacci_levels(
            &[point(5, 200.0)],
            &[point(10, 100.0)],
            "1h",
            &params(),
        );
        assert_eq!(fibs.len(), 1);
        assert_eq!(fibs[0].fib_kind, FibKind::Bear);
        // 100 + 100 * 0.618 = 161.8
        assert!((fibs[0].fib_level - 161.8).abs() < 1e-9);
        assert_eq!(fibs[0].swing_high.ts, 5);
    }

    #[test]
    fn last_low_without_right_high_emits_only_bear() {
        // One high before the low, none after.
        let fibs = calculate_fibonacci_levels(
            &[point(5, 150.0)],
            &[point(10, 100.0)],
            "4h",
            &params(),
        );
        assert_eq!(fibs.len(), 1);
        assert_eq!(fibs[0].fib_kind, FibKind::Bear);
    }

    #[test]
    fn high_below_low_is_ignored() {
        let fibs = calculate_fibonacci_levels(
            &[point(20, 90.0), point(5, 95.0)],
            &[point(10, 100.0)],
            "1h",
            &params(),
        );
        assert!(fibs.is_empty());
    }

    #[test]
    fn no_lows_no_output() {
        let fibs = calculate_fibonacci_levels(&[point(5, 100.0)], &[], "1h", &params());
        assert!(fibs.is_empty());
    }

    #[test]
    fn bull_level_never_drops_below_the_low() {
        let mut p = params();
        p.bullish_fib_level_lower = 1.5; // would land below the low unclamped
        let fibs =
            calculate_fibonacci_levels(&[point(20, 200.0)], &[point(10, 100.0)], "1h", &p);
        let bull = fibs.iter().find(|f| f.fib_kind == FibKind::Bull).unwrap();
        assert!((bull.fib_level - 100.0).abs() < 1e-9);
    }

    #[test]
    fn bear_level_clamped_into_swing_envelope() {
        let mut p = params();
        p.bearish_fib_level = 2.0; // would overshoot the high unclamped
        let fibs =
            calculate_fibonacci_levels(&[point(5, 200.0)], &[point(10, 100.0)], "1h", &p);
        assert!((fibs[0].fib_level - 200.0).abs() < 1e-9);
    }

    #[test]
    fn small_price_assets_keep_exact_levels() {
        // 0.00000030 - (0.00000030 - 0.00000010) * 0.618 = 0.000000176400
        let fibs = calculate_fibonacci_levels(
            &[point(20, 0.0000003)],
            &[point(10, 0.0000001)],
            "1h",
            &params(),
        );
        let bull = fibs.iter().find(|f| f.fib_kind == FibKind::Bull).unwrap();
        assert!((bull.fib_level - 0.0000001764).abs() < 1e-15);
    }
}

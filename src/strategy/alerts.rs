// =============================================================================
// Alert Generator — entry / SL / TP targets from confirmed swings
// =============================================================================
//
// Each confirmed fib level becomes at most one alert. The swing must be real
// (high > low > 0) and wide enough to clear the per-symbol pruning rate;
// everything narrower is noise. SL/TP targets are fib fractions of the swing
// range, measured down from the high for longs and up from the low for
// shorts. All price math runs in decimals until emission.
// =============================================================================

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use crate::config::StrategyParams;
use crate::decimal::{to_decimal, to_decimal_safe};
use crate::types::{Alert, ConfirmedFibResult, FibKind, TrendType};

/// Generate alerts for one asset from its confirmed fib levels.
pub fn generate_alerts(
    asset: &str,
    confirmed_levels: &[ConfirmedFibResult],
    params: &StrategyParams,
) -> Vec<Alert> {
    let pruning_rate = to_decimal_safe(params.pruning_rate(asset));
    let mut alerts = Vec::new();

    for level in confirmed_levels {
        let fib = &level.fib;

        let Some(low) = to_decimal(fib.swing_low.price) else {
            continue;
        };
        let Some(high) = to_decimal(fib.swing_high.price) else {
            continue;
        };
        if low <= Decimal::ZERO || high <= low {
            continue;
        }

        // Swings narrower than the pruning rate carry no tradeable range.
        let swing_rate = (high - low) / low;
        if swing_rate <= pruning_rate {
            debug!(asset, timeframe = %fib.timeframe, "discarding alert below pruning rate");
            continue;
        }

        let risk_score = level.confluence_count.min(3);
        let diff = high - low;

        let (trend_type, sl, tp1, tp2, tp3) = match fib.fib_kind {
            FibKind::Bull => (
                TrendType::Long,
                high - diff * to_decimal_safe(params.bullish_sl_fib_level),
                high - diff * to_decimal_safe(params.tp1_fib_level),
                high - diff * to_decimal_safe(params.tp2_fib_level),
                high - diff * to_decimal_safe(params.tp3_fib_level),
            ),
            FibKind::Bear => (
                TrendType::Short,
                low + diff * to_decimal_safe(params.bearish_sl_fib_level),
                low + diff * to_decimal_safe(params.tp1_fib_level),
                low + diff * to_decimal_safe(params.tp2_fib_level),
                low + diff * to_decimal_safe(params.tp3_fib_level),
            ),
        };

        let (Some(sl), Some(tp1), Some(tp2), Some(tp3)) =
            (sl.to_f64(), tp1.to_f64(), tp2.to_f64(), tp3.to_f64())
        else {
            continue;
        };

        alerts.push(Alert {
            id: Uuid::new_v4().to_string(),
            timeframe: fib.timeframe.clone(),
            trend_type,
            asset: asset.to_string(),
            entry_level: fib.fib_level,
            sl,
            tp1,
            tp2,
            tp3,
            swing_low_price: fib.swing_low.price,
            swing_high_price: fib.swing_high.price,
            swing_low_ts: fib.swing_low.ts,
            swing_high_ts: fib.swing_high.ts,
            risk_score,
        });
    }

    alerts
}

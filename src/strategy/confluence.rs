// =============================================================================
// Confluence Confirmer — match fib levels against higher-timeframe structure
// =============================================================================
//
// A candidate level on timeframe T is checked against every strictly higher
// timeframe: bull candidates against supports (S/R levels + swing lows),
// bear candidates against resistances (S/R levels + swing highs). A match is
// a reference level within `epsilon` relative distance. The matching
// timeframe count grades the level and, capped at 3, feeds the alert's risk
// score.
// =============================================================================

use std::collections::HashMap;

use crate::types::{ConfirmedFibResult, ConfluenceMark, FibKind, FibResult};

/// Pre-computed reference levels for one higher timeframe.
#[derive(Debug, Clone, Default)]
pub struct HigherTfLevels {
    pub timeframe: String,
    /// Support levels plus swing-low prices.
    pub supports: Vec<f64>,
    /// Resistance levels plus swing-high prices.
    pub resistances: Vec<f64>,
}

/// True when `level` lies within `epsilon` relative distance of any positive
/// reference level.
pub fn matches_any(level: f64, references: &[f64], epsilon: f64) -> bool {
    references
        .iter()
        .any(|r| *r > 0.0 && (level - r).abs() / r <= epsilon)
}

/// Confirm one candidate level against all higher timeframes.
pub fn confirm_fib_level(
    fib: &FibResult,
    higher: &[HigherTfLevels],
    epsilon: f64,
) -> ConfirmedFibResult {
    let mut match_4h = false;
    let mut match_1h = false;
    let mut additional_matches: HashMap<String, bool> = HashMap::new();
    let mut matched_count = 0usize;

    for tf in higher {
        let references = match fib.fib_kind {
            FibKind::Bull => &tf.supports,
            FibKind::Bear => &tf.resistances,
        };
        let matched = matches_any(fib.fib_level, references, epsilon);
        if matched {
            matched_count += 1;
        }

        match tf.timeframe.as_str() {
            "4h" => match_4h = matched,
            "1h" => match_1h = matched,
            _ => {
                additional_matches.insert(tf.timeframe.clone(), matched);
            }
        }
    }

    ConfirmedFibResult {
        fib: fib.clone(),
        match_4h,
        match_1h,
        match_both: match_4h && match_1h,
        additional_matches,
        confluence_mark: ConfluenceMark::from_match_count(matched_count),
        confluence_count: matched_count.min(3) as u32,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SwingPoint;

    fn fib(kind: FibKind, level: f64) -> FibResult {
        FibResult {
            timeframe: "15m".to_string(),
            swing_low: SwingPoint { ts: 10, price: 100.0 },
            swing_high: SwingPoint { ts: 20, price: 200.0 },
            fib_level: level,
            fib_kind: kind,
        }
    }

    fn tf(name: &str, supports: Vec<f64>, resistances: Vec<f64>) -> HigherTfLevels {
        HigherTfLevels {
            timeframe: name.to_string(),
            supports,
            resistances,
        }
    }

    #[test]
    fn epsilon_bounds_the_match() {
        assert!(matches_any(100.0, &[100.4], 0.005));
        assert!(!matches_any(100.0, &[101.0], 0.005));
        // Non-positive reference levels never match.
        assert!(!matches_any(100.0, &[0.0, -5.0], 0.005));
    }

    #[test]
    fn bull_checks_supports_bear_checks_resistances() {
        let higher = vec![tf("4h", vec![138.0], vec![500.0])];

        let bull = confirm_fib_level(&fib(FibKind::Bull, 138.2), &higher, 0.005);
        assert!(bull.match_4h);
        assert_eq!(bull.confluence_count, 1);
        assert_eq!(bull.confluence_mark, ConfluenceMark::Low);

        let bear = confirm_fib_level(&fib(FibKind::Bear, 138.2), &higher, 0.005);
        assert!(!bear.match_4h);
        assert_eq!(bear.confluence_count, 0);
        assert_eq!(bear.confluence_mark, ConfluenceMark::None);
    }

    #[test]
    fn match_both_requires_both_named_timeframes() {
        let higher = vec![
            tf("1h", vec![138.0], vec![]),
            tf("4h", vec![138.5], vec![]),
        ];
        let confirmed = confirm_fib_level(&fib(FibKind::Bull, 138.2), &higher, 0.005);
        assert!(confirmed.match_1h);
        assert!(confirmed.match_4h);
        assert!(confirmed.match_both);
        assert_eq!(confirmed.confluence_count, 2);
        assert_eq!(confirmed.confluence_mark, ConfluenceMark::Medium);
    }

    #[test]
    fn count_caps_at_three_mark_keeps_growing() {
        let higher = vec![
            tf("1h", vec![138.2], vec![]),
            tf("4h", vec![138.2], vec![]),
            tf("1d", vec![138.2], vec![]),
            tf("1w", vec![138.2], vec![]),
        ];
        let confirmed = confirm_fib_level(&fib(FibKind::Bull, 138.2), &higher, 0.005);
        assert_eq!(confirmed.confluence_count, 3);
        assert_eq!(confirmed.confluence_mark, ConfluenceMark::VeryHigh);
        assert_eq!(confirmed.additional_matches.get("1d"), Some(&true));
        assert_eq!(confirmed.additional_matches.get("1w"), Some(&true));
    }

    #[test]
    fn no_higher_timeframes_grades_none() {
        let confirmed = confirm_fib_level(&fib(FibKind::Bull, 138.2), &[], 0.005);
        assert_eq!(confirmed.confluence_count, 0);
        assert_eq!(confirmed.confluence_mark, ConfluenceMark::None);
        assert!(!confirmed.match_both);
        assert!(confirmed.additional_matches.is_empty());
    }
}

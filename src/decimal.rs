// =============================================================================
// Exact-decimal helpers for price arithmetic
// =============================================================================
//
// Low-priced assets (sub-satoshi alts) lose digits when their prices round
// through binary floats. Every price calculation in the Fibonacci and alert
// pipelines therefore runs in `rust_decimal::Decimal`; floats are accepted at
// the boundary and only re-emitted at the very end.
//
// Float -> decimal conversion goes through the float's shortest string
// rendering rather than the raw bit pattern, so `0.1f64` becomes exactly
// `0.1` and not `0.1000000000000000055511151231257827`.

use std::cmp::Ordering;
use std::str::FromStr;

use rust_decimal::Decimal;

/// Convert a float to an exact decimal, or `None` when the value is not
/// finite or out of the representable range.
pub fn to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_str(&value.to_string()).ok()
}

/// Parse a decimal from its string form (exchange payloads carry numerics as
/// strings).
pub fn to_decimal_str(value: &str) -> Option<Decimal> {
    Decimal::from_str(value.trim()).ok()
}

/// Convert a float to a decimal, falling back to zero when the conversion is
/// impossible.
pub fn to_decimal_safe(value: f64) -> Decimal {
    to_decimal(value).unwrap_or(Decimal::ZERO)
}

/// Three-way comparison of two decimals.
pub fn decimal_compare(a: Decimal, b: Decimal) -> Ordering {
    a.cmp(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_artifacts_are_stripped() {
        assert_eq!(to_decimal(0.1).unwrap(), Decimal::from_str("0.1").unwrap());
        assert_eq!(to_decimal(0.00001234).unwrap().to_string(), "0.00001234");
    }

    #[test]
    fn non_finite_rejected() {
        assert!(to_decimal(f64::NAN).is_none());
        assert!(to_decimal(f64::INFINITY).is_none());
        assert_eq!(to_decimal_safe(f64::NAN), Decimal::ZERO);
    }

    #[test]
    fn string_roundtrip() {
        for s in ["138.2", "0.000000045", "200", "-3.5"] {
            let d = to_decimal_str(s).unwrap();
            assert_eq!(to_decimal_str(&d.to_string()).unwrap(), d);
        }
    }

    #[test]
    fn compare_orders_correctly() {
        let a = to_decimal(1.5).unwrap();
        let b = to_decimal(1.50).unwrap();
        let c = to_decimal(2.0).unwrap();
        assert_eq!(decimal_compare(a, b), Ordering::Equal);
        assert_eq!(decimal_compare(a, c), Ordering::Less);
        assert_eq!(decimal_compare(c, a), Ordering::Greater);
    }
}

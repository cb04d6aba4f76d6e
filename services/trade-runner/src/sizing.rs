//! Risk-managed order sizing

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, warn};

/// Allocation used when the recommended one is missing or out of range (1%)
pub const DEFAULT_FRACTION_PCT: Decimal = Decimal::ONE;

/// Largest scale a `Decimal` can carry
const MAX_PRECISION: u32 = 28;

/// Result of sizing one opening order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingOutcome {
    /// Exchange-legal quantity, truncated to the instrument precision
    Quantity {
        quantity: Decimal,
        /// The recommended fraction was replaced by [`DEFAULT_FRACTION_PCT`]
        fallback_applied: bool,
    },
    /// Truncated quantity is zero or the inputs cannot produce one; skip the order
    NoTradeQuantity { fallback_applied: bool },
}

impl SizingOutcome {
    pub fn quantity(&self) -> Option<Decimal> {
        match self {
            SizingOutcome::Quantity { quantity, .. } => Some(*quantity),
            SizingOutcome::NoTradeQuantity { .. } => None,
        }
    }

    pub fn fallback_applied(&self) -> bool {
        match self {
            SizingOutcome::Quantity { fallback_applied, .. }
            | SizingOutcome::NoTradeQuantity { fallback_applied } => *fallback_applied,
        }
    }
}

/// Clamp a recommended allocation (percent of equity) into (0, 100].
///
/// Returns the fraction to use and whether the default was substituted.
pub fn effective_fraction(fraction_pct: Option<Decimal>) -> (Decimal, bool) {
    match fraction_pct {
        Some(f) if f > Decimal::ZERO && f <= Decimal::ONE_HUNDRED => (f, false),
        _ => (DEFAULT_FRACTION_PCT, true),
    }
}

/// Convert an allocation into an order quantity.
///
/// `capital = equity * fraction / 100`, `quantity = capital / price`, truncated
/// toward zero at `precision` decimal places.
///
/// # Safety
/// - Never rounds up: the result is always <= the exact quotient
/// - Non-positive price or overflow yields `NoTradeQuantity`
/// - Precision above 28 is clamped
pub fn size_order(
    equity: Decimal,
    fraction_pct: Option<Decimal>,
    price: Decimal,
    precision: u32,
) -> SizingOutcome {
    let (fraction, fallback_applied) = effective_fraction(fraction_pct);
    if fallback_applied {
        warn!(
            "Recommended allocation {:?}% invalid or out of range (0-100], using default {}%",
            fraction_pct, DEFAULT_FRACTION_PCT
        );
    }

    if price <= Decimal::ZERO {
        warn!("Invalid price {}, cannot size order", price);
        return SizingOutcome::NoTradeQuantity { fallback_applied };
    }

    let raw = equity
        .checked_mul(fraction)
        .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
        .and_then(|capital| capital.checked_div(price));
    let Some(raw) = raw else {
        warn!(
            "Sizing overflow: equity={}, fraction={}%, price={}",
            equity, fraction, price
        );
        return SizingOutcome::NoTradeQuantity { fallback_applied };
    };

    let quantity =
        raw.round_dp_with_strategy(precision.min(MAX_PRECISION), RoundingStrategy::ToZero);

    debug!(
        "Sizing: equity={}, fraction={}%, price={}, raw={}, precision={} -> {}",
        equity, fraction, price, raw, precision, quantity
    );

    if quantity <= Decimal::ZERO {
        return SizingOutcome::NoTradeQuantity { fallback_applied };
    }
    SizingOutcome::Quantity {
        quantity,
        fallback_applied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_allocation_example() {
        // 1000 * 3.2% = 32 USDT at 100 -> 0.32
        let outcome = size_order(d("1000"), Some(d("3.2")), d("100"), 3);
        assert_eq!(
            outcome,
            SizingOutcome::Quantity {
                quantity: d("0.32"),
                fallback_applied: false
            }
        );
    }

    #[test]
    fn test_truncates_toward_zero() {
        // 1000 * 1% / 3 = 3.3333...
        let outcome = size_order(d("1000"), Some(d("1")), d("3"), 2);
        assert_eq!(outcome.quantity(), Some(d("3.33")));

        // 0.0999 would round to 0.1 but must truncate
        let outcome = size_order(d("999"), Some(d("1")), d("100"), 1);
        assert!(matches!(outcome, SizingOutcome::NoTradeQuantity { .. }));

        let outcome = size_order(d("1999"), Some(d("1")), d("100"), 1);
        assert_eq!(outcome.quantity(), Some(d("0.1")));
    }

    #[test]
    fn test_fallback_on_invalid_fraction() {
        for fraction in [None, Some(d("0")), Some(d("-5")), Some(d("100.01")), Some(d("250"))] {
            let outcome = size_order(d("10000"), fraction, d("50"), 3);
            assert!(outcome.fallback_applied(), "fraction {:?}", fraction);
            assert_eq!(outcome.quantity(), Some(d("2")));
        }

        let outcome = size_order(d("10000"), Some(d("100")), d("50"), 3);
        assert!(!outcome.fallback_applied());
        assert_eq!(outcome.quantity(), Some(d("200")));
    }

    #[test]
    fn test_no_trade_quantity() {
        assert!(matches!(
            size_order(d("10"), Some(d("1")), d("60000"), 3),
            SizingOutcome::NoTradeQuantity { fallback_applied: false }
        ));
        assert!(matches!(
            size_order(d("1000"), Some(d("5")), d("0"), 3),
            SizingOutcome::NoTradeQuantity { .. }
        ));
        assert!(matches!(
            size_order(d("1000"), Some(d("5")), d("-1"), 3),
            SizingOutcome::NoTradeQuantity { .. }
        ));
        assert!(matches!(
            size_order(d("0"), Some(d("5")), d("100"), 3),
            SizingOutcome::NoTradeQuantity { .. }
        ));
    }

    #[test]
    fn test_quantity_never_exceeds_exact_value() {
        let equities = ["1", "37.5", "1000", "123456.789"];
        let fractions = ["0.01", "1", "3.2", "33.3", "99.99", "100"];
        let prices = ["0.0007", "1.5", "97.3", "64250.1"];

        for e in equities {
            for f in fractions {
                for p in prices {
                    for precision in 0..=8u32 {
                        let exact = d(e) * d(f) / Decimal::ONE_HUNDRED / d(p);
                        match size_order(d(e), Some(d(f)), d(p), precision) {
                            SizingOutcome::Quantity { quantity, fallback_applied } => {
                                assert!(!fallback_applied);
                                assert!(quantity > Decimal::ZERO);
                                assert!(quantity <= exact, "{} > {}", quantity, exact);
                                assert!(quantity.scale() <= precision);
                                let step = Decimal::new(1, precision);
                                assert!(exact - quantity < step);
                            }
                            SizingOutcome::NoTradeQuantity { .. } => {
                                assert!(exact < Decimal::new(1, precision));
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_precision_is_clamped() {
        let outcome = size_order(d("1000"), Some(d("1")), d("3"), 40);
        assert!(outcome.quantity().is_some());
    }
}

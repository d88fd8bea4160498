//! KDV (value-added tax) computation and validation engine
//!
//! Provides:
//! - Forward and backward VAT computation on exact decimals
//! - Tolerance-based validation with engine-suggested corrections
//! - Nearest-valid-rate resolution against the national schedule
//!
//! Recognition and model output are both lossy, so no stated amount is
//! trusted on its own: consumers reconcile against the engine's numbers and
//! prefer them whenever inputs disagree beyond tolerance.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

/// National KDV schedule in ascending order. Fixed domain knowledge, not
/// user-configurable.
pub fn valid_rates() -> [Decimal; 3] {
    [Decimal::ONE, Decimal::from(10u32), Decimal::from(20u32)]
}

/// Maximum tolerated discrepancy between a stated and a computed amount,
/// in currency units.
pub fn tolerance() -> Decimal {
    Decimal::new(1, 2)
}

/// Goods and services categories attached to each schedule rate.
pub fn categories_for(rate: Decimal) -> &'static [&'static str] {
    if rate == Decimal::ONE {
        &[
            "Newspapers, magazines, books and similar publications",
            "Education services",
        ]
    } else if rate == Decimal::from(10u32) {
        &[
            "Residential rents",
            "Basic foodstuffs",
            "Medicine and medical supplies",
            "Books and periodicals",
            "Residential deliveries",
        ]
    } else if rate == Decimal::from(20u32) {
        &[
            "General goods and services",
            "Consumer electronics",
            "Clothing",
            "Furniture",
            "Consulting services",
            "Software services",
        ]
    } else {
        &[]
    }
}

/// Corrected amounts offered when validation fails. Callers are expected to
/// prefer these over the disputed inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedTotals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub rate: Decimal,
}

/// Result of a tax computation or validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxCalculationResult {
    pub is_valid: bool,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub rate: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested: Option<SuggestedTotals>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TaxCalculationResult {
    fn invalid(
        subtotal: Decimal,
        tax_amount: Decimal,
        total: Decimal,
        rate: Decimal,
        message: String,
    ) -> Self {
        Self {
            is_valid: false,
            subtotal,
            tax_amount,
            total,
            rate,
            suggested: None,
            message: Some(message),
        }
    }

    fn valid(subtotal: Decimal, tax_amount: Decimal, total: Decimal, rate: Decimal) -> Self {
        Self {
            is_valid: true,
            subtotal,
            tax_amount,
            total,
            rate,
            suggested: None,
            message: None,
        }
    }
}

/// Round half-up to two decimal places
pub fn round_half_up(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Compute tax and gross total from a net subtotal
pub fn forward(subtotal: Decimal, rate: Decimal) -> TaxCalculationResult {
    if subtotal < Decimal::ZERO {
        return TaxCalculationResult::invalid(
            subtotal,
            Decimal::ZERO,
            subtotal,
            rate,
            "subtotal cannot be negative".to_string(),
        );
    }

    if !valid_rates().contains(&rate) {
        warn!(rate = %rate, "KDV rate is not on the national schedule");
    }

    let tax_amount = round_half_up(subtotal * rate / Decimal::from(100u32));
    let total = subtotal + tax_amount;
    TaxCalculationResult::valid(subtotal, tax_amount, total, rate)
}

/// Compute net subtotal and tax backwards from a gross total
pub fn backward(total: Decimal, rate: Decimal) -> TaxCalculationResult {
    if total < Decimal::ZERO {
        return TaxCalculationResult::invalid(
            Decimal::ZERO,
            Decimal::ZERO,
            total,
            rate,
            "total cannot be negative".to_string(),
        );
    }

    let divisor = Decimal::ONE + rate / Decimal::from(100u32);
    if divisor.is_zero() {
        return TaxCalculationResult::invalid(
            Decimal::ZERO,
            Decimal::ZERO,
            total,
            rate,
            "rate produces a zero divisor".to_string(),
        );
    }

    if !valid_rates().contains(&rate) {
        warn!(rate = %rate, "KDV rate is not on the national schedule");
    }

    let subtotal = round_half_up(total / divisor);
    let tax_amount = total - subtotal;
    TaxCalculationResult::valid(subtotal, tax_amount, total, rate)
}

/// Snap an inferred rate to the closest schedule entry by absolute
/// distance. Ties resolve to the smaller rate.
pub fn closest_valid_rate(rate: Decimal) -> Decimal {
    let rates = valid_rates();
    let mut closest = rates[0];
    let mut min_diff = (rate - closest).abs();

    for candidate in rates.into_iter().skip(1) {
        let diff = (rate - candidate).abs();
        if diff < min_diff {
            min_diff = diff;
            closest = candidate;
        }
    }

    closest
}

/// Check a stated subtotal/tax/total triple for arithmetic consistency.
///
/// When `rate` is omitted it is inferred from tax/subtotal and snapped to
/// the schedule; the inference is a recovery heuristic, not a statement of
/// truth. Any failed equality yields `is_valid = false` together with the
/// engine's own recomputation in `suggested`.
pub fn validate(
    subtotal: Decimal,
    tax_amount: Decimal,
    total: Decimal,
    rate: Option<Decimal>,
) -> TaxCalculationResult {
    if subtotal < Decimal::ZERO || tax_amount < Decimal::ZERO || total < Decimal::ZERO {
        return TaxCalculationResult::invalid(
            subtotal,
            tax_amount,
            total,
            rate.unwrap_or(Decimal::ZERO),
            "amounts cannot be negative".to_string(),
        );
    }

    let rate = match rate {
        Some(rate) => rate,
        None if subtotal > Decimal::ZERO => {
            let inferred = round_half_up(tax_amount / subtotal * Decimal::from(100u32));
            closest_valid_rate(inferred)
        }
        None => Decimal::from(20u32),
    };

    let expected = forward(subtotal, rate);
    let stated_sum = subtotal + tax_amount;
    let sum_diff = (total - stated_sum).abs();
    let tax_diff = (tax_amount - expected.tax_amount).abs();
    let total_diff = (total - expected.total).abs();

    let mut problems = Vec::new();
    if sum_diff > tolerance() {
        problems.push(format!(
            "stated total {} does not match {} + {} = {} (off by {})",
            total, subtotal, tax_amount, stated_sum, sum_diff
        ));
    }
    if tax_diff > tolerance() {
        problems.push(format!(
            "tax at {}% should be {}, invoice states {} (off by {})",
            rate, expected.tax_amount, tax_amount, tax_diff
        ));
    }
    if total_diff > tolerance() {
        problems.push(format!(
            "total at {}% should be {}, invoice states {} (off by {})",
            rate, expected.total, total, total_diff
        ));
    }

    if problems.is_empty() {
        return TaxCalculationResult::valid(subtotal, tax_amount, total, rate);
    }

    TaxCalculationResult {
        is_valid: false,
        subtotal,
        tax_amount,
        total,
        rate,
        suggested: Some(SuggestedTotals {
            subtotal,
            tax_amount: expected.tax_amount,
            total: expected.total,
            rate,
        }),
        message: Some(problems.join("; ")),
    }
}

/// Parse helper for literals in tests and fixtures
pub fn decimal(value: &str) -> Decimal {
    Decimal::from_str(value).expect("invalid decimal literal")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_standard_rate() {
        let result = forward(decimal("10000.00"), decimal("20"));
        assert!(result.is_valid);
        assert_eq!(result.tax_amount, decimal("2000.00"));
        assert_eq!(result.total, decimal("12000.00"));
    }

    #[test]
    fn test_forward_rounds_half_up() {
        // 33.335 rounds away from zero to 33.34
        let result = forward(decimal("333.35"), decimal("10"));
        assert_eq!(result.tax_amount, decimal("33.34"));
    }

    #[test]
    fn test_forward_rejects_negative_subtotal() {
        let result = forward(decimal("-1"), decimal("20"));
        assert!(!result.is_valid);
        assert!(result.message.unwrap().contains("negative"));
    }

    #[test]
    fn test_forward_accepts_off_schedule_rate() {
        let result = forward(decimal("100.00"), decimal("18"));
        assert!(result.is_valid);
        assert_eq!(result.tax_amount, decimal("18.00"));
    }

    #[test]
    fn test_backward_standard_rate() {
        let result = backward(decimal("12000.00"), decimal("20"));
        assert!(result.is_valid);
        assert_eq!(result.subtotal, decimal("10000.00"));
        assert_eq!(result.tax_amount, decimal("2000.00"));
    }

    #[test]
    fn test_round_trip_law() {
        for (subtotal, rate) in [
            ("10000.00", "20"),
            ("1234.56", "10"),
            ("19.99", "1"),
            ("0.01", "20"),
        ] {
            let forwarded = forward(decimal(subtotal), decimal(rate));
            let back = backward(forwarded.total, decimal(rate));
            let diff = (back.subtotal - decimal(subtotal)).abs();
            assert!(diff <= tolerance(), "{} at {}% drifted by {}", subtotal, rate, diff);
        }
    }

    #[test]
    fn test_validate_consistent_triple() {
        let result = validate(
            decimal("10000.00"),
            decimal("2000.00"),
            decimal("12000.00"),
            Some(decimal("20")),
        );
        assert!(result.is_valid);
        assert!(result.suggested.is_none());
    }

    #[test]
    fn test_validate_flags_stated_tax_mismatch() {
        let result = validate(
            decimal("10000"),
            decimal("1999"),
            decimal("12000"),
            None,
        );
        assert!(!result.is_valid);
        assert_eq!(result.rate, decimal("20"));
        let suggested = result.suggested.unwrap();
        assert_eq!(suggested.tax_amount, decimal("2000.00"));
        assert_eq!(suggested.total, decimal("12000.00"));
        assert!(result.message.unwrap().contains("off by"));
    }

    #[test]
    fn test_validate_exact_tolerance_edge() {
        // Exactly 0.01 off is still acceptable; 0.02 is not.
        let at_edge = validate(
            decimal("100.00"),
            decimal("20.01"),
            decimal("120.01"),
            Some(decimal("20")),
        );
        assert!(at_edge.is_valid);

        let past_edge = validate(
            decimal("100.00"),
            decimal("20.02"),
            decimal("120.02"),
            Some(decimal("20")),
        );
        assert!(!past_edge.is_valid);
    }

    #[test]
    fn test_suggested_values_always_validate() {
        let result = validate(
            decimal("500.00"),
            decimal("43.21"),
            decimal("600.00"),
            Some(decimal("10")),
        );
        assert!(!result.is_valid);
        let suggested = result.suggested.unwrap();
        let recheck = validate(
            suggested.subtotal,
            suggested.tax_amount,
            suggested.total,
            Some(suggested.rate),
        );
        assert!(recheck.is_valid);
    }

    #[test]
    fn test_validate_defaults_rate_on_zero_subtotal() {
        let result = validate(Decimal::ZERO, Decimal::ZERO, Decimal::ZERO, None);
        assert!(result.is_valid);
        assert_eq!(result.rate, decimal("20"));
    }

    #[test]
    fn test_validate_rejects_negative_amounts() {
        let result = validate(decimal("-5"), decimal("1"), decimal("-4"), None);
        assert!(!result.is_valid);
        assert!(result.suggested.is_none());
    }

    #[test]
    fn test_closest_rate_minimal_distance() {
        assert_eq!(closest_valid_rate(decimal("19.99")), decimal("20"));
        assert_eq!(closest_valid_rate(decimal("9.2")), decimal("10"));
        assert_eq!(closest_valid_rate(decimal("2.5")), decimal("1"));
        assert_eq!(closest_valid_rate(decimal("95")), decimal("20"));
    }

    #[test]
    fn test_closest_rate_tie_breaks_to_smaller() {
        // 5.5 is equidistant from 1 and 10
        assert_eq!(closest_valid_rate(decimal("5.5")), decimal("1"));
        // 15 is equidistant from 10 and 20
        assert_eq!(closest_valid_rate(decimal("15")), decimal("10"));
    }

    #[test]
    fn test_categories_cover_schedule() {
        for rate in valid_rates() {
            assert!(!categories_for(rate).is_empty());
        }
        assert!(categories_for(decimal("18")).is_empty());
    }
}

//! Cart and order arithmetic. Pure functions, no I/O.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::config::PricingConfig;

/// Currency precision used for every stored amount
pub const MONEY_SCALE: u32 = 2;

/// One priced line as the engine sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricedLine {
    pub unit_price: Decimal,
    pub quantity: i32,
}

impl PricedLine {
    pub fn new(unit_price: Decimal, quantity: i32) -> Self {
        Self {
            unit_price,
            quantity,
        }
    }

    pub fn subtotal(&self) -> Decimal {
        round_money(self.unit_price * Decimal::from(self.quantity))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Rounds half away from zero to two decimal places.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Sums `lines` and applies `discount` and tax.
///
/// The discount is clamped into `[0, subtotal]` so the taxable base and the
/// total are never negative.
pub fn compute_totals(lines: &[PricedLine], discount: Decimal, tax_rate_percent: Decimal) -> Totals {
    let subtotal = round_money(lines.iter().map(PricedLine::subtotal).sum());
    let discount = round_money(discount.max(Decimal::ZERO).min(subtotal));
    let taxable = (subtotal - discount).max(Decimal::ZERO);
    let tax = round_money(taxable * tax_rate_percent / Decimal::ONE_HUNDRED);

    Totals {
        subtotal,
        discount,
        tax,
        total: subtotal - discount + tax,
    }
}

/// Free above the threshold, flat fee at or below it.
pub fn shipping_cost(subtotal: Decimal, pricing: &PricingConfig) -> Decimal {
    if subtotal > pricing.free_shipping_threshold {
        Decimal::ZERO
    } else {
        pricing.flat_shipping_fee
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn totals_for_simple_cart() {
        let lines = [PricedLine::new(dec!(250), 2), PricedLine::new(dec!(499.50), 1)];
        let totals = compute_totals(&lines, dec!(100), dec!(18));

        assert_eq!(totals.subtotal, dec!(999.50));
        assert_eq!(totals.discount, dec!(100));
        assert_eq!(totals.tax, dec!(161.91));
        assert_eq!(totals.total, dec!(1061.41));
    }

    #[test]
    fn discount_larger_than_subtotal_is_clamped() {
        let totals = compute_totals(&[PricedLine::new(dec!(40), 1)], dec!(75), dec!(18));
        assert_eq!(totals.discount, dec!(40));
        assert_eq!(totals.tax, Decimal::ZERO);
        assert_eq!(totals.total, Decimal::ZERO);
    }

    #[test]
    fn empty_cart_is_all_zero() {
        assert_eq!(compute_totals(&[], dec!(10), dec!(18)), Totals::default());
    }

    #[test]
    fn tax_rounds_half_away_from_zero() {
        // 0.25 * 18% = 0.045
        let totals = compute_totals(&[PricedLine::new(dec!(0.25), 1)], Decimal::ZERO, dec!(18));
        assert_eq!(totals.tax, dec!(0.05));
    }

    #[test]
    fn shipping_is_free_strictly_above_threshold() {
        let pricing = PricingConfig::default();
        assert_eq!(shipping_cost(dec!(501), &pricing), Decimal::ZERO);
        assert_eq!(shipping_cost(dec!(500), &pricing), dec!(99));
        assert_eq!(shipping_cost(dec!(0), &pricing), dec!(99));
    }

    fn line() -> impl Strategy<Value = PricedLine> {
        (0i64..1_000_000, 1i32..50)
            .prop_map(|(cents, qty)| PricedLine::new(Decimal::new(cents, 2), qty))
    }

    proptest! {
        #[test]
        fn totals_stay_consistent(
            lines in proptest::collection::vec(line(), 0..12),
            discount_cents in 0i64..5_000_000,
            rate in 0u32..=100,
        ) {
            let totals = compute_totals(&lines, Decimal::new(discount_cents, 2), Decimal::from(rate));
            prop_assert!(totals.discount <= totals.subtotal);
            prop_assert!(totals.discount >= Decimal::ZERO);
            prop_assert!(totals.tax >= Decimal::ZERO);
            prop_assert_eq!(totals.total, totals.subtotal - totals.discount + totals.tax);
            prop_assert!(totals.total >= Decimal::ZERO);
        }
    }
}

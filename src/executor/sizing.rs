//! Position sizing (§4.7): the caller supplies a target percentage of
//! available balance, clamped to the [0.1%, 10%] band, then converted to a
//! base-asset quantity at the fill price.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const MIN_SIZE_PCT: Decimal = dec!(0.001);
const MAX_SIZE_PCT: Decimal = dec!(0.10);

/// Clamps a requested balance percentage into the allowed band.
pub fn clamp_size_pct(requested_pct: Decimal) -> Decimal {
    requested_pct.clamp(MIN_SIZE_PCT, MAX_SIZE_PCT)
}

/// Converts a balance percentage and fill price into a base-asset quantity.
pub fn quantity_for(balance: Decimal, size_pct: Decimal, fill_price: Decimal) -> Decimal {
    if fill_price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (balance * clamp_size_pct(size_pct)) / fill_price
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_below_floor_up_to_the_minimum() {
        assert_eq!(clamp_size_pct(dec!(0.0001)), MIN_SIZE_PCT);
    }

    #[test]
    fn clamps_above_cap_down_to_the_maximum() {
        assert_eq!(clamp_size_pct(dec!(0.5)), MAX_SIZE_PCT);
    }

    #[test]
    fn quantity_scales_with_balance_and_price() {
        let qty = quantity_for(dec!(10000), dec!(0.10), dec!(50000));
        assert_eq!(qty, dec!(0.02));
    }
}
